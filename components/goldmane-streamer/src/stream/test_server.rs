//! In-process Goldmane `Flows` server requiring client certificates.

use crate::credentials::test_support::TestPki;
use crate::proto::goldmane::flows_server::{Flows, FlowsServer};
use crate::proto::goldmane::{FlowResult, FlowStreamRequest};
use futures::Stream;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};

/// Certificate the server presents.
pub(crate) enum ServerIdentity<'a> {
    /// Fresh leaf for `127.0.0.1` signed by the test CA.
    Issued,
    /// The client's own certificate and key.
    ClientKeyPair,
    /// Leaf for `127.0.0.1` signed by another CA.
    IssuedBy(&'a TestPki),
}

type FlowStream = Pin<Box<dyn Stream<Item = Result<FlowResult, Status>> + Send>>;

/// Replays a fixed script to the first caller.
struct ScriptedFlows {
    items: Mutex<Vec<Result<FlowResult, Status>>>,
    hold_open: bool,
}

#[tonic::async_trait]
impl Flows for ScriptedFlows {
    type StreamStream = FlowStream;

    async fn stream(
        &self,
        _request: Request<FlowStreamRequest>,
    ) -> Result<Response<Self::StreamStream>, Status> {
        let items = std::mem::take(&mut *self.items.lock().expect("script lock"));
        let hold_open = self.hold_open;

        let stream = async_stream::stream! {
            for item in items {
                yield item;
            }
            if hold_open {
                std::future::pending::<()>().await;
            }
        };
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Running server; aborted on drop.
pub(crate) struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve `items` on a loopback port, trusting client certificates signed
    /// by `pki`'s CA. With `hold_open` the stream stays open after the script.
    pub(crate) async fn start(
        pki: &TestPki,
        identity: ServerIdentity<'_>,
        items: Vec<Result<FlowResult, Status>>,
        hold_open: bool,
    ) -> Self {
        let (cert, key) = match identity {
            ServerIdentity::Issued => pki.issue(&["127.0.0.1"]),
            ServerIdentity::ClientKeyPair => (
                std::fs::read_to_string(&pki.cert).expect("client cert readable"),
                std::fs::read_to_string(&pki.key).expect("client key readable"),
            ),
            ServerIdentity::IssuedBy(other) => other.issue(&["127.0.0.1"]),
        };

        let tls = ServerTlsConfig::new()
            .identity(Identity::from_pem(cert, key))
            .client_ca_root(Certificate::from_pem(pki.ca_pem()));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("bound address");

        let router = Server::builder()
            .tls_config(tls)
            .expect("server TLS config should build")
            .add_service(FlowsServer::new(ScriptedFlows {
                items: Mutex::new(items),
                hold_open,
            }));

        let handle = tokio::spawn(async move {
            let _ = router
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
        });

        Self { addr, handle }
    }

    /// `host:port` for `FlowStreamClient::connect`.
    pub(crate) fn addr(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
