//! TCP + TLS dialer behind the gRPC channel.
//!
//! tonic is handed a plain `http://` endpoint and this connector; the TLS
//! session, including server verification, is set up here from the loaded
//! [`ClientConfig`](rustls::ClientConfig).

// External crates
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tonic::codegen::Service;
use tonic::transport::Uri;

const DEFAULT_TLS_PORT: u16 = 443;

type ConnectFuture =
    Pin<Box<dyn Future<Output = io::Result<TokioIo<TlsStream<TcpStream>>>> + Send>>;

/// Dials the Goldmane endpoint and completes a mutual TLS handshake.
#[derive(Clone)]
pub struct MtlsConnector {
    tls: TlsConnector,
    server_name: ServerName<'static>,
}

impl fmt::Debug for MtlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtlsConnector")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl MtlsConnector {
    /// Connector presenting `config` and verifying the server as `server_name`.
    pub fn new(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            tls: TlsConnector::from(config),
            server_name,
        }
    }
}

impl Service<Uri> for MtlsConnector {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = io::Error;
    type Future = ConnectFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let tls = self.tls.clone();
        let server_name = self.server_name.clone();

        Box::pin(async move {
            let host = uri
                .host()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing host"))?;
            let port = uri.port_u16().unwrap_or(DEFAULT_TLS_PORT);

            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;

            let stream = tls.connect(server_name, tcp).await?;
            tracing::debug!(host = %host, port, "TLS session established");
            Ok(TokioIo::new(stream))
        })
    }
}
