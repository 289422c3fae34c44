//! Stream client - one connection, one server-streaming call.
//!
//! The client owns a single lazily-connected gRPC channel to Goldmane.
//! Creating it performs no network I/O; connectivity and TLS failures
//! surface when the stream is opened or on the first receive.
//!
//! Important design notes:
//! - There is no reconnect and no retry. A failed open, a receive error and a
//! graceful end of stream are all terminal for the process.
//! - The receive side is exposed through [`FlowSource`], so the dispatch loop
//! does not depend on tonic types.

// Local crates
use crate::{
    credentials::credentials::Credentials,
    proto::goldmane::{Flow, FlowResult, FlowStreamRequest, flows_client::FlowsClient},
    stream::connector::MtlsConnector,
};

// External crates
use rustls::pki_types::ServerName;
use serde::Serialize;
use std::future::Future;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Status, Streaming};
use tracing::instrument;

/// Stream client error handling
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid server address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },
    #[error("failed to open flow stream: {0}")]
    Open(#[source] Status),
    #[error("flow stream closed by server")]
    Closed,
    #[error("flow stream receive failed: {0}")]
    Receive(#[source] Status),
}

/// A blocking, ordered source of flow records.
///
/// Every error is terminal; callers must not call `next_record` again after
/// one is returned.
pub trait FlowSource {
    /// Payload that gets serialized for each record.
    type Record: Serialize;

    /// Wait for the next record.
    fn next_record(&mut self) -> impl Future<Output = Result<Self::Record, StreamError>>;
}

impl FlowSource for Streaming<FlowResult> {
    type Record = Option<Flow>;

    async fn next_record(&mut self) -> Result<Self::Record, StreamError> {
        match self.message().await {
            Ok(Some(result)) => {
                tracing::trace!(flow_id = result.id, "Received flow result");
                Ok(result.flow)
            }
            Ok(None) => Err(StreamError::Closed),
            Err(status) => Err(StreamError::Receive(status)),
        }
    }
}

/// Client for the Goldmane `Flows` service.
#[derive(Debug)]
pub struct FlowStreamClient {
    client: FlowsClient<Channel>,
    uri: Uri,
}

impl FlowStreamClient {
    /// Configure a lazily-connected mTLS channel to `addr`.
    ///
    /// `addr` is `host:port` or an `https://` URI. The TLS server name is the
    /// host part of the address.
    #[instrument(
        name = "stream_client::connect",
        target = "stream::client",
        level = "debug",
        skip(credentials)
    )]
    pub fn connect(addr: &str, credentials: &Credentials) -> Result<Self, StreamError> {
        let invalid = |reason: String| StreamError::InvalidAddress {
            addr: addr.to_string(),
            reason,
        };

        let uri = endpoint_uri(addr)?;
        let domain = server_name(&uri).ok_or_else(|| invalid("missing host".to_string()))?;
        let tls_name =
            ServerName::try_from(domain.clone()).map_err(|e| invalid(format!("{e}")))?;
        let dial = dial_uri(&uri).map_err(invalid)?;

        tracing::debug!(
            endpoint = %uri,
            tls_server_name = %domain,
            client_subject = %credentials.subject(),
            "Creating lazy HTTP/2 channel to Goldmane"
        );

        // TLS is done by the connector, so tonic sees a plain endpoint.
        let connector = MtlsConnector::new(credentials.client_config(), tls_name);
        let channel = Endpoint::from(dial).connect_with_connector_lazy(connector);

        Ok(Self {
            client: FlowsClient::new(channel),
            uri,
        })
    }

    /// Endpoint the channel dials.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Open the `Flows/Stream` call with an empty request.
    #[instrument(
        name = "stream_client::open_stream",
        target = "stream::client",
        level = "debug",
        skip_all,
        fields(endpoint = %self.uri)
    )]
    pub async fn open_stream(&mut self) -> Result<Streaming<FlowResult>, StreamError> {
        let response = self
            .client
            .stream(FlowStreamRequest::default())
            .await
            .map_err(StreamError::Open)?;

        tracing::info!("Flow stream opened");
        Ok(response.into_inner())
    }
}

/// Turn a configured address into an `https` URI.
///
/// Addresses without a scheme are treated as `host:port`.
pub fn endpoint_uri(addr: &str) -> Result<Uri, StreamError> {
    let invalid = |reason: String| StreamError::InvalidAddress {
        addr: addr.to_string(),
        reason,
    };

    let raw = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("https://{addr}")
    };
    let uri: Uri = raw.parse().map_err(|e| invalid(format!("{e}")))?;

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some(other) => Err(invalid(format!("unsupported scheme {other:?}, expected https"))),
        None => Err(invalid("missing scheme".to_string())),
    }
}

/// `http://` form of an `https://` endpoint, dialed through [`MtlsConnector`].
fn dial_uri(uri: &Uri) -> Result<Uri, String> {
    let authority = uri
        .authority()
        .ok_or_else(|| "missing host".to_string())?
        .clone();

    Uri::builder()
        .scheme("http")
        .authority(authority)
        .path_and_query("/")
        .build()
        .map_err(|e| format!("{e}"))
}

/// Host part of the URI, without IPv6 brackets.
fn server_name(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}
