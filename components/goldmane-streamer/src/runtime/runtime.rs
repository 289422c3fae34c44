// Local crates
use crate::{
    credentials::credentials::{CredentialError, Credentials},
    dispatch::dispatch::{DispatchError, Dispatcher, EncodeErrorPolicy},
    helpers::{
        load_config::Settings,
        log_sink::{LogSink, LogSinkError},
    },
    stream::client::{FlowStreamClient, StreamError, endpoint_uri},
};

// External crates
use config::ConfigError;
use std::convert::Infallible;
use std::io;
use tracing::instrument;

/// Fatal streamer errors, one variant per pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum StreamerError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("log sink: {0}")]
    LogSink(#[from] LogSinkError),
    #[error("connect: {0}")]
    Connect(#[source] StreamError),
    #[error("open stream: {0}")]
    OpenStream(#[source] StreamError),
    #[error("receive: {0}")]
    Receive(#[source] StreamError),
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("write: {0}")]
    Write(#[source] io::Error),
}

impl StreamerError {
    /// Name of the failing stage, used as the diagnostic prefix.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            StreamerError::Config(_) => "config",
            StreamerError::Credentials(_) => "credentials",
            StreamerError::LogSink(_) => "log sink",
            StreamerError::Connect(_) => "connect",
            StreamerError::OpenStream(_) => "open stream",
            StreamerError::Receive(_) => "receive",
            StreamerError::Encode(_) => "encode",
            StreamerError::Write(_) => "write",
        }
    }
}

impl From<DispatchError> for StreamerError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Receive(e) => StreamerError::Receive(e),
            DispatchError::Encode(e) => StreamerError::Encode(e),
            DispatchError::Write(e) => StreamerError::Write(e),
        }
    }
}

/// Streamer runtime: credentials, one lazy connection, one stream, the
/// dispatch loop. Only returns on a fatal error.
///
/// Startup order:
/// 1. Load and validate the mTLS credentials (no network).
/// 2. Configure the lazy channel.
/// 3. Open the log sink.
/// 4. Open the stream and dispatch until the first failure.
///
/// A file-backed sink is flushed and closed before the error is returned.
#[instrument(
    name = "goldmane_streamer::run",
    target = "runtime::runtime",
    skip_all,
    fields(server = %settings.server_addr, log = %settings.log_path),
    level = "info"
)]
pub async fn run_streamer(settings: &Settings) -> Result<Infallible, StreamerError> {
    let credentials =
        Credentials::load(&settings.ca_path, &settings.cert_path, &settings.key_path).await?;
    let mut client = FlowStreamClient::connect(&settings.server_addr, &credentials)
        .map_err(StreamerError::Connect)?;
    let sink = LogSink::open(&settings.log_path).await?;

    tracing::info!(
        endpoint = %client.uri(),
        sink = %sink,
        encode_errors = ?settings.encode_errors,
        "goldmane-streamer started"
    );

    let (err, sink) = stream_flows(&mut client, sink, settings.encode_errors).await;

    let sink_name = sink.to_string();
    if let Err(close_err) = sink.close().await {
        tracing::warn!(error = %close_err, sink = %sink_name, "Failed to close log sink");
    }

    Err(err)
}

/// Open the stream and dispatch into `sink`, handing the sink back with the
/// error that ended the loop.
async fn stream_flows(
    client: &mut FlowStreamClient,
    sink: LogSink,
    policy: EncodeErrorPolicy,
) -> (StreamerError, LogSink) {
    let stream = match client.open_stream().await {
        Ok(stream) => stream,
        Err(e) => return (StreamerError::OpenStream(e), sink),
    };

    let mut dispatcher = Dispatcher::new(stream, sink, policy);
    let Err(err) = dispatcher.run().await;

    let stats = dispatcher.stats();
    tracing::info!(
        written = stats.written,
        skipped = stats.skipped,
        "Flow dispatch loop stopped"
    );

    (err.into(), dispatcher.into_sink())
}

/// Check settings and credentials without touching the network.
#[instrument(
    name = "goldmane_streamer::validate",
    target = "runtime::runtime",
    skip_all,
    level = "debug"
)]
pub async fn validate_streamer(settings: &Settings) -> Result<Credentials, StreamerError> {
    endpoint_uri(&settings.server_addr).map_err(StreamerError::Connect)?;
    let credentials =
        Credentials::load(&settings.ca_path, &settings.cert_path, &settings.key_path).await?;
    Ok(credentials)
}
