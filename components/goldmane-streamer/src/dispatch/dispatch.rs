// Local crates
use crate::stream::client::{FlowSource, StreamError};

// External crates
use serde::Deserialize;
use std::convert::Infallible;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;

/// What to do with a record that cannot be encoded as JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeErrorPolicy {
    /// Log the failure, drop the record and keep streaming.
    #[default]
    Skip,
    /// Treat the failure as fatal.
    Fail,
}

/// Dispatch loop error handling
/// - Every variant is terminal for the loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("receive failed: {0}")]
    Receive(#[from] StreamError),
    #[error("failed to encode flow as JSON: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write flow to log sink: {0}")]
    Write(#[source] io::Error),
}

/// Records handled by the loop so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Lines written to the sink.
    pub written: u64,
    /// Records dropped under [`EncodeErrorPolicy::Skip`].
    pub skipped: u64,
}

/// Receive -> encode -> write loop over one flow source and one sink.
///
/// Each record is written and flushed before the next one is requested;
/// nothing is buffered between records.
#[derive(Debug)]
pub struct Dispatcher<S, W> {
    source: S,
    sink: W,
    policy: EncodeErrorPolicy,
    stats: DispatchStats,
}

impl<S, W> Dispatcher<S, W>
where
    S: FlowSource,
    W: AsyncWrite + Unpin,
{
    /// Create a dispatcher that owns `source` and `sink`.
    pub fn new(source: S, sink: W, policy: EncodeErrorPolicy) -> Self {
        Self {
            source,
            sink,
            policy,
            stats: DispatchStats::default(),
        }
    }

    /// Run until the first fatal error.
    ///
    /// The loop has no successful exit: end of stream is reported as
    /// [`StreamError::Closed`].
    #[instrument(
        name = "dispatch::run",
        target = "dispatch::dispatch",
        skip_all,
        fields(policy = ?self.policy),
        level = "debug"
    )]
    pub async fn run(&mut self) -> Result<Infallible, DispatchError> {
        tracing::debug!("Entering flow dispatch loop");
        loop {
            let record = self.source.next_record().await?;
            self.dispatch_one(&record).await?;
        }
    }

    /// Encode one record and write it as a single line.
    async fn dispatch_one(&mut self, record: &S::Record) -> Result<(), DispatchError> {
        let mut line = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => match self.policy {
                EncodeErrorPolicy::Skip => {
                    self.stats.skipped += 1;
                    tracing::warn!(
                        error = %e,
                        skipped = self.stats.skipped,
                        "Skipping flow that could not be encoded as JSON"
                    );
                    return Ok(());
                }
                EncodeErrorPolicy::Fail => return Err(DispatchError::Encode(e)),
            },
        };
        line.push('\n');

        self.sink
            .write_all(line.as_bytes())
            .await
            .map_err(DispatchError::Write)?;
        self.sink.flush().await.map_err(DispatchError::Write)?;

        self.stats.written += 1;
        tracing::trace!(written = self.stats.written, bytes = line.len(), "Flow written");
        Ok(())
    }

    /// Counts of written and skipped records.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Release the sink so the caller can close it.
    pub fn into_sink(self) -> W {
        self.sink
    }
}
