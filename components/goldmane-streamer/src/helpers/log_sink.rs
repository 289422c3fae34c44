//! Destination for the JSON lines written by the dispatch loop.
//!
//! The sink is either the process's standard output or a file opened in
//! append mode. Standard output is never closed by the sink; a file sink is
//! flushed and shut down by [`LogSink::close`], and closed on drop otherwise.

// Local crates
use crate::helpers::load_config::STDOUT_SENTINEL;

// External crates
use pin_project::pin_project;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::instrument;

/// Log sink error handling
#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writable sink for flow records.
#[pin_project(project = LogSinkProj)]
#[derive(Debug)]
pub enum LogSink {
    /// Process standard output.
    Stdout(#[pin] Stdout),
    /// Append-mode file handle.
    File {
        #[pin]
        file: File,
        path: PathBuf,
    },
}

impl LogSink {
    /// Resolve a log path into a sink.
    ///
    /// [`STDOUT_SENTINEL`] selects standard output. Any other value is opened
    /// for appending and created when absent; existing content is preserved.
    #[instrument(
        name = "log_sink::open",
        target = "helpers::log_sink",
        level = "debug"
    )]
    pub async fn open(log_path: &str) -> Result<Self, LogSinkError> {
        if log_path == STDOUT_SENTINEL {
            tracing::debug!("Writing flow records to standard output");
            return Ok(LogSink::Stdout(tokio::io::stdout()));
        }

        let path = PathBuf::from(log_path);
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o644);

        let file = options
            .open(&path)
            .await
            .map_err(|source| LogSinkError::Open {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(log_file = %path.display(), "Appending flow records to log file");
        Ok(LogSink::File { file, path })
    }

    /// Flush pending bytes and release the sink.
    ///
    /// Files are shut down; standard output is only flushed.
    pub async fn close(self) -> io::Result<()> {
        match self {
            LogSink::Stdout(mut out) => out.flush().await,
            LogSink::File { mut file, .. } => {
                file.flush().await?;
                file.shutdown().await
            }
        }
    }
}

impl fmt::Display for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSink::Stdout(_) => f.write_str("stdout"),
            LogSink::File { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

impl AsyncWrite for LogSink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LogSinkProj::Stdout(out) => out.poll_write(cx, buf),
            LogSinkProj::File { file, .. } => file.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LogSinkProj::Stdout(out) => out.poll_flush(cx),
            LogSinkProj::File { file, .. } => file.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LogSinkProj::Stdout(out) => out.poll_flush(cx),
            LogSinkProj::File { file, .. } => file.poll_shutdown(cx),
        }
    }
}
