//! goldmane-streamer: re-emits Calico Goldmane flows as JSON lines.

mod cli;
mod credentials;
mod dispatch;
mod helpers;
mod instrumentation;
mod proto;
mod runtime;
mod stream;

use anyhow::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Dropping the guard flushes buffered diagnostics, so it lives until exit.
    let _guard = instrumentation::tracing::init_tracing()?;
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    cli::cli::run().await
}
