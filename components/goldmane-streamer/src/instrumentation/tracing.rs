//! Diagnostics setup.
//!
//! All diagnostics go to stderr through a non-blocking writer; stdout is
//! reserved for flow records. `RUST_LOG` sets the filter (default `info`) and
//! `LOG_FORMAT=json` switches to JSON output.

// External crates
use anyhow::{Context, Result};
use std::panic;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::{ErrorLayer, SpanTrace};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

const DEFAULT_FILTER: &str = "info";
const LOG_FORMAT_VAR: &str = "LOG_FORMAT";

/// Install the global subscriber.
///
/// The returned guard flushes buffered diagnostics when dropped and must be
/// held until the process exits.
pub fn init_tracing() -> Result<WorkerGuard> {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let fmt_layer = (!json).then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer.clone())
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking_writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    Ok(guard)
}

/// Route panics through `tracing`, with the active span trace attached.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Unknown panic");

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        let span_trace = SpanTrace::capture();

        error!(
            panic_message = %msg,
            location = %location,
            span_trace = %span_trace,
            "Application panicked!"
        );
    }));
}
