//! # refinery-logging
//!
//! Logging for the refinery critique-refine loop.
//!
//! ## Key Types
//!
//! - [`LogEvent`] - Structured loop events
//! - [`EventSink`] - Where the engine sends events ([`Logger`], [`MemorySink`], [`NullSink`])
//! - [`RunLogWriter`] - Persists finished run records as JSON lines
//! - [`Redactor`] - Key and pattern based scrubbing of run records
//!
//! ## Log Formats
//!
//! - `Pretty` - Human-readable colored output
//! - `JSON` - Structured JSON lines
//! - `Compact` - Minimal text output

mod events;
mod redact;
mod run_log;

pub use events::{EventSink, LogEvent, LogFormat, Logger, MemorySink, NullSink};
pub use redact::Redactor;
pub use run_log::RunLogWriter;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application.
///
/// Diagnostics go to stderr. With a log directory, a daily rolling JSON file
/// is written as well; keep the returned guard alive until exit so it flushes.
pub fn init_tracing(level: &str, format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "refinery.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty | LogFormat::Compact => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }

    guard
}
