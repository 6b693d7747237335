//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr; file output is rotated daily and can be
//! switched to JSON. Thread names are recorded in the file layer because
//! notification aggregation runs on its own named worker thread.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{VxError, VxResult};

/// Log file name prefix inside the log directory.
const LOG_FILE_NAME: &str = "vector-push.log";

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Build an env filter, falling back to `info` on an unparsable directive.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// * `level` - filter directive ("info", "vx_services=debug", ...)
/// * `log_dir` - directory receiving the daily-rotated log file
/// * `json_output` - JSON lines in the file instead of plain text
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> VxResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_NAME));

    let console_layer = fmt::layer().with_target(true).compact();

    let result = if json_output {
        tracing_subscriber::registry()
            .with(filter_for(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter_for(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    };
    result.map_err(|e| VxError::Config(format!("logging already initialized: {e}")))?;

    tracing::info!("logging initialized at level={level}, dir={}", log_dir.display());

    Ok(LogGuard { _guard: guard })
}

/// Initialize logging from the `[logging]` config section.
///
/// An empty `directory` falls back to `default_dir`.
pub fn init_from_config(config: &LoggingConfig, default_dir: &Path) -> VxResult<LogGuard> {
    let dir = if config.directory.is_empty() {
        default_dir.to_path_buf()
    } else {
        Path::new(&config.directory).to_path_buf()
    };
    init_logging(&config.level, &dir, config.json_output)
}

/// Initialize a minimal console-only logger for tests or one-shot CLI runs.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(level))
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}
