//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Production** ([`init_production`]): JSON file layer (daily rotation) + console layer
//! - **CLI** ([`init_cli`]): console-only for `migrate` and `check-config`

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// Dropping it flushes pending log entries and closes the file, so `serve`
/// keeps it alive until shutdown.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialise logging for `serve`.
///
/// With `logs_dir` set, writes JSON logs to `{logs_dir}/leadflow.log.YYYY-MM-DD`
/// with daily rotation, plus human-readable output on stderr. Without it, only
/// stderr. Filtered by `RUST_LOG`, falling back to `default_level`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: Option<&Path>, default_level: &str) -> anyhow::Result<LoggingGuard> {
    let Some(logs_dir) = logs_dir else {
        tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(LoggingGuard { _guard: None });
    };

    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "leadflow.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(json_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard {
        _guard: Some(guard),
    })
}

/// Initialise console-only logging for one-shot subcommands.
pub fn init_cli(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}
