//! Logging setup: stdout plus a daily-rolled file under the log directory.

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt as _;

pub const LOG_FILENAME: &str = "agent.log";

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to configure logger: {0}")]
    Configure(String),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: PathBuf,
}

/// Parse a configured level name. Unrecognized values fall back to debug.
fn level_filter(level: &str) -> (LevelFilter, bool) {
    match level {
        "debug" => (LevelFilter::DEBUG, true),
        "info" => (LevelFilter::INFO, true),
        "warn" => (LevelFilter::WARN, true),
        "error" => (LevelFilter::ERROR, true),
        _ => (LevelFilter::DEBUG, false),
    }
}

/// Install the global subscriber. The returned guard must be held for the
/// process lifetime or buffered file output is lost.
pub fn init(config: &LogConfig) -> Result<WorkerGuard, InitError> {
    let (filter, recognized) = level_filter(&config.level);

    std::fs::create_dir_all(&config.dir).map_err(|source| InitError::Io {
        path: config.dir.clone(),
        source,
    })?;
    let file_appender = tracing_appender::rolling::daily(&config.dir, LOG_FILENAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter.to_string()))
        .with_ansi(false)
        .with_writer(std::io::stdout.and(file_writer))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    if !recognized {
        tracing::warn!(level = %config.level, "invalid log level set in config, using debug");
    }
    Ok(guard)
}
