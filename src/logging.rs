//! Logging configuration
//!
//! Structured logs go to stdout and to a rolling `vm_balancer.log` in
//! the working directory, the only state the balancer persists.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "vm_balancer.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Directory holding the log file.
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("."),
        }
    }
}

impl LoggingConfig {
    /// Initialize the subscriber. The returned guard must be kept alive
    /// for the life of the process or buffered file output is lost.
    pub fn init(&self) -> Result<WorkerGuard, TryInitError> {
        let directives = self.level.to_lowercase();
        let filter =
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

        let file_appender = tracing_appender::rolling::never(&self.log_dir, LOG_FILE);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .try_init()?;

        tracing::debug!("Logging initialized - level: {}", directives);
        Ok(guard)
    }
}
