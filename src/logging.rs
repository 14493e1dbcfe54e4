//! Logging initialization and structured logging utilities

use anyhow::Result;
use std::time::Instant;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber from the logging config. Returns
/// the appender guard, which must stay alive for file logging to flush.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let guard = match &config.file_path {
        Some(path) => {
            let directory = std::path::Path::new(path)
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "replyscout.log".to_string());

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            if config.format == "json" {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(non_blocking))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.format == "json" {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer())
                    .init();
            }
            None
        }
    };

    info!(level = %config.level, format = %config.format, "logging initialized");
    Ok(guard)
}

/// Wall-clock timer for a named operation, logged on finish
pub struct OperationTimer {
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }

    pub fn finish(self) {
        let elapsed_ms = self.started.elapsed().as_millis();
        tracing::event!(
            Level::INFO,
            operation = self.operation,
            elapsed_ms = elapsed_ms as u64,
            "operation finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_finish_does_not_panic() {
        let timer = OperationTimer::new("test_op");
        timer.finish();
    }
}
