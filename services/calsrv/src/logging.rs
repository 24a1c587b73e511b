//! Logging bootstrap for the calsrv binary

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{CalSrvError, Result};

/// Log file prefix inside the log directory
const LOG_FILE_NAME: &str = "calsrv.log";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Console output goes to
/// stderr so command results on stdout stay machine-readable. File output is
/// rotated daily; keep the returned guard alive until exit so buffered lines are
/// flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let console = config.console.then(|| {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        if config.json {
            layer.json().with_filter(filter()).boxed()
        } else {
            layer.with_filter(filter()).boxed()
        }
    });

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            let layer = if config.json {
                layer.json().with_filter(filter()).boxed()
            } else {
                layer.with_filter(filter()).boxed()
            };
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| CalSrvError::config(format!("Failed to initialize logging: {e}")))?;

    tracing::debug!(level = %config.level, "Logging initialized");
    Ok(guard)
}
