use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Structured logging backed by `tracing`.
///
/// Installs one global subscriber: stdout plus a daily-rotated file sink.
/// The file writer is non-blocking; its guard is kept for the life of the
/// process so buffered lines are flushed on exit.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("querybridge")
        .join("logs")
}

fn build_file_appender(log_dir: &Path) -> Option<RollingFileAppender> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "[querybridge][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }
    Some(RollingFileAppender::new(Rotation::DAILY, log_dir, "querybridge.log"))
}

pub fn init_logging(cfg: &LoggingConfig) {
    INIT_LOGGING.call_once(|| {
        let log_dir = cfg.dir.clone().unwrap_or_else(default_log_dir);

        let file_layer = build_file_appender(&log_dir).map(|appender| {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking)
        });
        let has_file = file_layer.is_some();

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&cfg.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let stdout_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339());

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();

        if has_file {
            info!("Logging initialized; daily files under {}", log_dir.display());
        } else {
            warn!("Logging initialized without file sink (stdout only)");
        }
    });
}
