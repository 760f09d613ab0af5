//! Logging setup with a reloadable filter.
//!
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Optional daily-rolling log file next to console output
//! - Log file retention cleanup (deletes logs older than 7 days)
//! - Local timezone timestamps

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "nerodia=info,nerodia_platforms=info";

/// Prefix of the daily log files.
const LOG_FILE_PREFIX: &str = "nerodia.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    fn new(handle: FilterHandle, log_dir: Option<PathBuf>) -> Self {
        Self { handle, log_dir }
    }

    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter, e.g. `"nerodia=debug,nerodia_platforms=warn"`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {e}")))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {e}")))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Start the daily log retention cleanup task. Does nothing without a log directory.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let Some(log_dir) = self.log_dir.clone() else {
            return;
        };

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    warn!(error = %e, "Failed to cleanup old logs");
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {}
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn detached(
        directive: &str,
    ) -> (
        Arc<Self>,
        reload::Layer<EnvFilter, tracing_subscriber::Registry>,
    ) {
        let (layer, handle) = reload::Layer::new(EnvFilter::new(directive));
        (Arc::new(Self::new(handle, None)), layer)
    }
}

/// Delete log files older than `retention_days`; returns how many were removed.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // nerodia.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Install the global subscriber.
///
/// Console output is always on; when `log_dir` is given a daily-rolling file is
/// written there too. Keep the returned guard alive for the app lifetime.
pub fn init_logging(
    log_dir: Option<&Path>,
) -> crate::Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {e}"))
        })?;

    let config = Arc::new(LoggingConfig::new(
        filter_handle,
        log_dir.map(Path::to_path_buf),
    ));

    Ok((config, guard))
}
