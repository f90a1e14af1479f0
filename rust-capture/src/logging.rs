//! Logging setup with a reloadable filter.
//!
//! Console output always; a daily rolling file when a log directory is
//! configured. Timestamps use the host's local zone.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "rust_capture=info,sqlx=warn";

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "rust-capture.log";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber. Keep it alive for the process
/// lifetime so buffered file output is flushed on exit.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter directive, e.g. `rust_capture=debug,sqlx=warn`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::config(format!("invalid filter directive: {e}")))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("failed to reload filter: {e}")))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// [`DEFAULT_LOG_FILTER`].
pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingConfig> {
    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to set global default subscriber: {e}")))?;

    Ok(LoggingConfig {
        handle: filter_handle,
        log_dir: log_dir.map(Path::to_path_buf),
        _guard: guard,
    })
}
