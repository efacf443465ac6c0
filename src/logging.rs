//! Subscriber setup for hosts embedding the engine.

use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

pub const LOG_FILE_PREFIX: &str = "practice-scheduler.log";

/// SQL statement logging from the store driver is too chatty at `info`.
const STORE_DRIVER_DIRECTIVE: &str = "sqlx=warn";

/// Flushes buffered file output when dropped.
pub struct LogFileGuard {
    _guard: WorkerGuard,
}

/// Filter directives for `level`, falling back to `info` when unparsable. The store driver is
/// quieted unless `level` names it.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    let base = if level.is_empty() || EnvFilter::try_new(level).is_err() {
        "info"
    } else {
        level
    };
    if base.split(',').any(|d| d.trim_start().starts_with("sqlx")) {
        base.to_string()
    } else {
        format!("{base},{STORE_DRIVER_DIRECTIVE}")
    }
}

fn file_writer(dir: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stdout always, plus rolling files under `log_dir`.
/// Returns `None` when no file layer is active or a subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Option<LogFileGuard> {
    let directives = filter_directives(&config.level);
    let env_filter = EnvFilter::new(&directives);
    let stdout_layer = fmt::layer().with_target(true);

    let Some((writer, guard)) = config.log_dir.as_deref().and_then(file_writer) else {
        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()
            .is_ok();
        if installed {
            info!(filter = %directives, "Engine logging initialized");
        }
        return None;
    };

    let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        return None;
    }
    info!(
        filter = %directives,
        log_dir = ?config.log_dir,
        "Engine logging initialized"
    );
    Some(LogFileGuard { _guard: guard })
}
