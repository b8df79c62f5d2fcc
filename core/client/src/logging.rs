//! Client logging: a daily rolling file under `~/.activetime/logs/` plus
//! warnings on stderr.
//!
//! The returned guard flushes the non-blocking file writer on drop and must
//! be held for the life of the process.

use std::env;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "activetime.log";
const DEBUG_ENV: &str = "ACTIVETIME_DEBUG_LOG";

pub fn default_log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".activetime").join("logs"))
}

/// Installs the global subscriber. Without a usable log directory only
/// stderr logging is set up and `None` is returned.
pub fn init() -> Option<WorkerGuard> {
    init_with_dir(default_log_dir())
}

pub fn init_with_dir(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let log_dir = log_dir.filter(|dir| fs_err::create_dir_all(dir).is_ok());
    let Some(log_dir) = log_dir else {
        let _ = tracing_subscriber::registry().with(stderr_layer()).try_init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(file_filter());

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer())
        .try_init();
    Some(guard)
}

fn stderr_layer<S>() -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN)
}

fn file_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
