//! Tracing setup shared by the sync binary.
//!
//! In `dev` logs are printed to stdout in a human-readable format. In `prod` logs are
//! emitted as JSON lines both to stdout and to a daily rolling file.

use std::path::Path;

use config::environment::Environment;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_log::log::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Directory where rolling log files are written in production.
const LOGS_DIR: &str = "logs";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),

    #[error("failed to install log bridge: {0}")]
    LogBridge(#[from] SetLoggerError),

    #[error("failed to install global tracing subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Keeps the non-blocking file writer alive; buffered log lines are flushed on drop.
#[must_use]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global tracing subscriber for `app_name`, using `APP_ENVIRONMENT`
/// to pick the output format.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    init_tracing_for(app_name, environment, Path::new(LOGS_DIR))
}

/// Same as [`init_tracing`] with an explicit environment and log directory.
pub fn init_tracing_for(
    app_name: &str,
    environment: Environment,
    logs_dir: &Path,
) -> Result<LogFlusher, TracingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = if environment.is_prod() {
        let appender = tracing_appender::rolling::daily(logs_dir, log_file_name(app_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);

        (Some(fmt::layer().json().with_writer(writer)), Some(guard))
    } else {
        (None, None)
    };

    let json_stdout_layer = environment.is_prod().then(|| fmt::layer().json());
    let pretty_stdout_layer = (!environment.is_prod()).then(fmt::layer);

    let subscriber = Registry::default()
        .with(filter)
        .with(json_stdout_layer)
        .with(pretty_stdout_layer)
        .with(file_layer);

    LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(LogFlusher { _guard: guard })
}

/// Returns the prefix of the rolling log files; the appender adds the date suffix.
fn log_file_name(app_name: &str) -> String {
    format!("{app_name}.log")
}
