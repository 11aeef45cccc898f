//! Subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{GnnError, Result};

/// Environment variable consulted before the level passed to
/// [`init_logging_from_env`].
pub const LOG_ENV: &str = "GNNPIPE_LOG";

/// Installs a stderr subscriber filtered by `level`, an `EnvFilter`
/// directive such as `info` or `gnnpipe::pipeline=debug`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| GnnError::InvalidConfig(format!("invalid log level: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| GnnError::InvalidArgument("logging already initialized".into()))
}

/// Like [`init_logging`], but `GNNPIPE_LOG` wins over `default_level`.
/// A second call is a no-op.
pub fn init_logging_from_env(default_level: &str) {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_owned());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
