//! Tracing subscriber installation.

use std::io::{self, IsTerminal};

use kvbridge_core::{Error, Result};
use kvbridge_engine::EngineConfig;
use once_cell::sync::OnceCell;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

static LOGGING_GUARD: OnceCell<()> = OnceCell::new();

/// Install a stderr fmt subscriber filtered to `kvbridge` targets at `level`.
///
/// `RUST_LOG`, when set, takes precedence over `level`. Only the first call
/// installs anything; later calls, and calls made after another subscriber
/// was installed elsewhere, return `Ok(())`.
///
/// # Errors
///
/// `InvalidArgument` when the filter expression does not parse.
pub fn init(level: &str) -> Result<()> {
    LOGGING_GUARD.get_or_try_init(|| install(level)).map(|_| ())
}

/// [`init`] at the `log_level` of an engine configuration.
///
/// # Errors
///
/// `InvalidArgument` when `config` does not validate.
pub fn init_from_config(config: &EngineConfig) -> Result<()> {
    config.validate()?;
    init(&config.log_level)
}

fn install(level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(format!("kvbridge={}", level)),
    }
    .map_err(|e| Error::invalid_argument(format!("invalid log filter: {}", e)))?;

    let installed = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init();
    if installed.is_err() {
        tracing::debug!(target: "kvbridge::server", "a global subscriber is already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug").unwrap();
        init("warn").unwrap();
    }

    #[test]
    fn test_config_level_is_checked() {
        let config = EngineConfig {
            log_level: "loud".to_string(),
            ..EngineConfig::default()
        };
        let err = init_from_config(&config).unwrap_err();
        assert_eq!(err.kind(), kvbridge_core::ErrorKind::InvalidArgument);
        init_from_config(&EngineConfig::default()).unwrap();
    }
}
