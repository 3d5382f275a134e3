//! Tracing subscriber installation.

use crate::config::LoggingConfig;
use crate::errors::PhasegateError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.filter` when set. Output goes to stderr,
/// either compact text or JSON lines. Returns `Ok(false)` when a global
/// subscriber is already installed, so repeated calls are harmless.
///
/// # Errors
///
/// Returns [`PhasegateError::Config`] if the configured filter directive does
/// not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, PhasegateError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| {
            PhasegateError::Config(format!("invalid log filter '{}': {err}", config.filter))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init()
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LoggingConfig::default().with_filter("phasegate=debug");
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config).unwrap());
    }
}
