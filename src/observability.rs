//! Logging bootstrap
//!
//! `RUST_LOG` takes precedence over the configured filter.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_false() {
        let config = LogConfig {
            filter: "not a [valid filter".to_string(),
            format: LogFormat::Json,
        };
        // Another test may have installed a subscriber first; either way the
        // second call in this test must not succeed.
        let _ = init_tracing(&config);
        assert!(!init_tracing(&LogConfig::default()));
    }
}
