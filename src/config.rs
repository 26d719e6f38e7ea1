//! Runtime configuration
//!
//! Loaded from a TOML file or from `VIEWSTATS_*` environment variables.
//! Durations are expressed in milliseconds in both sources.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error loading configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Could not read the configuration file
    Io(std::io::Error),
    /// File is not valid TOML for this schema
    Toml(toml::de::Error),
    /// Values parsed but are not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Toml(e) => write!(f, "TOML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<LogFormat> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset (default: info)
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Configuration for the stats worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Interval between subscriber deliveries (default: 10s)
    #[serde(with = "duration_millis", rename = "report_interval_ms")]
    pub report_interval: Duration,
    /// Capacity of channels from `StatsHandle::subscriber_channel` (default: 64)
    pub subscriber_capacity: usize,
    pub log: LogConfig,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            report_interval: Duration::from_secs(10),
            subscriber_capacity: 64,
            log: LogConfig::default(),
        }
    }
}

impl StatsConfig {
    /// Load configuration from environment variables
    ///
    /// Unset, unparsable or zero variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = StatsConfig::default();
        StatsConfig {
            report_interval: std::env::var("VIEWSTATS_REPORT_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&ms: &u64| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.report_interval),
            subscriber_capacity: std::env::var("VIEWSTATS_SUBSCRIBER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.subscriber_capacity),
            log: LogConfig {
                filter: std::env::var("VIEWSTATS_LOG").unwrap_or(defaults.log.filter),
                format: std::env::var("VIEWSTATS_LOG_FORMAT")
                    .ok()
                    .and_then(|s| LogFormat::parse(&s))
                    .unwrap_or(defaults.log.format),
            },
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: StatsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "report_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid(
                "subscriber_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Tests touching process environment variables run one at a time.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = StatsConfig::default();
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.subscriber_capacity, 64);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = StatsConfig::from_toml_str(
            r#"
            report_interval_ms = 250

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.report_interval, Duration::from_millis(250));
        assert_eq!(config.subscriber_capacity, 64);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_toml_rejects_zero_interval() {
        assert!(matches!(
            StatsConfig::from_toml_str("report_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            StatsConfig::from_toml_str("report_interval_ms = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "subscriber_capacity = 8").unwrap();
        let config = StatsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.subscriber_capacity, 8);

        assert!(matches!(
            StatsConfig::from_file("/nonexistent/viewstats.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_LOCK.lock();
        std::env::set_var("VIEWSTATS_REPORT_INTERVAL_MS", "1500");
        std::env::set_var("VIEWSTATS_LOG_FORMAT", "JSON");
        let config = StatsConfig::from_env();
        assert_eq!(config.report_interval, Duration::from_millis(1500));
        assert_eq!(config.log.format, LogFormat::Json);
        std::env::remove_var("VIEWSTATS_REPORT_INTERVAL_MS");
        std::env::remove_var("VIEWSTATS_LOG_FORMAT");
    }

    #[test]
    fn test_from_env_zero_values_keep_defaults() {
        let _guard = ENV_LOCK.lock();
        std::env::set_var("VIEWSTATS_SUBSCRIBER_CAPACITY", "0");
        std::env::set_var("VIEWSTATS_REPORT_INTERVAL_MS", "0");
        let config = StatsConfig::from_env();
        std::env::remove_var("VIEWSTATS_SUBSCRIBER_CAPACITY");
        std::env::remove_var("VIEWSTATS_REPORT_INTERVAL_MS");

        assert_eq!(config.subscriber_capacity, 64);
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }
}
