//! Gateway configuration.

use std::str::FromStr;
use std::time::Duration;

use simplebank_common::constants;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable lines.
    Plain,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "pretty" | "text" => Ok(LogFormat::Plain),
            other => Err(format!("Unknown log format: {other}")),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. The in-memory store is used when unset.
    pub url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
    /// Row-lock wait limit applied to every transaction.
    pub lock_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            lock_timeout: constants::default_lock_timeout(),
        }
    }
}

/// Main gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Deadline for a single transfer, lock waits included.
    pub transfer_timeout: Duration,
    /// Log level, used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            transfer_timeout: constants::default_transfer_timeout(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unparseable values keep the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            if !url.is_empty() {
                config.database.url = Some(url);
            }
        }

        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.database.max_connections = max;
            }
        }

        if let Some(ms) = lookup("LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.database.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = lookup("TRANSFER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.transfer_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                config.log_format = format;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.transfer_timeout.is_zero() {
            return Err("Transfer timeout cannot be 0".to_string());
        }

        if self.database.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be 0".to_string());
        }

        if self.database.lock_timeout > self.transfer_timeout {
            return Err("Lock timeout cannot exceed transfer timeout".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/simplebank"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("TRANSFER_TIMEOUT_MS", "1000"),
            ("LOG_FORMAT", "plain"),
        ]));

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/simplebank")
        );
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.transfer_timeout, Duration::from_secs(1));
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "many"),
            ("LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = GatewayConfig::default();
        config.transfer_timeout = Duration::from_millis(100);
        config.database.lock_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
