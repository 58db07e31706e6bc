//! Desk configuration.

use std::time::Duration;

use fxdesk_common::constants;
use fxdesk_common::{Currency, DurationExt};

/// Main desk configuration.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    /// Currency every trade has on one leg; rates are quoted in it.
    pub base_currency: Currency,
    /// Default caller timeout for a submission.
    pub submission_timeout: Duration,
    /// Attempts per quote fan-out before giving up.
    pub fanout_max_attempts: u32,
    /// TTL of cached discount lookups.
    pub catalog_cache_ttl: Duration,
    /// TTL of cached limit lookups.
    pub limit_cache_ttl: Duration,
    /// Capacity of the cancellation notice channel.
    pub notification_buffer: usize,
    /// Log level.
    pub log_level: String,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::pen(),
            submission_timeout: constants::submission_timeout().as_std(),
            fanout_max_attempts: 3,
            catalog_cache_ttl: constants::catalog_cache_ttl().as_std(),
            limit_cache_ttl: constants::limit_cache_ttl().as_std(),
            notification_buffer: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl DeskConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unparseable values keep the
    /// default.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(code) = lookup("FXDESK_BASE_CURRENCY") {
            config.base_currency = Currency::new(code);
        }

        if let Some(timeout) = millis("FXDESK_SUBMISSION_TIMEOUT_MS") {
            config.submission_timeout = timeout;
        }

        if let Some(attempts) = lookup("FXDESK_FANOUT_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.trim().parse() {
                config.fanout_max_attempts = attempts;
            }
        }

        if let Some(ttl) = millis("FXDESK_CATALOG_CACHE_TTL_MS") {
            config.catalog_cache_ttl = ttl;
        }

        if let Some(ttl) = millis("FXDESK_LIMIT_CACHE_TTL_MS") {
            config.limit_cache_ttl = ttl;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_currency.code().is_empty() {
            return Err("Base currency cannot be empty".to_string());
        }

        if self.submission_timeout.is_zero() {
            return Err("Submission timeout cannot be 0".to_string());
        }

        if self.fanout_max_attempts == 0 {
            return Err("Fan-out attempts cannot be 0".to_string());
        }

        if self.notification_buffer == 0 {
            return Err("Notification buffer cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DeskConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_currency, Currency::pen());
        assert_eq!(config.submission_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FXDESK_BASE_CURRENCY", "usd"),
            ("FXDESK_SUBMISSION_TIMEOUT_MS", "250"),
            ("FXDESK_FANOUT_MAX_ATTEMPTS", "not-a-number"),
            ("FXDESK_LIMIT_CACHE_TTL_MS", "0"),
        ]);
        let config = DeskConfig::from_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.base_currency, Currency::usd());
        assert_eq!(config.submission_timeout, Duration::from_millis(250));
        assert_eq!(config.fanout_max_attempts, 3);
        assert_eq!(config.limit_cache_ttl, Duration::ZERO);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = DeskConfig::default();
        config.fanout_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = DeskConfig::default();
        config.submission_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
