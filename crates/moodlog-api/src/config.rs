use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// libSQL file holding the mirrored rows; `:memory:` keeps them in RAM
    pub db_path: String,
    /// HS256 secret shared with the auth provider that signs access tokens
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: String,
    pub auth_clock_skew: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "MOODLOG_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "MOODLOG_API_DB_PATH", "moodlog-mirror.db");

        let jwt_secret = required_trimmed(&lookup, "MOODLOG_JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "MOODLOG_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let jwt_issuer = optional_trimmed(&lookup, "MOODLOG_JWT_ISSUER");
        let jwt_audience = value_or_default(&lookup, "MOODLOG_JWT_AUDIENCE", "authenticated");

        let auth_clock_skew_secs = value_or_default(&lookup, "MOODLOG_AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "MOODLOG_AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "MOODLOG_AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MOODLOG_JWT_SECRET"));
    }

    #[test]
    fn config_applies_defaults() {
        let mut map = HashMap::new();
        map.insert("MOODLOG_JWT_SECRET", "0123456789abcdef0123");
        map.insert("MOODLOG_JWT_ISSUER", "  ");

        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.jwt_issuer, None);
        assert_eq!(config.jwt_audience, "authenticated");
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
    }

    #[test]
    fn config_rejects_large_clock_skew() {
        let mut map = HashMap::new();
        map.insert("MOODLOG_JWT_SECRET", "0123456789abcdef0123");
        map.insert("MOODLOG_AUTH_CLOCK_SKEW_SECS", "900");
        assert!(
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).is_err()
        );
    }

    #[test]
    fn config_redacts_jwt_secret() {
        let mut map = HashMap::new();
        map.insert("MOODLOG_JWT_SECRET", "sensitive-jwt-secret-value");

        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-jwt-secret-value"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
