//! Client sync configuration.
//!
//! Everything comes from the process environment (optionally seeded from a
//! `.env` file by the binary). Nothing here is secret except the R2 keys,
//! which [`R2Config`] redacts.

use std::time::Duration;

use crate::storage::R2Config;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const ENV_API_URL: &str = "MOODLOG_API_URL";
const ENV_SYNC_INTERVAL_SECS: &str = "MOODLOG_SYNC_INTERVAL_SECS";

/// Interval between scheduled sync runs when none is configured.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the remote mirror API, without a trailing slash
    pub api_base_url: Option<String>,
    pub sync_interval: Duration,
    /// Attachment content store; attachments are skipped without it
    pub r2: Option<R2Config>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            r2: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = parse_config(|key| std::env::var(key).ok())?;
        config.r2 = R2Config::from_env()?;
        Ok(config)
    }

    /// Whether a remote mirror is configured at all.
    #[must_use]
    pub const fn is_sync_enabled(&self) -> bool {
        self.api_base_url.is_some()
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncConfig> {
    let api_base_url = match normalize_text_option(lookup(ENV_API_URL)) {
        Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
        Some(_) => {
            return Err(Error::InvalidInput(format!(
                "{ENV_API_URL} must start with http:// or https://"
            )))
        }
        None => None,
    };

    let sync_interval = match normalize_text_option(lookup(ENV_SYNC_INTERVAL_SECS)) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{ENV_SYNC_INTERVAL_SECS} must be a positive number of seconds, got {raw:?}"
                )))
            }
        },
        None => DEFAULT_SYNC_INTERVAL,
    };

    Ok(SyncConfig {
        api_base_url,
        sync_interval,
        r2: None,
    })
}
