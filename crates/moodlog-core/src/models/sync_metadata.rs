//! Persisted sync bookkeeping

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Watermark marking "remote changes already seen", in server milliseconds.
///
/// Rendered as an ISO-8601 string wherever it is persisted or sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncCursor(i64);

impl SyncCursor {
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(value.trim())
            .map_err(|error| Error::InvalidInput(format!("Invalid sync cursor {value:?}: {error}")))?;
        Ok(Self(parsed.timestamp_millis()))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl TryFrom<String> for SyncCursor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SyncCursor> for String {
    fn from(cursor: SyncCursor) -> Self {
        cursor.to_rfc3339()
    }
}

/// Engine-owned record read at the start of a run and overwritten at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Cursor of the last successful pull, `None` before the first sync.
    pub last_synced_at: Option<SyncCursor>,
    /// Local changes still waiting for the remote mirror (informational).
    pub pending_count: usize,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cursor_renders_iso_8601() {
        let cursor = SyncCursor::from_millis(1_700_000_000_123);
        assert_eq!(cursor.to_rfc3339(), "2023-11-14T22:13:20.123Z");
        assert_eq!(SyncCursor::parse("2023-11-14T22:13:20.123Z").unwrap(), cursor);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(SyncCursor::parse("yesterday").is_err());
    }

    #[test]
    fn metadata_json_shape() {
        let metadata = SyncMetadata {
            last_synced_at: Some(SyncCursor::from_millis(0)),
            pending_count: 2,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(
            json,
            r#"{"lastSyncedAt":"1970-01-01T00:00:00.000Z","pendingCount":2}"#
        );

        let empty: SyncMetadata =
            serde_json::from_str(r#"{"lastSyncedAt":null,"pendingCount":0}"#).unwrap();
        assert_eq!(empty, SyncMetadata::default());
    }
}
