//! Run summaries returned by the sync engine and the attachment uploader.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Push,
    Pull,
    Attachments,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Attachments => "attachments",
        })
    }
}

/// One problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    /// No usable session; nothing was touched.
    #[error("not signed in")]
    Authentication,
    /// Transport failure; the rest of the phase was skipped.
    #[error("{phase} failed: {message}")]
    Network { phase: SyncPhase, message: String },
    /// One record failed; the batch continued.
    #[error("{key}: {message}")]
    Record { key: String, message: String },
    /// A pulled row could not be decoded and was skipped.
    #[error("skipped undecodable row {}: {message}", .key.as_deref().unwrap_or("?"))]
    Decode { key: Option<String>, message: String },
    /// Local store failure.
    #[error("local store error: {message}")]
    Store { key: Option<String>, message: String },
}

impl SyncIssue {
    #[must_use]
    pub fn network(phase: SyncPhase, error: impl fmt::Display) -> Self {
        Self::Network {
            phase,
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn record(key: impl fmt::Display, error: impl fmt::Display) -> Self {
        Self::Record {
            key: key.to_string(),
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn store(key: Option<String>, error: impl fmt::Display) -> Self {
        Self::Store {
            key,
            message: error.to_string(),
        }
    }
}

/// Counters and problems from one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries whose local version reached the mirror
    pub uploaded: usize,
    /// Remote versions applied locally
    pub downloaded: usize,
    /// Tombstones the mirror stored plus remote deletes applied locally
    pub deleted: usize,
    pub errors: Vec<SyncIssue>,
}

impl SyncReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Nothing moved and nothing failed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.uploaded == 0 && self.downloaded == 0 && self.deleted == 0 && self.is_clean()
    }

    /// Errors rendered as plain strings.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// One-line summary such as `synced 4, 2 failed`.
    #[must_use]
    pub fn summary(&self) -> String {
        let synced = self.uploaded + self.downloaded + self.deleted;
        if self.errors.is_empty() {
            format!("synced {synced}")
        } else {
            format!("synced {synced}, {} failed", self.errors.len())
        }
    }
}

/// Counters and problems from one attachment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentReport {
    pub uploaded: usize,
    /// Payloads the mirror already had
    pub skipped: usize,
    pub errors: Vec<SyncIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_failures_only_when_present() {
        let mut report = SyncReport {
            uploaded: 3,
            downloaded: 1,
            ..SyncReport::default()
        };
        assert_eq!(report.summary(), "synced 4");

        report.errors.push(SyncIssue::record("abc", "rejected"));
        report
            .errors
            .push(SyncIssue::network(SyncPhase::Pull, "timeout"));
        assert_eq!(report.summary(), "synced 4, 2 failed");
        assert_eq!(
            report.error_messages(),
            vec!["abc: rejected".to_string(), "pull failed: timeout".to_string()]
        );
    }

    #[test]
    fn default_report_is_noop() {
        assert!(SyncReport::default().is_noop());
        assert!(!SyncReport {
            errors: vec![SyncIssue::Authentication],
            ..SyncReport::default()
        }
        .is_noop());
    }
}
