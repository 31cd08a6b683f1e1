//! Error types for moodlog-core
//!
//! Sync-specific failures are not errors of this type: the engine reports
//! them as [`crate::sync::SyncIssue`] values and never fails a run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A stored row could not be turned back into a model
    #[error("Corrupt local row: {0}")]
    CorruptRow(String),

    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry or attachment not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected user input or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attachment content store failure
    #[error("Content store error: {0}")]
    Storage(String),
}
