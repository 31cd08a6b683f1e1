use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] moodlog_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No entry text provided")]
    EmptyContent,
    #[error("Edited entry text cannot be empty")]
    EmptyEditedContent,
    #[error("Entry ID cannot be empty")]
    EmptyEntryId,
    #[error("Entry not found for id/prefix: {0}")]
    EntryNotFound(String),
    #[error("{0}")]
    AmbiguousEntryId(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Not signed in. Run `moodlog auth login` first.")]
    NotSignedIn,
    #[error("Sync is not configured. Set MOODLOG_API_URL to enable `moodlog sync`.")]
    SyncNotConfigured,
    #[error("Sync finished with {0} error(s)")]
    SyncFailed(usize),
}

impl From<moodlog_core::auth::AuthError> for CliError {
    fn from(error: moodlog_core::auth::AuthError) -> Self {
        Self::Auth(error.to_string())
    }
}
