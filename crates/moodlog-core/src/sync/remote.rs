//! Remote mirror contract.

use thiserror::Error;

use super::protocol::{
    AttachmentFingerprint, DeleteOutcome, DeleteRequest, EntryChange, RemoteAttachment,
    RemoteRow, RowDecodeError, WriteOutcome,
};
use crate::auth::AuthSession;
use crate::models::{SyncCursor, SyncId};

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection, timeout or other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// The mirror refused this record (constraint violation and similar).
    #[error("record {key} rejected: {message}")]
    Rejected { key: String, message: String },
    /// The response as a whole could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    /// Failures scoped to one record; the rest of the batch can proceed.
    #[must_use]
    pub const fn is_record_level(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Rows changed since a cursor plus the mirror's own clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledChanges {
    /// Mirror clock at query time; becomes the next cursor
    pub server_time: Option<SyncCursor>,
    pub rows: Vec<Result<RemoteRow, RowDecodeError>>,
}

/// Authenticated per-account row store.
///
/// Implementations must apply the last-write-wins comparison atomically per
/// row at write time; the engine relies on it when two devices push at once.
#[allow(async_fn_in_trait)]
pub trait RemoteMirror {
    /// Current rows (live or tombstoned) for the given keys.
    async fn lookup(&self, session: &AuthSession, keys: &[SyncId]) -> RemoteResult<Vec<RemoteRow>>;

    async fn upsert(&self, session: &AuthSession, change: &EntryChange) -> RemoteResult<WriteOutcome>;

    async fn delete(
        &self,
        session: &AuthSession,
        request: &DeleteRequest,
    ) -> RemoteResult<DeleteOutcome>;

    /// Rows changed after `since`, tombstones included. `None` returns every
    /// live row.
    async fn pull(
        &self,
        session: &AuthSession,
        since: Option<SyncCursor>,
    ) -> RemoteResult<PulledChanges>;

    async fn find_attachment(
        &self,
        session: &AuthSession,
        fingerprint: &AttachmentFingerprint,
    ) -> RemoteResult<Option<RemoteAttachment>>;

    async fn insert_attachment(
        &self,
        session: &AuthSession,
        record: &RemoteAttachment,
    ) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_are_record_level() {
        assert!(RemoteError::Rejected {
            key: "k".to_string(),
            message: "constraint".to_string(),
        }
        .is_record_level());
        assert!(!RemoteError::Transport("timeout".to_string()).is_record_level());
        assert!(!RemoteError::Api {
            status: 500,
            message: "boom".to_string(),
        }
        .is_record_level());
    }
}
