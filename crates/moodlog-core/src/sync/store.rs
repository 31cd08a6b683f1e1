//! Local storage contracts consumed by the sync engine.

use crate::error::Result;
use crate::models::{Attachment, Entry, PendingDelete, SyncId, SyncMetadata};

/// Device-local entry store as seen by the reconciliation engine.
///
/// Every operation is independent; the engine never wraps a whole run in one
/// transaction.
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Bulk read of every entry.
    async fn list_entries(&self) -> Result<Vec<Entry>>;

    async fn get_entry(&self, id: &SyncId) -> Result<Option<Entry>>;

    /// Entries with `updated_at > sync_updated_at`.
    async fn list_dirty_entries(&self) -> Result<Vec<Entry>>;

    /// Set `sync_updated_at = updated_at` if the entry still has that
    /// `updated_at`. Returns whether a row changed.
    async fn mark_pushed(&self, id: &SyncId, updated_at: i64) -> Result<bool>;

    /// Upsert an entry with the given timestamps.
    async fn apply_remote(&self, entry: &Entry) -> Result<()>;

    /// Hard delete without queueing a tombstone.
    async fn delete_entry(&self, id: &SyncId) -> Result<bool>;

    async fn list_pending_deletes(&self) -> Result<Vec<PendingDelete>>;

    async fn get_pending_delete(&self, id: &SyncId) -> Result<Option<PendingDelete>>;

    async fn purge_pending_delete(&self, id: &SyncId) -> Result<()>;

    /// Opt-in flag for syncing privacy-flagged entries.
    async fn sync_private_entries(&self) -> Result<bool>;

    /// Attachments whose owning entry has been pushed at least once.
    async fn list_syncable_attachments(&self) -> Result<Vec<Attachment>>;
}

/// Persisted `{cursor, pendingCount}` record plus the diagnostic device id.
#[allow(async_fn_in_trait)]
pub trait SyncMetadataStore {
    async fn load_sync_metadata(&self) -> Result<SyncMetadata>;

    async fn save_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()>;

    async fn device_id(&self) -> Result<String>;
}
