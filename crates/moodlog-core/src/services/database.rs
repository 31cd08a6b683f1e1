//! Shared database service wrapper used by the CLI and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::db::{
    Database, EntryRepository, LibSqlEntryRepository, LibSqlSettingsRepository,
    SettingsRepository,
};
use crate::models::{
    Attachment, Entry, EntryContent, PendingDelete, Settings, SyncId, SyncMetadata,
};
use crate::sync::{LocalStore, SyncMetadataStore};
use crate::Result;

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable ({}); moving it aside",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            clock: Arc::new(SystemClock),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// Stamp local mutations with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Filesystem path of the database, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("moodlog.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        // WAL and shared-memory sidecars belong to the moved file.
        for suffix in ["-wal", "-shm"] {
            let sidecar = parent.join(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale database sidecar {}", sidecar.display());
            }
        }

        Ok(())
    }

    /// List entries, newest day first.
    pub async fn list_entries_page(&self, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::new(db.connection());
        repo.list(limit, offset).await
    }

    /// Create a new entry.
    pub async fn create_entry(&self, content: EntryContent) -> Result<Entry> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::with_clock(db.connection(), self.clock.as_ref());
        let entry = repo.create(content).await?;
        tracing::debug!(sync_id = %entry.sync_id, "Created entry");
        Ok(entry)
    }

    /// Replace an entry's content.
    pub async fn update_entry(&self, id: &SyncId, content: EntryContent) -> Result<Entry> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::with_clock(db.connection(), self.clock.as_ref());
        repo.update(id, content).await
    }

    /// Delete an entry and queue its tombstone for the next sync.
    pub async fn delete_entry_with_tombstone(&self, id: &SyncId) -> Result<PendingDelete> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::with_clock(db.connection(), self.clock.as_ref());
        repo.delete(id).await
    }

    /// Sync IDs beginning with `prefix`, most recently edited first.
    pub async fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::new(db.connection());
        repo.list_ids_by_prefix(prefix, limit).await
    }

    /// Store attachment metadata.
    pub async fn add_attachment(&self, attachment: &Attachment) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::new(db.connection());
        repo.add_attachment(attachment).await
    }

    /// Attachments of one entry.
    pub async fn list_attachments(&self, entry_id: &SyncId) -> Result<Vec<Attachment>> {
        let db = self.db.lock().await;
        let repo = LibSqlEntryRepository::new(db.connection());
        repo.list_attachments(entry_id).await
    }

    /// Load settings.
    pub async fn load_settings(&self) -> Result<Settings> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.load().await
    }

    /// Save settings.
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.save(settings).await
    }
}

impl LocalStore for DatabaseService {
    async fn list_entries(&self) -> Result<Vec<Entry>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection()).list_all().await
    }

    async fn get_entry(&self, id: &SyncId) -> Result<Option<Entry>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection()).get(id).await
    }

    async fn list_dirty_entries(&self) -> Result<Vec<Entry>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection()).list_dirty().await
    }

    async fn mark_pushed(&self, id: &SyncId, updated_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .mark_pushed(id, updated_at)
            .await
    }

    async fn apply_remote(&self, entry: &Entry) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .apply_remote(entry)
            .await
    }

    async fn delete_entry(&self, id: &SyncId) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection()).remove(id).await
    }

    async fn list_pending_deletes(&self) -> Result<Vec<PendingDelete>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .list_pending_deletes()
            .await
    }

    async fn get_pending_delete(&self, id: &SyncId) -> Result<Option<PendingDelete>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .get_pending_delete(id)
            .await
    }

    async fn purge_pending_delete(&self, id: &SyncId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .purge_pending_delete(id)
            .await
    }

    async fn sync_private_entries(&self) -> Result<bool> {
        Ok(self.load_settings().await?.sync_private_entries)
    }

    async fn list_syncable_attachments(&self) -> Result<Vec<Attachment>> {
        let db = self.db.lock().await;
        LibSqlEntryRepository::new(db.connection())
            .list_syncable_attachments()
            .await
    }
}

impl SyncMetadataStore for DatabaseService {
    async fn load_sync_metadata(&self) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .load_sync_metadata()
            .await
    }

    async fn save_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .save_sync_metadata(metadata)
            .await
    }

    async fn device_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .device_id()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Mood;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_create_and_list_roundtrip() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        service
            .create_entry(EntryContent::new("hello core", Mood::default()))
            .await
            .unwrap();
        let entries = service.list_entries_page(10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content.text, "hello core");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_use_injected_clock() {
        let clock = ManualClock::new(5_000);
        let service = DatabaseService::open_in_memory()
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        let entry = service
            .create_entry(EntryContent::new("clocked", Mood::default()))
            .await
            .unwrap();
        assert_eq!(entry.updated_at, 5_000);

        clock.set(7_000);
        let updated = service
            .update_entry(&entry.sync_id, EntryContent::new("later", Mood::default()))
            .await
            .unwrap();
        assert_eq!(updated.updated_at, 7_000);

        clock.set(6_000);
        let tombstone = service
            .delete_entry_with_tombstone(&entry.sync_id)
            .await
            .unwrap();
        assert_eq!(tombstone.deleted_at, 7_001);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn private_sync_flag_reads_settings() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        assert!(!service.sync_private_entries().await.unwrap());

        service
            .save_settings(&Settings {
                sync_private_entries: true,
            })
            .await
            .unwrap();
        assert!(service.sync_private_entries().await.unwrap());
    }

    #[test]
    fn detects_corrupted_database_errors() {
        assert!(DatabaseService::is_corrupted_db_error(
            &crate::Error::CorruptRow("SQLite failure: file is not a database".to_string())
        ));
        assert!(!DatabaseService::is_corrupted_db_error(
            &crate::Error::InvalidInput("Entry text cannot be empty".to_string())
        ));
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let test_dir = tempfile::tempdir().unwrap();
        let db_path = test_dir.path().join("moodlog.db");
        let wal_path = test_dir.path().join("moodlog.db-wal");
        std::fs::write(&db_path, b"garbage").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();

        DatabaseService::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        let moved = std::fs::read_dir(test_dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("moodlog.db.corrupt-")
            });
        assert!(moved);
    }
}
