//! Settings and sync metadata repository implementation

use crate::error::Result;
use crate::models::{Settings, SyncMetadata};
use libsql::Connection;
use uuid::Uuid;

const KEY_SYNC_PRIVATE_ENTRIES: &str = "sync_private_entries";
const KEY_SYNC_METADATA: &str = "sync_metadata";
const KEY_DEVICE_ID: &str = "device_id";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<Settings>;

    /// Save settings to the database
    async fn save(&self, settings: &Settings) -> Result<()>;

    /// Load sync metadata, defaulting before the first sync
    async fn load_sync_metadata(&self) -> Result<SyncMetadata>;

    /// Overwrite sync metadata
    async fn save_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()>;

    /// Per-device random identifier, created on first use
    async fn device_id(&self) -> Result<String>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<Settings> {
        let mut settings = Settings::default();

        if let Some(value) = self.get_setting(KEY_SYNC_PRIVATE_ENTRIES).await? {
            settings.sync_private_entries = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        Ok(settings)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        self.set_setting(
            KEY_SYNC_PRIVATE_ENTRIES,
            if settings.sync_private_entries {
                "true"
            } else {
                "false"
            },
        )
        .await
    }

    async fn load_sync_metadata(&self) -> Result<SyncMetadata> {
        match self.get_setting(KEY_SYNC_METADATA).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SyncMetadata::default()),
        }
    }

    async fn save_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let raw = serde_json::to_string(metadata)?;
        self.set_setting(KEY_SYNC_METADATA, &raw).await
    }

    async fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.get_setting(KEY_DEVICE_ID).await? {
            return Ok(existing);
        }

        let device_id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)",
                [KEY_DEVICE_ID, device_id.as_str()],
            )
            .await?;
        // Another writer may have won the insert; return whatever is stored.
        Ok(self
            .get_setting(KEY_DEVICE_ID)
            .await?
            .unwrap_or(device_id))
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::SyncCursor;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let settings = repo.load().await.unwrap();
        assert!(!settings.sync_private_entries);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        repo.save(&Settings {
            sync_private_entries: true,
        })
        .await
        .unwrap();

        assert!(repo.load().await.unwrap().sync_private_entries);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_metadata_roundtrip() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        assert_eq!(repo.load_sync_metadata().await.unwrap(), SyncMetadata::default());

        let metadata = SyncMetadata {
            last_synced_at: Some(SyncCursor::from_millis(1_700_000_000_000)),
            pending_count: 3,
        };
        repo.save_sync_metadata(&metadata).await.unwrap();
        assert_eq!(repo.load_sync_metadata().await.unwrap(), metadata);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_device_id_is_stable() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let first = repo.device_id().await.unwrap();
        let second = repo.device_id().await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
