//! libSQL-backed mirror storage.
//!
//! Rows are kept per account as the JSON form of [`RemoteRow`] next to the
//! columns needed for comparison and change feeds. Every write reads the
//! current row, applies the shared last-write-wins decision and stores the
//! result under one lock, so concurrent devices never interleave on a key.

use std::sync::Arc;

use libsql::{params, Builder, Connection, Database};
use moodlog_core::clock::{Clock, SystemClock};
use moodlog_core::models::{AttachmentKind, SyncCursor, SyncId};
use moodlog_core::sync::protocol::{
    decide_delete, decide_upsert, next_server_time, AttachmentFingerprint, DeleteDecision,
    DeleteOutcome, DeleteRequest, EntryChange, RemoteAttachment, RemoteRow, UpsertDecision,
    WriteOutcome,
};
use tokio::sync::Mutex;

use crate::error::AppError;

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS mirror_rows (
        account_id TEXT NOT NULL,
        row_key TEXT NOT NULL,
        body TEXT NOT NULL,
        is_tombstone INTEGER NOT NULL,
        changed_at INTEGER NOT NULL,
        PRIMARY KEY (account_id, row_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_mirror_rows_changed
        ON mirror_rows(account_id, changed_at)",
    "CREATE TABLE IF NOT EXISTS mirror_attachments (
        account_id TEXT NOT NULL,
        entry_key TEXT NOT NULL,
        kind TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        object_key TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (account_id, entry_key, kind, size_bytes)
    )",
    "CREATE TABLE IF NOT EXISTS server_clock (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_server_time INTEGER NOT NULL
    )",
];

/// Rows changed after a cursor, plus the cursor to resume from.
#[derive(Debug)]
pub struct ChangeFeed {
    pub server_time: SyncCursor,
    pub rows: Vec<RemoteRow>,
}

pub struct MirrorStore {
    _db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl MirrorStore {
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        for statement in SCHEMA {
            conn.execute(statement, ()).await?;
        }
        conn.execute(
            "INSERT OR IGNORE INTO server_clock (id, last_server_time) VALUES (1, 0)",
            (),
        )
        .await?;

        Ok(Self {
            _db: db,
            conn,
            write_lock: Mutex::new(()),
            clock: Arc::new(SystemClock),
        })
    }

    pub async fn open_in_memory() -> Result<Self, AppError> {
        Self::open(":memory:").await
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn lookup(&self, account_id: &str, keys: &[SyncId]) -> Result<Vec<RemoteRow>, AppError> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.load_row(account_id, key).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub async fn upsert(&self, account_id: &str, change: &EntryChange) -> Result<WriteOutcome, AppError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.load_row(account_id, &change.key).await?;

        match decide_upsert(existing.as_ref(), change) {
            UpsertDecision::Write(row) => {
                let server_time = self.tick().await?;
                self.store_row(account_id, &row, server_time).await?;
                tracing::debug!(key = %change.key, server_time, "Stored entry version");
                Ok(WriteOutcome::Applied {
                    server_time: SyncCursor::from_millis(server_time),
                })
            }
            UpsertDecision::Unchanged => Ok(WriteOutcome::Applied {
                server_time: SyncCursor::from_millis(self.last_server_time().await?),
            }),
            UpsertDecision::Superseded(row) => Ok(WriteOutcome::Superseded { row }),
        }
    }

    pub async fn delete(&self, account_id: &str, request: &DeleteRequest) -> Result<DeleteOutcome, AppError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.load_row(account_id, &request.key).await?;

        match decide_delete(existing.as_ref(), request) {
            DeleteDecision::Write(row) => {
                let server_time = self.tick().await?;
                self.store_row(account_id, &row, server_time).await?;
                tracing::debug!(key = %request.key, server_time, "Stored tombstone");
                Ok(DeleteOutcome::Deleted {
                    server_time: SyncCursor::from_millis(server_time),
                })
            }
            DeleteDecision::Unchanged => Ok(DeleteOutcome::AlreadyDeleted {
                server_time: SyncCursor::from_millis(self.last_server_time().await?),
            }),
            DeleteDecision::Superseded(row) => Ok(DeleteOutcome::Superseded { row }),
        }
    }

    /// Rows changed after `since`, or every live row when `since` is `None`.
    pub async fn changes(&self, account_id: &str, since: Option<SyncCursor>) -> Result<ChangeFeed, AppError> {
        let _guard = self.write_lock.lock().await;
        let server_time = self.tick().await?;

        let mut result = match since {
            Some(cursor) => {
                self.conn
                    .query(
                        "SELECT body FROM mirror_rows
                         WHERE account_id = ?1 AND changed_at > ?2
                         ORDER BY changed_at ASC",
                        params![account_id, cursor.millis()],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT body FROM mirror_rows
                         WHERE account_id = ?1 AND is_tombstone = 0
                         ORDER BY changed_at ASC",
                        params![account_id],
                    )
                    .await?
            }
        };

        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            let body: String = row.get(0)?;
            rows.push(serde_json::from_str(&body)?);
        }

        Ok(ChangeFeed {
            server_time: SyncCursor::from_millis(server_time),
            rows,
        })
    }

    pub async fn find_attachment(
        &self,
        account_id: &str,
        fingerprint: &AttachmentFingerprint,
    ) -> Result<Option<RemoteAttachment>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT object_key, mime_type, created_at FROM mirror_attachments
                 WHERE account_id = ?1 AND entry_key = ?2 AND kind = ?3 AND size_bytes = ?4",
                params![
                    account_id,
                    fingerprint.entry_key.as_str(),
                    fingerprint.kind.as_str(),
                    fingerprint.size_bytes
                ],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(RemoteAttachment {
            entry_key: fingerprint.entry_key,
            kind: fingerprint.kind,
            size_bytes: fingerprint.size_bytes,
            object_key: row.get(0)?,
            mime_type: row.get(1)?,
            created_at: row.get(2)?,
        }))
    }

    /// Record uploaded attachment metadata. A second record with the same
    /// fingerprint is a conflict.
    pub async fn insert_attachment(&self, account_id: &str, record: &RemoteAttachment) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if self.find_attachment(account_id, &record.fingerprint()).await?.is_some() {
            return Err(AppError::conflict(format!(
                "attachment {} of entry {} already recorded",
                record.kind, record.entry_key
            )));
        }

        self.conn
            .execute(
                "INSERT INTO mirror_attachments (
                    account_id, entry_key, kind, size_bytes, object_key, mime_type, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    account_id,
                    record.entry_key.as_str(),
                    record.kind.as_str(),
                    record.size_bytes,
                    record.object_key.clone(),
                    record.mime_type.clone(),
                    record.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn load_row(&self, account_id: &str, key: &SyncId) -> Result<Option<RemoteRow>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM mirror_rows WHERE account_id = ?1 AND row_key = ?2",
                params![account_id, key.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let body: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn store_row(&self, account_id: &str, row: &RemoteRow, changed_at: i64) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT INTO mirror_rows (account_id, row_key, body, is_tombstone, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(account_id, row_key) DO UPDATE SET
                    body = excluded.body,
                    is_tombstone = excluded.is_tombstone,
                    changed_at = excluded.changed_at",
                params![
                    account_id,
                    row.key().as_str(),
                    serde_json::to_string(row)?,
                    i64::from(row.is_tombstone()),
                    changed_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn last_server_time(&self) -> Result<i64, AppError> {
        let mut rows = self
            .conn
            .query("SELECT last_server_time FROM server_clock WHERE id = 1", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    /// Advance and persist the server change counter. Callers hold the write lock.
    async fn tick(&self) -> Result<i64, AppError> {
        let server_time = next_server_time(self.last_server_time().await?, self.clock.now_millis());
        self.conn
            .execute(
                "UPDATE server_clock SET last_server_time = ?1 WHERE id = 1",
                params![server_time],
            )
            .await?;
        Ok(server_time)
    }
}

/// Parses the `kind` query parameter of an attachment lookup.
pub fn parse_kind(value: &str) -> Result<AttachmentKind, AppError> {
    value
        .parse::<AttachmentKind>()
        .map_err(|error| AppError::bad_request(error.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use moodlog_core::clock::ManualClock;
    use moodlog_core::models::Mood;
    use moodlog_core::sync::protocol::EntryPayload;
    use pretty_assertions::assert_eq;

    use super::*;

    async fn store(clock: &ManualClock) -> MirrorStore {
        MirrorStore::open_in_memory()
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    }

    fn change(key: SyncId, text: &str, updated_at: i64) -> EntryChange {
        EntryChange {
            key,
            payload: EntryPayload {
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                text: text.to_string(),
                mood: Mood::default(),
                tags: vec!["work".to_string()],
                is_private: false,
                ai_mood: None,
                ai_tags: Vec::new(),
                title: None,
                created_at: 10,
            },
            updated_at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_write_wins_and_older_is_superseded() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock).await;
        let key = SyncId::new();

        let applied = store.upsert("a", &change(key, "first", 100)).await.unwrap();
        assert!(matches!(applied, WriteOutcome::Applied { .. }));
        store.upsert("a", &change(key, "second", 200)).await.unwrap();

        match store.upsert("a", &change(key, "stale", 150)).await.unwrap() {
            WriteOutcome::Superseded { row } => assert_eq!(row.updated_at(), 200),
            other @ WriteOutcome::Applied { .. } => panic!("expected superseded, got {other:?}"),
        }
        let stored = store.lookup("a", &[key]).await.unwrap();
        assert_eq!(stored, vec![RemoteRow::from_change(&change(key, "second", 200))]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_time_is_strictly_increasing_with_a_frozen_clock() {
        let clock = ManualClock::new(5_000);
        let store = store(&clock).await;

        let first = store.changes("a", None).await.unwrap().server_time;
        let second = store.changes("a", None).await.unwrap().server_time;
        let WriteOutcome::Applied { server_time: third } =
            store.upsert("a", &change(SyncId::new(), "x", 1)).await.unwrap()
        else {
            panic!("expected applied");
        };

        assert_eq!(first.millis(), 5_000);
        assert_eq!(second.millis(), 5_001);
        assert_eq!(third.millis(), 5_002);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_rules() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock).await;
        let key = SyncId::new();

        let missing = store
            .delete("a", &DeleteRequest { key, deleted_at: 50 })
            .await
            .unwrap();
        assert!(matches!(missing, DeleteOutcome::Deleted { .. }));
        assert!(store.lookup("a", &[key]).await.unwrap()[0].is_tombstone());
        let repeated = store
            .delete("a", &DeleteRequest { key, deleted_at: 60 })
            .await
            .unwrap();
        assert!(matches!(repeated, DeleteOutcome::AlreadyDeleted { .. }));

        store.upsert("a", &change(key, "live", 100)).await.unwrap();
        let refused = store
            .delete("a", &DeleteRequest { key, deleted_at: 90 })
            .await
            .unwrap();
        assert!(matches!(refused, DeleteOutcome::Superseded { .. }));

        store
            .delete("a", &DeleteRequest { key, deleted_at: 120 })
            .await
            .unwrap();
        let rows = store.lookup("a", &[key]).await.unwrap();
        assert!(rows[0].is_tombstone());

        // An edit made after the delete resurrects the entry.
        store.upsert("a", &change(key, "back", 130)).await.unwrap();
        assert!(!store.lookup("a", &[key]).await.unwrap()[0].is_tombstone());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_feed_respects_cursor_and_hides_tombstones_on_bootstrap() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock).await;
        let kept = SyncId::new();
        let removed = SyncId::new();

        store.upsert("a", &change(kept, "kept", 100)).await.unwrap();
        store.upsert("a", &change(removed, "removed", 100)).await.unwrap();
        let cursor = store.changes("a", None).await.unwrap().server_time;
        store
            .delete("a", &DeleteRequest { key: removed, deleted_at: 200 })
            .await
            .unwrap();

        let bootstrap = store.changes("a", None).await.unwrap();
        assert_eq!(bootstrap.rows.len(), 1);
        assert_eq!(bootstrap.rows[0].key(), kept);

        let delta = store.changes("a", Some(cursor)).await.unwrap();
        assert_eq!(delta.rows.len(), 1);
        assert!(delta.rows[0].is_tombstone());
        assert!(delta.server_time > cursor);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accounts_do_not_see_each_other() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock).await;
        let key = SyncId::new();

        store.upsert("a", &change(key, "mine", 100)).await.unwrap();
        assert!(store.lookup("b", &[key]).await.unwrap().is_empty());
        assert!(store.changes("b", None).await.unwrap().rows.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attachment_fingerprint_is_unique() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock).await;
        let record = RemoteAttachment {
            entry_key: SyncId::new(),
            kind: AttachmentKind::Photo,
            size_bytes: 42,
            object_key: "entries/x/photo/1-a-pic.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            created_at: 7,
        };

        assert_eq!(store.find_attachment("a", &record.fingerprint()).await.unwrap(), None);
        store.insert_attachment("a", &record).await.unwrap();
        assert_eq!(
            store.find_attachment("a", &record.fingerprint()).await.unwrap(),
            Some(record.clone())
        );
        assert!(matches!(
            store.insert_attachment("a", &record).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(store.find_attachment("b", &record.fingerprint()).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        let path = path.to_string_lossy().to_string();
        let key = SyncId::new();

        let clock = ManualClock::new(1_000);
        let first = MirrorStore::open(&path)
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        first.upsert("a", &change(key, "durable", 100)).await.unwrap();
        drop(first);

        let reopened = MirrorStore::open(&path)
            .await
            .unwrap()
            .with_clock(Arc::new(clock));
        assert_eq!(reopened.lookup("a", &[key]).await.unwrap().len(), 1);
        // The change counter keeps increasing across restarts.
        assert_eq!(reopened.changes("a", None).await.unwrap().server_time.millis(), 1_001);
    }

    #[test]
    fn parse_kind_rejects_unknown() {
        assert_eq!(parse_kind("photo").unwrap(), AttachmentKind::Photo);
        assert!(matches!(parse_kind("sticker"), Err(AppError::BadRequest(_))));
    }
}
