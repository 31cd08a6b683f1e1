//! Entry repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use chrono::NaiveDate;
use libsql::{params, Connection, Row};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{
    next_updated_at, Attachment, AttachmentId, AttachmentKind, Entry, EntryContent, Mood,
    PendingDelete, SyncId,
};

const ENTRY_COLUMNS: &str = "local_id, sync_id, entry_date, text, mood, tags, is_private, \
     ai_mood, ai_tags, title, created_at, updated_at, sync_updated_at";

const ATTACHMENT_COLUMNS: &str = "a.id, a.entry_id, a.kind, a.mime_type, a.size_bytes, \
     a.local_path, a.thumbnail_path, a.thumbnail_size_bytes, a.created_at";

/// Trait for entry storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntryRepository {
    /// Create a new entry
    async fn create(&self, content: EntryContent) -> Result<Entry>;

    /// Get an entry by sync ID
    async fn get(&self, id: &SyncId) -> Result<Option<Entry>>;

    /// List entries, newest day first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Entry>>;

    /// Read every entry
    async fn list_all(&self) -> Result<Vec<Entry>>;

    /// Replace an entry's content, bumping `updated_at`
    async fn update(&self, id: &SyncId, content: EntryContent) -> Result<Entry>;

    /// Delete an entry and queue a tombstone for sync
    async fn delete(&self, id: &SyncId) -> Result<PendingDelete>;

    /// Entries modified since their last confirmed push
    async fn list_dirty(&self) -> Result<Vec<Entry>>;

    /// Record a confirmed push. No-op if the entry changed since `updated_at`.
    async fn mark_pushed(&self, id: &SyncId, updated_at: i64) -> Result<bool>;

    /// Insert or overwrite an entry with remote content, keeping its timestamps
    async fn apply_remote(&self, entry: &Entry) -> Result<()>;

    /// Hard delete without queueing a tombstone
    async fn remove(&self, id: &SyncId) -> Result<bool>;

    /// Tombstones waiting for remote acknowledgement
    async fn list_pending_deletes(&self) -> Result<Vec<PendingDelete>>;

    /// Tombstone for a single entry, if queued
    async fn get_pending_delete(&self, id: &SyncId) -> Result<Option<PendingDelete>>;

    /// Drop an acknowledged tombstone
    async fn purge_pending_delete(&self, id: &SyncId) -> Result<()>;

    /// Sync IDs starting with `prefix`
    async fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Store attachment metadata for an existing entry
    async fn add_attachment(&self, attachment: &Attachment) -> Result<()>;

    /// Attachments of one entry
    async fn list_attachments(&self, entry_id: &SyncId) -> Result<Vec<Attachment>>;

    /// Attachments whose entry has reached the remote mirror at least once
    async fn list_syncable_attachments(&self) -> Result<Vec<Attachment>>;
}

/// libSQL implementation of `EntryRepository`
pub struct LibSqlEntryRepository<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
}

impl<'a> LibSqlEntryRepository<'a> {
    /// Create a new repository with the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            clock: &SystemClock,
        }
    }

    /// Create a repository that stamps mutations with `clock`
    pub fn with_clock(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self { conn, clock }
    }

    async fn query_entries(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Entry>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn query_attachments(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Attachment>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut attachments = Vec::new();
        while let Some(row) = rows.next().await? {
            attachments.push(parse_attachment(&row)?);
        }
        Ok(attachments)
    }

    async fn write_entry(&self, entry: &Entry) -> Result<()> {
        let content = &entry.content;
        self.conn
            .execute(
                "INSERT INTO entries (
                    sync_id, entry_date, text, mood, tags, is_private, ai_mood, ai_tags,
                    title, created_at, updated_at, sync_updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(sync_id) DO UPDATE SET
                    entry_date = excluded.entry_date,
                    text = excluded.text,
                    mood = excluded.mood,
                    tags = excluded.tags,
                    is_private = excluded.is_private,
                    ai_mood = excluded.ai_mood,
                    ai_tags = excluded.ai_tags,
                    title = excluded.title,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    sync_updated_at = excluded.sync_updated_at",
                params![
                    entry.sync_id.as_str(),
                    content.date.to_string(),
                    content.text.clone(),
                    i64::from(content.mood.value()),
                    serde_json::to_string(&content.tags)?,
                    i64::from(content.is_private),
                    content.ai_mood.map(|mood| i64::from(mood.value())),
                    serde_json::to_string(&content.ai_tags)?,
                    content.title.clone(),
                    entry.created_at,
                    entry.updated_at,
                    entry.sync_updated_at
                ],
            )
            .await?;
        Ok(())
    }
}

impl EntryRepository for LibSqlEntryRepository<'_> {
    async fn create(&self, mut content: EntryContent) -> Result<Entry> {
        content.normalize();
        if content.text.trim().is_empty() {
            return Err(Error::InvalidInput("Entry text cannot be empty".into()));
        }

        let now = self.clock.now_millis();
        let mut entry = Entry {
            local_id: 0,
            sync_id: SyncId::new(),
            content,
            created_at: now,
            updated_at: now,
            sync_updated_at: 0,
        };
        self.write_entry(&entry).await?;
        entry.local_id = self.conn.last_insert_rowid();
        Ok(entry)
    }

    async fn get(&self, id: &SyncId) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE sync_id = ?1");
        let mut entries = self.query_entries(&sql, params![id.as_str()]).await?;
        Ok(entries.pop())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             ORDER BY entry_date DESC, updated_at DESC
             LIMIT ?1 OFFSET ?2"
        );
        self.query_entries(&sql, params![limit as i64, offset as i64])
            .await
    }

    async fn list_all(&self) -> Result<Vec<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries ORDER BY local_id ASC");
        self.query_entries(&sql, ()).await
    }

    async fn update(&self, id: &SyncId, mut content: EntryContent) -> Result<Entry> {
        content.normalize();
        if content.text.trim().is_empty() {
            return Err(Error::InvalidInput("Entry text cannot be empty".into()));
        }

        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        entry.content = content;
        entry.updated_at = next_updated_at(entry.updated_at, self.clock.now_millis());
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    async fn delete(&self, id: &SyncId) -> Result<PendingDelete> {
        let entry = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let tombstone = PendingDelete {
            sync_id: entry.sync_id,
            deleted_at: next_updated_at(entry.updated_at, self.clock.now_millis()),
        };

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let statements = async {
            self.conn
                .execute("DELETE FROM entries WHERE sync_id = ?1", params![id.as_str()])
                .await?;
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO pending_deletes (sync_id, deleted_at) VALUES (?1, ?2)",
                    params![id.as_str(), tombstone.deleted_at],
                )
                .await?;
            self.conn.execute("COMMIT", ()).await?;
            Ok::<(), libsql::Error>(())
        };
        if let Err(e) = statements.await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(tombstone)
    }

    async fn list_dirty(&self) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE updated_at > sync_updated_at
             ORDER BY updated_at ASC"
        );
        self.query_entries(&sql, ()).await
    }

    async fn mark_pushed(&self, id: &SyncId, updated_at: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE entries SET sync_updated_at = ?1 WHERE sync_id = ?2 AND updated_at = ?1",
                params![updated_at, id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn apply_remote(&self, entry: &Entry) -> Result<()> {
        if entry.sync_updated_at > entry.updated_at {
            return Err(Error::InvalidInput(format!(
                "Entry {} would be pushed past its own updated_at",
                entry.sync_id
            )));
        }
        self.write_entry(entry).await
    }

    async fn remove(&self, id: &SyncId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM entries WHERE sync_id = ?1", params![id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn list_pending_deletes(&self) -> Result<Vec<PendingDelete>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sync_id, deleted_at FROM pending_deletes ORDER BY deleted_at ASC",
                (),
            )
            .await?;
        let mut tombstones = Vec::new();
        while let Some(row) = rows.next().await? {
            tombstones.push(parse_pending_delete(&row)?);
        }
        Ok(tombstones)
    }

    async fn get_pending_delete(&self, id: &SyncId) -> Result<Option<PendingDelete>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sync_id, deleted_at FROM pending_deletes WHERE sync_id = ?1",
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_pending_delete(&row)?)),
            None => Ok(None),
        }
    }

    async fn purge_pending_delete(&self, id: &SyncId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM pending_deletes WHERE sync_id = ?1",
                params![id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = self
            .conn
            .query(
                "SELECT sync_id FROM entries WHERE sync_id LIKE ?1 ORDER BY updated_at DESC LIMIT ?2",
                params![format!("{prefix}%"), limit as i64],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    async fn add_attachment(&self, attachment: &Attachment) -> Result<()> {
        if self.get(&attachment.entry_id).await?.is_none() {
            return Err(Error::NotFound(attachment.entry_id.to_string()));
        }

        self.conn
            .execute(
                "INSERT INTO attachments (
                    id, entry_id, kind, mime_type, size_bytes, local_path,
                    thumbnail_path, thumbnail_size_bytes, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    attachment.id.as_str(),
                    attachment.entry_id.as_str(),
                    attachment.kind.as_str(),
                    attachment.mime_type.clone(),
                    attachment.size_bytes,
                    attachment.local_path.to_string_lossy().into_owned(),
                    attachment
                        .thumbnail_path
                        .as_ref()
                        .map(|path| path.to_string_lossy().into_owned()),
                    attachment.thumbnail_size_bytes,
                    attachment.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_attachments(&self, entry_id: &SyncId) -> Result<Vec<Attachment>> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a
             WHERE a.entry_id = ?1
             ORDER BY a.created_at ASC"
        );
        self.query_attachments(&sql, params![entry_id.as_str()])
            .await
    }

    async fn list_syncable_attachments(&self) -> Result<Vec<Attachment>> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a
             JOIN entries e ON e.sync_id = a.entry_id
             WHERE e.sync_updated_at > 0
             ORDER BY a.created_at ASC"
        );
        self.query_attachments(&sql, ()).await
    }
}

/// Parse an entry from a database row selected with `ENTRY_COLUMNS`
fn parse_entry(row: &Row) -> Result<Entry> {
    let sync_id = parse_sync_id(&row.get::<String>(1)?)?;
    let date_raw: String = row.get(2)?;
    let date = date_raw
        .parse::<NaiveDate>()
        .map_err(|error| Error::CorruptRow(format!("Invalid entry_date {date_raw:?}: {error}")))?;
    let ai_mood = row
        .get::<Option<i64>>(7)?
        .map(Mood::try_from)
        .transpose()?;

    Ok(Entry {
        local_id: row.get(0)?,
        sync_id,
        content: EntryContent {
            date,
            text: row.get(3)?,
            mood: Mood::try_from(row.get::<i64>(4)?)?,
            tags: serde_json::from_str(&row.get::<String>(5)?)?,
            is_private: row.get::<i64>(6)? != 0,
            ai_mood,
            ai_tags: serde_json::from_str(&row.get::<String>(8)?)?,
            title: row.get(9)?,
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        sync_updated_at: row.get(12)?,
    })
}

fn parse_pending_delete(row: &Row) -> Result<PendingDelete> {
    Ok(PendingDelete {
        sync_id: parse_sync_id(&row.get::<String>(0)?)?,
        deleted_at: row.get(1)?,
    })
}

fn parse_attachment(row: &Row) -> Result<Attachment> {
    let id_raw: String = row.get(0)?;
    let id = id_raw
        .parse::<AttachmentId>()
        .map_err(|_| Error::CorruptRow(format!("Invalid attachment id {id_raw:?}")))?;

    Ok(Attachment {
        id,
        entry_id: parse_sync_id(&row.get::<String>(1)?)?,
        kind: row.get::<String>(2)?.parse::<AttachmentKind>()?,
        mime_type: row.get(3)?,
        size_bytes: row.get(4)?,
        local_path: row.get::<String>(5)?.into(),
        thumbnail_path: row.get::<Option<String>>(6)?.map(Into::into),
        thumbnail_size_bytes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn parse_sync_id(raw: &str) -> Result<SyncId> {
    raw.parse()
        .map_err(|_| Error::CorruptRow(format!("Invalid sync id {raw:?}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn content(text: &str) -> EntryContent {
        EntryContent::new(text, Mood::try_from(4_u8).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("Sunny walk #outside")).await.unwrap();
        assert!(entry.local_id > 0);
        assert_eq!(entry.sync_updated_at, 0);

        let fetched = repo.get(&entry.sync_id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert_eq!(fetched.content.tags, vec!["outside"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_rejects_empty_text() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());
        assert!(repo.create(content("   ")).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_bumps_updated_at_monotonically() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("before")).await.unwrap();
        let updated = repo.update(&entry.sync_id, content("after")).await.unwrap();
        assert!(updated.updated_at > entry.updated_at);
        assert_eq!(updated.local_id, entry.local_id);
        assert_eq!(updated.content.text, "after");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dirty_set_and_mark_pushed() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("dirty")).await.unwrap();
        assert_eq!(repo.list_dirty().await.unwrap().len(), 1);

        // Stale watermark must not clear the dirty flag.
        assert!(!repo.mark_pushed(&entry.sync_id, entry.updated_at - 1).await.unwrap());
        assert!(repo.mark_pushed(&entry.sync_id, entry.updated_at).await.unwrap());
        assert!(repo.list_dirty().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_queues_tombstone() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("to delete")).await.unwrap();
        let tombstone = repo.delete(&entry.sync_id).await.unwrap();

        assert!(tombstone.deleted_at > entry.updated_at);
        assert!(repo.get(&entry.sync_id).await.unwrap().is_none());
        assert_eq!(repo.list_pending_deletes().await.unwrap(), vec![tombstone]);

        repo.purge_pending_delete(&entry.sync_id).await.unwrap();
        assert!(repo.get_pending_delete(&entry.sync_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_remote_inserts_and_overwrites() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let mut incoming = Entry {
            local_id: 0,
            sync_id: SyncId::new(),
            content: content("from another device"),
            created_at: 10,
            updated_at: 20,
            sync_updated_at: 20,
        };
        repo.apply_remote(&incoming).await.unwrap();
        let stored = repo.get(&incoming.sync_id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, 20);
        assert!(!stored.is_dirty());

        incoming.content.text = "edited remotely".to_string();
        incoming.updated_at = 30;
        incoming.sync_updated_at = 30;
        repo.apply_remote(&incoming).await.unwrap();
        let stored_again = repo.get(&incoming.sync_id).await.unwrap().unwrap();
        assert_eq!(stored_again.local_id, stored.local_id);
        assert_eq!(stored_again.content.text, "edited remotely");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_syncable_attachments_require_pushed_entry() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("with photo")).await.unwrap();
        let attachment = Attachment::new(
            entry.sync_id,
            AttachmentKind::Photo,
            "image/png",
            3,
            "/tmp/photo.png",
        )
        .unwrap();
        repo.add_attachment(&attachment).await.unwrap();

        assert!(repo.list_syncable_attachments().await.unwrap().is_empty());
        repo.mark_pushed(&entry.sync_id, entry.updated_at).await.unwrap();
        assert_eq!(repo.list_syncable_attachments().await.unwrap(), vec![attachment]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_attachment_requires_existing_entry() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let orphan =
            Attachment::new(SyncId::new(), AttachmentKind::File, "text/plain", 1, "/tmp/a.txt")
                .unwrap();
        assert!(matches!(
            repo.add_attachment(&orphan).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prefix_lookup() {
        let db = setup().await;
        let repo = LibSqlEntryRepository::new(db.connection());

        let entry = repo.create(content("prefix me")).await.unwrap();
        let prefix: String = entry.sync_id.as_str().chars().take(8).collect();
        let ids = repo.list_ids_by_prefix(&prefix, 3).await.unwrap();
        assert_eq!(ids, vec![entry.sync_id.as_str()]);
    }
}
