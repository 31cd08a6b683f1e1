//! Wire messages exchanged with the remote mirror.
//!
//! Every message is an explicit type; pulled rows are decoded one at a time
//! so a malformed row can be skipped without losing the rest of the batch.
//! The per-row write decisions live here too, so the server and the
//! in-process mirror apply exactly the same last-write-wins rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{AttachmentKind, Entry, EntryContent, Mood, SyncCursor, SyncId};

/// Entry content as stored in a remote row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub date: NaiveDate,
    pub text: String,
    pub mood: Mood,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub ai_mood: Option<Mood>,
    #[serde(default)]
    pub ai_tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: i64,
}

impl EntryPayload {
    #[must_use]
    pub fn from_entry(entry: &Entry) -> Self {
        let content = entry.content.clone();
        Self {
            date: content.date,
            text: content.text,
            mood: content.mood,
            tags: content.tags,
            is_private: content.is_private,
            ai_mood: content.ai_mood,
            ai_tags: content.ai_tags,
            title: content.title,
            created_at: entry.created_at,
        }
    }

    /// Content fields, normalized the same way local edits are.
    #[must_use]
    pub fn content(&self) -> EntryContent {
        let mut content = EntryContent {
            date: self.date,
            text: self.text.clone(),
            mood: self.mood,
            tags: self.tags.clone(),
            is_private: self.is_private,
            ai_mood: self.ai_mood,
            ai_tags: self.ai_tags.clone(),
            title: self.title.clone(),
        };
        content.normalize();
        content
    }
}

/// One upsert sent by the push phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryChange {
    pub key: SyncId,
    pub payload: EntryPayload,
    pub updated_at: i64,
}

impl EntryChange {
    #[must_use]
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            key: entry.sync_id,
            payload: EntryPayload::from_entry(entry),
            updated_at: entry.updated_at,
        }
    }
}

/// One remote row, either live or soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteRow {
    Live {
        key: SyncId,
        payload: EntryPayload,
        updated_at: i64,
    },
    Tombstone {
        key: SyncId,
        updated_at: i64,
        deleted_at: i64,
    },
}

impl RemoteRow {
    #[must_use]
    pub const fn key(&self) -> SyncId {
        match self {
            Self::Live { key, .. } | Self::Tombstone { key, .. } => *key,
        }
    }

    #[must_use]
    pub const fn updated_at(&self) -> i64 {
        match self {
            Self::Live { updated_at, .. } | Self::Tombstone { updated_at, .. } => *updated_at,
        }
    }

    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }

    /// Live row carrying the given change.
    #[must_use]
    pub fn from_change(change: &EntryChange) -> Self {
        Self::Live {
            key: change.key,
            payload: change.payload.clone(),
            updated_at: change.updated_at,
        }
    }

    /// Local entry mirroring this row, fully pushed. `None` for tombstones.
    #[must_use]
    pub fn to_entry(&self, local_id: i64) -> Option<Entry> {
        match self {
            Self::Live {
                key,
                payload,
                updated_at,
            } => Some(Entry {
                local_id,
                sync_id: *key,
                content: payload.content(),
                created_at: payload.created_at,
                updated_at: *updated_at,
                sync_updated_at: *updated_at,
            }),
            Self::Tombstone { .. } => None,
        }
    }
}

/// Delete request for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: SyncId,
    pub deleted_at: i64,
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The mirror now holds the pushed version (or already did).
    Applied { server_time: SyncCursor },
    /// The mirror holds a newer version; apply it locally instead.
    Superseded { row: RemoteRow },
}

/// Result of a delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The mirror stored the tombstone.
    Deleted { server_time: SyncCursor },
    /// The mirror already held a tombstone for the key; nothing changed.
    AlreadyDeleted { server_time: SyncCursor },
    /// An edit newer than the delete exists; apply it locally instead.
    Superseded { row: RemoteRow },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub keys: Vec<SyncId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub rows: Vec<RemoteRow>,
}

/// Pull response as it travels on the wire. Rows stay untyped until
/// [`decode_row`] so one bad row cannot fail the whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub server_time: SyncCursor,
    pub rows: Vec<serde_json::Value>,
}

/// A pulled row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("undecodable row: {message}")]
pub struct RowDecodeError {
    /// Row key, if it could be read
    pub key: Option<String>,
    pub message: String,
}

/// Decode one pulled row.
pub fn decode_row(value: serde_json::Value) -> Result<RemoteRow, RowDecodeError> {
    let key = value
        .get("key")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned);
    serde_json::from_value(value).map_err(|error| RowDecodeError {
        key,
        message: error.to_string(),
    })
}

/// Dedup fingerprint of an uploaded attachment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentFingerprint {
    pub entry_key: SyncId,
    pub kind: AttachmentKind,
    pub size_bytes: i64,
}

/// Attachment metadata record kept by the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    pub entry_key: SyncId,
    pub kind: AttachmentKind,
    pub size_bytes: i64,
    pub object_key: String,
    pub mime_type: String,
    pub created_at: i64,
}

impl RemoteAttachment {
    #[must_use]
    pub const fn fingerprint(&self) -> AttachmentFingerprint {
        AttachmentFingerprint {
            entry_key: self.entry_key,
            kind: self.kind,
            size_bytes: self.size_bytes,
        }
    }
}

/// What a mirror does with an incoming upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertDecision {
    /// Store this row.
    Write(RemoteRow),
    /// Stored row has the same timestamp; nothing to do.
    Unchanged,
    /// Stored row is newer; hand it back.
    Superseded(RemoteRow),
}

/// Last-write-wins decision for an upsert against the currently stored row.
///
/// Tombstones compare by their `updated_at`, which is the delete time, so an
/// edit made after a delete resurrects the entry.
#[must_use]
pub fn decide_upsert(existing: Option<&RemoteRow>, change: &EntryChange) -> UpsertDecision {
    match existing {
        Some(row) if row.updated_at() > change.updated_at => {
            UpsertDecision::Superseded(row.clone())
        }
        Some(row) if row.updated_at() == change.updated_at => {
            if row.is_tombstone() {
                UpsertDecision::Superseded(row.clone())
            } else {
                UpsertDecision::Unchanged
            }
        }
        _ => UpsertDecision::Write(RemoteRow::from_change(change)),
    }
}

/// What a mirror does with an incoming delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Store this tombstone.
    Write(RemoteRow),
    /// Already a tombstone; acknowledge without a write.
    Unchanged,
    /// A newer live row beats the delete; hand it back.
    Superseded(RemoteRow),
}

/// Last-write-wins decision for a delete against the currently stored row.
///
/// A key the mirror has never seen still gets a tombstone, so devices that
/// pull later observe the delete.
#[must_use]
pub fn decide_delete(existing: Option<&RemoteRow>, request: &DeleteRequest) -> DeleteDecision {
    match existing {
        Some(RemoteRow::Tombstone { .. }) => DeleteDecision::Unchanged,
        Some(row) if row.updated_at() > request.deleted_at => {
            DeleteDecision::Superseded(row.clone())
        }
        _ => DeleteDecision::Write(RemoteRow::Tombstone {
            key: request.key,
            updated_at: request.deleted_at,
            deleted_at: request.deleted_at,
        }),
    }
}

/// Next server change time: strictly after the previous one.
#[must_use]
pub fn next_server_time(last: i64, now: i64) -> i64 {
    now.max(last.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn change(updated_at: i64) -> EntryChange {
        EntryChange {
            key: SyncId::new(),
            payload: EntryPayload {
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                text: "hello".to_string(),
                mood: Mood::default(),
                tags: Vec::new(),
                is_private: false,
                ai_mood: None,
                ai_tags: Vec::new(),
                title: None,
                created_at: 1,
            },
            updated_at,
        }
    }

    #[test]
    fn remote_row_is_tagged() {
        let key = SyncId::new();
        let row = RemoteRow::Tombstone {
            key,
            updated_at: 5,
            deleted_at: 5,
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["state"], "tombstone");
        assert_eq!(value["key"], key.as_str());
    }

    #[test]
    fn decode_row_keeps_key_of_bad_row() {
        let key = SyncId::new();
        let error = decode_row(json!({ "state": "live", "key": key.as_str(), "updated_at": 3 }))
            .unwrap_err();
        assert_eq!(error.key, Some(key.as_str()));

        let error = decode_row(json!("garbage")).unwrap_err();
        assert_eq!(error.key, None);
    }

    #[test]
    fn decode_row_accepts_minimal_live_row() {
        let key = SyncId::new();
        let row = decode_row(json!({
            "state": "live",
            "key": key.as_str(),
            "updated_at": 9,
            "payload": { "date": "2024-03-01", "text": "x", "mood": 2, "created_at": 1 }
        }))
        .unwrap();
        assert_eq!(row.key(), key);
        assert_eq!(row.updated_at(), 9);
    }

    #[test]
    fn decode_row_rejects_out_of_range_mood() {
        let key = SyncId::new();
        assert!(decode_row(json!({
            "state": "live",
            "key": key.as_str(),
            "updated_at": 9,
            "payload": { "date": "2024-03-01", "text": "x", "mood": 9, "created_at": 1 }
        }))
        .is_err());
    }

    #[test]
    fn upsert_lww() {
        let incoming = change(2_000);
        let older = RemoteRow::from_change(&EntryChange {
            updated_at: 1_000,
            ..incoming.clone()
        });
        let newer = RemoteRow::from_change(&EntryChange {
            updated_at: 3_000,
            ..incoming.clone()
        });

        assert_eq!(
            decide_upsert(None, &incoming),
            UpsertDecision::Write(RemoteRow::from_change(&incoming))
        );
        assert_eq!(
            decide_upsert(Some(&older), &incoming),
            UpsertDecision::Write(RemoteRow::from_change(&incoming))
        );
        assert_eq!(
            decide_upsert(Some(&newer), &incoming),
            UpsertDecision::Superseded(newer.clone())
        );
        assert_eq!(
            decide_upsert(Some(&RemoteRow::from_change(&incoming)), &incoming),
            UpsertDecision::Unchanged
        );
    }

    #[test]
    fn upsert_after_delete_resurrects_only_if_newer() {
        let incoming = change(2_000);
        let tombstone = |at| RemoteRow::Tombstone {
            key: incoming.key,
            updated_at: at,
            deleted_at: at,
        };

        assert!(matches!(
            decide_upsert(Some(&tombstone(1_500)), &incoming),
            UpsertDecision::Write(_)
        ));
        assert_eq!(
            decide_upsert(Some(&tombstone(2_500)), &incoming),
            UpsertDecision::Superseded(tombstone(2_500))
        );
    }

    #[test]
    fn delete_refused_by_newer_edit() {
        let live = RemoteRow::from_change(&change(2_000));
        let key = live.key();

        assert_eq!(
            decide_delete(Some(&live), &DeleteRequest { key, deleted_at: 1_000 }),
            DeleteDecision::Superseded(live.clone())
        );
        assert_eq!(
            decide_delete(Some(&live), &DeleteRequest { key, deleted_at: 2_000 }),
            DeleteDecision::Write(RemoteRow::Tombstone {
                key,
                updated_at: 2_000,
                deleted_at: 2_000,
            })
        );
    }

    #[test]
    fn delete_of_unknown_key_stores_tombstone() {
        let key = SyncId::new();
        let tombstone = RemoteRow::Tombstone {
            key,
            updated_at: 1,
            deleted_at: 1,
        };

        assert_eq!(
            decide_delete(None, &DeleteRequest { key, deleted_at: 1 }),
            DeleteDecision::Write(tombstone.clone())
        );
        assert_eq!(
            decide_delete(Some(&tombstone), &DeleteRequest { key, deleted_at: 5 }),
            DeleteDecision::Unchanged
        );
    }

    #[test]
    fn delete_outcome_is_tagged() {
        let outcome = DeleteOutcome::AlreadyDeleted {
            server_time: SyncCursor::from_millis(7),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], json!("already_deleted"));
        assert_eq!(serde_json::from_value::<DeleteOutcome>(value).unwrap(), outcome);
    }

    #[test]
    fn server_time_is_monotonic() {
        assert_eq!(next_server_time(10, 5), 11);
        assert_eq!(next_server_time(10, 50), 50);
    }
}
