//! In-process remote mirror.
//!
//! Applies the same per-row rules as the HTTP service while holding one lock
//! per operation, so several engines can share it as if they were devices
//! talking to one backend. Failure switches let tests cut the network or
//! reject specific records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::protocol::{
    decide_delete, decide_upsert, decode_row, next_server_time, AttachmentFingerprint,
    DeleteDecision, DeleteOutcome, DeleteRequest, EntryChange, RemoteAttachment, RemoteRow,
    UpsertDecision, WriteOutcome,
};
use super::remote::{PulledChanges, RemoteError, RemoteMirror, RemoteResult};
use crate::auth::AuthSession;
use crate::clock::Clock;
use crate::models::{SyncCursor, SyncId};

#[derive(Debug, Clone)]
struct StoredRow {
    row: RemoteRow,
    changed_at: i64,
}

#[derive(Debug, Default)]
struct Account {
    rows: BTreeMap<SyncId, StoredRow>,
    attachments: Vec<RemoteAttachment>,
}

#[derive(Debug, Default)]
struct MirrorState {
    accounts: HashMap<String, Account>,
    last_server_time: i64,
    offline: bool,
    pull_fails: bool,
    rejected: HashSet<SyncId>,
    raw_rows: Vec<serde_json::Value>,
}

impl MirrorState {
    fn tick(&mut self, now: i64) -> i64 {
        self.last_server_time = next_server_time(self.last_server_time, now);
        self.last_server_time
    }

    fn account(&mut self, session: &AuthSession) -> &mut Account {
        self.accounts.entry(session.user.id.clone()).or_default()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline {
            Err(RemoteError::Transport("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_accepted(&self, key: SyncId) -> RemoteResult<()> {
        if self.rejected.contains(&key) {
            Err(RemoteError::Rejected {
                key: key.to_string(),
                message: "constraint violation".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn check_session(session: &AuthSession) -> RemoteResult<()> {
    if session.is_expired() {
        Err(RemoteError::Unauthorized("session expired".to_string()))
    } else {
        Ok(())
    }
}

/// Shared in-memory mirror; clones see the same rows.
#[derive(Clone)]
pub struct MemoryMirror {
    state: Arc<Mutex<MirrorState>>,
    clock: Arc<dyn Clock>,
}

impl MemoryMirror {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MirrorState::default())),
            clock,
        }
    }

    /// Fail every call with a transport error while `offline` is set.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Fail only pulls with a transport error.
    pub async fn set_pull_failure(&self, fails: bool) {
        self.state.lock().await.pull_fails = fails;
    }

    /// Refuse writes for `key` as a per-record constraint violation.
    pub async fn reject_key(&self, key: SyncId) {
        self.state.lock().await.rejected.insert(key);
    }

    /// Add an arbitrary JSON value to the next pull response.
    pub async fn push_raw_row(&self, value: serde_json::Value) {
        self.state.lock().await.raw_rows.push(value);
    }

    /// Store `row` for `account_id` without any comparison.
    pub async fn seed_row(&self, account_id: &str, row: RemoteRow) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        let changed_at = state.tick(now);
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .rows
            .insert(row.key(), StoredRow { row, changed_at });
    }

    pub async fn row(&self, account_id: &str, key: SyncId) -> Option<RemoteRow> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .and_then(|account| account.rows.get(&key))
            .map(|stored| stored.row.clone())
    }

    pub async fn rows(&self, account_id: &str) -> Vec<RemoteRow> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .map(|account| account.rows.values().map(|stored| stored.row.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn attachments(&self, account_id: &str) -> Vec<RemoteAttachment> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .map(|account| account.attachments.clone())
            .unwrap_or_default()
    }
}

impl RemoteMirror for MemoryMirror {
    async fn lookup(&self, session: &AuthSession, keys: &[SyncId]) -> RemoteResult<Vec<RemoteRow>> {
        check_session(session)?;
        let mut state = self.state.lock().await;
        state.check_online()?;
        let account = state.account(session);
        Ok(keys
            .iter()
            .filter_map(|key| account.rows.get(key))
            .map(|stored| stored.row.clone())
            .collect())
    }

    async fn upsert(&self, session: &AuthSession, change: &EntryChange) -> RemoteResult<WriteOutcome> {
        check_session(session)?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.check_online()?;
        state.check_accepted(change.key)?;

        let existing = state.account(session).rows.get(&change.key).map(|s| s.row.clone());
        match decide_upsert(existing.as_ref(), change) {
            UpsertDecision::Write(row) => {
                let changed_at = state.tick(now);
                state
                    .account(session)
                    .rows
                    .insert(change.key, StoredRow { row, changed_at });
                Ok(WriteOutcome::Applied {
                    server_time: SyncCursor::from_millis(changed_at),
                })
            }
            UpsertDecision::Unchanged => Ok(WriteOutcome::Applied {
                server_time: SyncCursor::from_millis(state.last_server_time),
            }),
            UpsertDecision::Superseded(row) => Ok(WriteOutcome::Superseded { row }),
        }
    }

    async fn delete(
        &self,
        session: &AuthSession,
        request: &DeleteRequest,
    ) -> RemoteResult<DeleteOutcome> {
        check_session(session)?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.check_online()?;
        state.check_accepted(request.key)?;

        let existing = state.account(session).rows.get(&request.key).map(|s| s.row.clone());
        match decide_delete(existing.as_ref(), request) {
            DeleteDecision::Write(row) => {
                let changed_at = state.tick(now);
                state
                    .account(session)
                    .rows
                    .insert(request.key, StoredRow { row, changed_at });
                Ok(DeleteOutcome::Deleted {
                    server_time: SyncCursor::from_millis(changed_at),
                })
            }
            DeleteDecision::Unchanged => Ok(DeleteOutcome::AlreadyDeleted {
                server_time: SyncCursor::from_millis(state.last_server_time),
            }),
            DeleteDecision::Superseded(row) => Ok(DeleteOutcome::Superseded { row }),
        }
    }

    async fn pull(
        &self,
        session: &AuthSession,
        since: Option<SyncCursor>,
    ) -> RemoteResult<PulledChanges> {
        check_session(session)?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.check_online()?;
        if state.pull_fails {
            return Err(RemoteError::Transport("connection reset during pull".to_string()));
        }

        let server_time = state.tick(now);
        let raw_rows = std::mem::take(&mut state.raw_rows);
        let account = state.account(session);
        let mut rows: Vec<_> = account
            .rows
            .values()
            .filter(|stored| match since {
                Some(cursor) => stored.changed_at > cursor.millis(),
                None => !stored.row.is_tombstone(),
            })
            .map(|stored| Ok(stored.row.clone()))
            .collect();
        rows.extend(raw_rows.into_iter().map(decode_row));

        Ok(PulledChanges {
            server_time: Some(SyncCursor::from_millis(server_time)),
            rows,
        })
    }

    async fn find_attachment(
        &self,
        session: &AuthSession,
        fingerprint: &AttachmentFingerprint,
    ) -> RemoteResult<Option<RemoteAttachment>> {
        check_session(session)?;
        let mut state = self.state.lock().await;
        state.check_online()?;
        Ok(state
            .account(session)
            .attachments
            .iter()
            .find(|record| record.fingerprint() == *fingerprint)
            .cloned())
    }

    async fn insert_attachment(
        &self,
        session: &AuthSession,
        record: &RemoteAttachment,
    ) -> RemoteResult<()> {
        check_session(session)?;
        let mut state = self.state.lock().await;
        state.check_online()?;
        state.check_accepted(record.entry_key)?;

        let account = state.account(session);
        if account
            .attachments
            .iter()
            .any(|existing| existing.fingerprint() == record.fingerprint())
        {
            return Err(RemoteError::Rejected {
                key: record.entry_key.to_string(),
                message: "duplicate attachment fingerprint".to_string(),
            });
        }
        account.attachments.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::auth::{SessionProvider, StaticSession};
    use crate::clock::ManualClock;
    use crate::models::Mood;
    use crate::sync::protocol::EntryPayload;

    fn change(key: SyncId, updated_at: i64) -> EntryChange {
        EntryChange {
            key,
            payload: EntryPayload {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                text: format!("v{updated_at}"),
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

    async fn session(user: &str) -> AuthSession {
        StaticSession::for_user(user).current_session().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_are_scoped_per_account() {
        let mirror = MemoryMirror::new(Arc::new(ManualClock::new(100)));
        let alice = session("alice").await;
        let bob = session("bob").await;
        let key = SyncId::new();

        mirror.upsert(&alice, &change(key, 10)).await.unwrap();
        assert_eq!(mirror.lookup(&alice, &[key]).await.unwrap().len(), 1);
        assert!(mirror.lookup(&bob, &[key]).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_since_cursor_returns_only_later_changes() {
        let clock = ManualClock::new(100);
        let mirror = MemoryMirror::new(Arc::new(clock.clone()));
        let alice = session("alice").await;
        let first = SyncId::new();
        let second = SyncId::new();

        mirror.upsert(&alice, &change(first, 10)).await.unwrap();
        let pulled = mirror.pull(&alice, None).await.unwrap();
        assert_eq!(pulled.rows.len(), 1);
        let cursor = pulled.server_time;

        // Same wall time as the pull; still strictly after the cursor.
        mirror.upsert(&alice, &change(second, 10)).await.unwrap();
        let pulled = mirror.pull(&alice, cursor).await.unwrap();
        let keys: Vec<_> = pulled
            .rows
            .into_iter()
            .map(|row| row.unwrap().key())
            .collect();
        assert_eq!(keys, vec![second]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bootstrap_pull_skips_tombstones_but_incremental_pull_includes_them() {
        let mirror = MemoryMirror::new(Arc::new(ManualClock::new(100)));
        let alice = session("alice").await;
        let key = SyncId::new();

        mirror.upsert(&alice, &change(key, 10)).await.unwrap();
        let cursor = mirror.pull(&alice, None).await.unwrap().server_time;
        mirror
            .delete(&alice, &DeleteRequest { key, deleted_at: 20 })
            .await
            .unwrap();

        assert!(mirror.pull(&alice, None).await.unwrap().rows.is_empty());
        let incremental = mirror.pull(&alice, cursor).await.unwrap();
        assert!(matches!(
            incremental.rows.as_slice(),
            [Ok(RemoteRow::Tombstone { deleted_at: 20, .. })]
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_unknown_key_leaves_tombstone_for_later_pulls() {
        let mirror = MemoryMirror::new(Arc::new(ManualClock::new(100)));
        let alice = session("alice").await;
        let key = SyncId::new();
        let cursor = mirror.pull(&alice, None).await.unwrap().server_time;

        let first = mirror
            .delete(&alice, &DeleteRequest { key, deleted_at: 20 })
            .await
            .unwrap();
        assert!(matches!(first, DeleteOutcome::Deleted { .. }));
        let second = mirror
            .delete(&alice, &DeleteRequest { key, deleted_at: 30 })
            .await
            .unwrap();
        assert!(matches!(second, DeleteOutcome::AlreadyDeleted { .. }));

        let incremental = mirror.pull(&alice, cursor).await.unwrap();
        assert!(matches!(
            incremental.rows.as_slice(),
            [Ok(RemoteRow::Tombstone { deleted_at: 20, .. })]
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_switches() {
        let mirror = MemoryMirror::new(Arc::new(ManualClock::new(100)));
        let alice = session("alice").await;
        let key = SyncId::new();

        mirror.reject_key(key).await;
        let error = mirror.upsert(&alice, &change(key, 1)).await.unwrap_err();
        assert!(error.is_record_level());

        mirror.set_offline(true).await;
        assert!(matches!(
            mirror.pull(&alice, None).await,
            Err(RemoteError::Transport(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_attachment_fingerprint_is_rejected() {
        let mirror = MemoryMirror::new(Arc::new(ManualClock::new(100)));
        let alice = session("alice").await;
        let record = RemoteAttachment {
            entry_key: SyncId::new(),
            kind: crate::models::AttachmentKind::Photo,
            size_bytes: 3,
            object_key: "entries/x/photo/1-a-p.png".to_string(),
            mime_type: "image/png".to_string(),
            created_at: 1,
        };

        mirror.insert_attachment(&alice, &record).await.unwrap();
        assert_eq!(
            mirror
                .find_attachment(&alice, &record.fingerprint())
                .await
                .unwrap(),
            Some(record.clone())
        );
        assert!(mirror.insert_attachment(&alice, &record).await.is_err());
    }
}
