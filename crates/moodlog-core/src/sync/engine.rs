//! Reconciliation engine: push local changes, pull remote ones.
//!
//! A run is two phases. Push sends dirty entries and queued tombstones,
//! pull applies rows changed on the mirror since the stored cursor. Both
//! resolve conflicts by last-write-wins on `updated_at`. Every record is
//! handled independently; a failure is recorded in the [`SyncReport`] and
//! the next run picks up where this one stopped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::Instrument;

use super::protocol::{DeleteOutcome, DeleteRequest, EntryChange, RemoteRow, WriteOutcome};
use super::remote::{RemoteError, RemoteMirror};
use super::report::{SyncIssue, SyncPhase, SyncReport};
use super::store::{LocalStore, SyncMetadataStore};
use crate::auth::{AuthSession, SessionProvider};
use crate::clock::{Clock, SystemClock};
use crate::models::{Entry, SyncCursor, SyncId};

/// Keys per lookup request.
const LOOKUP_BATCH_SIZE: usize = 100;

/// What the push phase does with one dirty entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAction {
    /// Send the local version.
    Send,
    /// The mirror already has this exact version.
    MarkPushed,
    /// The mirror is newer; the pull phase applies its row.
    DeferToPull(RemoteRow),
}

/// Push decision for a dirty entry given its current remote row.
#[must_use]
pub fn decide_push(entry: &Entry, remote: Option<&RemoteRow>) -> PushAction {
    let Some(row) = remote else {
        return PushAction::Send;
    };

    match entry.updated_at.cmp(&row.updated_at()) {
        std::cmp::Ordering::Greater => PushAction::Send,
        std::cmp::Ordering::Less => PushAction::DeferToPull(row.clone()),
        std::cmp::Ordering::Equal if row.is_tombstone() => PushAction::DeferToPull(row.clone()),
        std::cmp::Ordering::Equal => PushAction::MarkPushed,
    }
}

/// Dirty entries that take part in the push phase.
#[must_use]
pub fn push_candidates(dirty: Vec<Entry>, include_private: bool) -> Vec<Entry> {
    dirty
        .into_iter()
        .filter(|entry| include_private || !entry.content.is_private)
        .collect()
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseEnd {
    Completed,
    /// Transport failure; remaining work of the phase skipped.
    Aborted,
    /// The mirror rejected the session; the run stops.
    Unauthorized,
}

/// Effect of applying one remote row locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Downloaded,
    Deleted,
    Ignored,
}

/// Sync engine for one device.
///
/// Holds no global state; several engines can share a mirror in one process.
pub struct SyncEngine<L, R, A> {
    store: L,
    remote: R,
    auth: A,
    clock: Arc<dyn Clock>,
}

impl<L, R, A> SyncEngine<L, R, A>
where
    L: LocalStore + SyncMetadataStore,
    R: RemoteMirror,
    A: SessionProvider,
{
    pub fn new(store: L, remote: R, auth: A) -> Self {
        Self {
            store,
            remote,
            auth,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the fallback cursor instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one push + pull cycle.
    ///
    /// Never fails as a whole; problems are listed in the report. Without a
    /// session the run stops before touching anything.
    pub async fn run(&self) -> SyncReport {
        match self.run_if_signed_in().await {
            Some(report) => report,
            None => {
                tracing::warn!("Skipping sync: not signed in");
                SyncReport {
                    errors: vec![SyncIssue::Authentication],
                    ..SyncReport::default()
                }
            }
        }
    }

    /// Like [`run`](Self::run), but `None` when there is no session.
    pub async fn run_if_signed_in(&self) -> Option<SyncReport> {
        let session = self.auth.current_session().await?;
        Some(self.run_as(&session).await)
    }

    /// Run one cycle with a session the caller already holds.
    pub async fn run_as(&self, session: &AuthSession) -> SyncReport {
        let device = match self.store.device_id().await {
            Ok(device) => device,
            Err(error) => {
                tracing::warn!("Could not read device id: {}", error);
                "unknown".to_string()
            }
        };

        let span = tracing::info_span!("sync_run", device = %device);
        self.run_with_session(session).instrument(span).await
    }

    async fn run_with_session(&self, session: &AuthSession) -> SyncReport {
        let mut report = SyncReport::default();

        let mut metadata = match self.store.load_sync_metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                report.errors.push(SyncIssue::store(None, error));
                return report;
            }
        };

        let mut carried = Vec::new();
        let push_end = self.push_phase(session, &mut report, &mut carried).await;

        if push_end == PhaseEnd::Unauthorized {
            tracing::warn!("Mirror rejected the session; skipping pull");
        } else if let Some(cursor) = self
            .pull_phase(session, metadata.last_synced_at, carried, &mut report)
            .await
        {
            metadata.last_synced_at = Some(cursor);
        }

        match self.pending_count().await {
            Ok(pending) => metadata.pending_count = pending,
            Err(error) => report.errors.push(SyncIssue::store(None, error)),
        }
        if let Err(error) = self.store.save_sync_metadata(&metadata).await {
            report.errors.push(SyncIssue::store(None, error));
        }

        tracing::info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            deleted = report.deleted,
            failed = report.errors.len(),
            pending = metadata.pending_count,
            "Sync run finished"
        );
        report
    }

    async fn include_private(&self, report: &mut SyncReport) -> bool {
        match self.store.sync_private_entries().await {
            Ok(include) => include,
            Err(error) => {
                // Unknown opt-in: keep private entries local.
                report.errors.push(SyncIssue::store(None, error));
                false
            }
        }
    }

    async fn push_phase(
        &self,
        session: &AuthSession,
        report: &mut SyncReport,
        carried: &mut Vec<RemoteRow>,
    ) -> PhaseEnd {
        let include_private = self.include_private(report).await;
        let dirty = match self.store.list_dirty_entries().await {
            Ok(dirty) => dirty,
            Err(error) => {
                report.errors.push(SyncIssue::store(None, error));
                Vec::new()
            }
        };
        let candidates = push_candidates(dirty, include_private);
        let tombstones = match self.store.list_pending_deletes().await {
            Ok(tombstones) => tombstones,
            Err(error) => {
                report.errors.push(SyncIssue::store(None, error));
                Vec::new()
            }
        };

        if candidates.is_empty() && tombstones.is_empty() {
            return PhaseEnd::Completed;
        }
        tracing::debug!(
            entries = candidates.len(),
            tombstones = tombstones.len(),
            "Pushing local changes"
        );

        let keys: Vec<SyncId> = candidates.iter().map(|entry| entry.sync_id).collect();
        let mut remote_rows = HashMap::new();
        for chunk in keys.chunks(LOOKUP_BATCH_SIZE) {
            match self.remote.lookup(session, chunk).await {
                Ok(rows) => remote_rows.extend(rows.into_iter().map(|row| (row.key(), row))),
                Err(error) => return phase_failure(SyncPhase::Push, error, report),
            }
        }

        for entry in candidates {
            match decide_push(&entry, remote_rows.get(&entry.sync_id)) {
                PushAction::Send => {
                    let change = EntryChange::from_entry(&entry);
                    match self.remote.upsert(session, &change).await {
                        Ok(WriteOutcome::Applied { .. }) => {
                            self.mark_pushed(&entry, report).await;
                            report.uploaded += 1;
                        }
                        // Another device got there first since the lookup.
                        Ok(WriteOutcome::Superseded { row }) => carried.push(row),
                        Err(error) if error.is_record_level() => {
                            report.errors.push(SyncIssue::record(entry.sync_id, error));
                        }
                        Err(error) => return phase_failure(SyncPhase::Push, error, report),
                    }
                }
                PushAction::MarkPushed => self.mark_pushed(&entry, report).await,
                PushAction::DeferToPull(row) => carried.push(row),
            }
        }

        for tombstone in tombstones {
            let request = DeleteRequest {
                key: tombstone.sync_id,
                deleted_at: tombstone.deleted_at,
            };
            match self.remote.delete(session, &request).await {
                Ok(outcome) => {
                    if let Err(error) = self.store.purge_pending_delete(&request.key).await {
                        report
                            .errors
                            .push(SyncIssue::store(Some(request.key.to_string()), error));
                        continue;
                    }
                    match outcome {
                        DeleteOutcome::Deleted { .. } => report.deleted += 1,
                        DeleteOutcome::AlreadyDeleted { .. } => {}
                        // An edit elsewhere beats this delete.
                        DeleteOutcome::Superseded { row } => carried.push(row),
                    }
                }
                Err(error) if error.is_record_level() => {
                    report.errors.push(SyncIssue::record(request.key, error));
                }
                Err(error) => return phase_failure(SyncPhase::Push, error, report),
            }
        }

        PhaseEnd::Completed
    }

    async fn mark_pushed(&self, entry: &Entry, report: &mut SyncReport) {
        match self.store.mark_pushed(&entry.sync_id, entry.updated_at).await {
            Ok(true) => {}
            // Edited again while pushing; stays dirty for the next run.
            Ok(false) => tracing::debug!(sync_id = %entry.sync_id, "Entry changed during push"),
            Err(error) => report
                .errors
                .push(SyncIssue::store(Some(entry.sync_id.to_string()), error)),
        }
    }

    /// Returns the new cursor when the pull succeeded.
    async fn pull_phase(
        &self,
        session: &AuthSession,
        since: Option<SyncCursor>,
        carried: Vec<RemoteRow>,
        report: &mut SyncReport,
    ) -> Option<SyncCursor> {
        for row in carried {
            self.apply_and_count(row, report).await;
        }

        let changes = match self.remote.pull(session, since).await {
            Ok(changes) => changes,
            Err(error) => {
                phase_failure(SyncPhase::Pull, error, report);
                return None;
            }
        };
        tracing::debug!(rows = changes.rows.len(), bootstrap = since.is_none(), "Pulled changes");

        for row in changes.rows {
            match row {
                Ok(row) => self.apply_and_count(row, report).await,
                Err(error) => {
                    tracing::warn!("Skipping undecodable row: {}", error);
                    report.errors.push(SyncIssue::Decode {
                        key: error.key,
                        message: error.message,
                    });
                }
            }
        }

        Some(
            changes
                .server_time
                .unwrap_or_else(|| SyncCursor::from_millis(self.clock.now_millis())),
        )
    }

    async fn apply_and_count(&self, row: RemoteRow, report: &mut SyncReport) {
        let key = row.key();
        match self.apply_row(row).await {
            Ok(Applied::Downloaded) => report.downloaded += 1,
            Ok(Applied::Deleted) => report.deleted += 1,
            Ok(Applied::Ignored) => {}
            Err(error) => report
                .errors
                .push(SyncIssue::store(Some(key.to_string()), error)),
        }
    }

    async fn apply_row(&self, row: RemoteRow) -> crate::Result<Applied> {
        let key = row.key();
        let local = self.store.get_entry(&key).await?;

        match &row {
            RemoteRow::Tombstone { deleted_at, .. } => {
                let mut applied = Applied::Ignored;
                if let Some(local) = local {
                    // A local edit newer than the delete survives it.
                    if local.updated_at <= *deleted_at {
                        self.store.delete_entry(&key).await?;
                        applied = Applied::Deleted;
                    }
                }
                if self.store.get_pending_delete(&key).await?.is_some() {
                    self.store.purge_pending_delete(&key).await?;
                }
                Ok(applied)
            }
            RemoteRow::Live { updated_at, .. } => match local {
                None => {
                    if let Some(pending) = self.store.get_pending_delete(&key).await? {
                        if pending.deleted_at >= *updated_at {
                            return Ok(Applied::Ignored);
                        }
                        self.store.purge_pending_delete(&key).await?;
                    }
                    self.write_remote(&row, 0).await
                }
                Some(local) if *updated_at > local.updated_at => {
                    self.write_remote(&row, local.local_id).await
                }
                Some(_) => Ok(Applied::Ignored),
            },
        }
    }

    async fn write_remote(&self, row: &RemoteRow, local_id: i64) -> crate::Result<Applied> {
        match row.to_entry(local_id) {
            Some(entry) => {
                self.store.apply_remote(&entry).await?;
                Ok(Applied::Downloaded)
            }
            None => Ok(Applied::Ignored),
        }
    }

    /// Entries and tombstones still waiting for the mirror.
    async fn pending_count(&self) -> crate::Result<usize> {
        let include_private = self.store.sync_private_entries().await?;
        let dirty = push_candidates(self.store.list_dirty_entries().await?, include_private);
        let tombstones = self.store.list_pending_deletes().await?;
        Ok(dirty.len() + tombstones.len())
    }
}

fn phase_failure(phase: SyncPhase, error: RemoteError, report: &mut SyncReport) -> PhaseEnd {
    tracing::warn!("Sync {} phase stopped: {}", phase, error);
    if let RemoteError::Unauthorized(_) = error {
        report.errors.push(SyncIssue::Authentication);
        PhaseEnd::Unauthorized
    } else {
        report.errors.push(SyncIssue::network(phase, error));
        PhaseEnd::Aborted
    }
}
