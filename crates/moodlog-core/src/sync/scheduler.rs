//! Interval/connectivity scheduler with a single-run guard.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::engine::SyncEngine;
use super::remote::RemoteMirror;
use super::report::SyncReport;
use super::store::{LocalStore, SyncMetadataStore};
use crate::auth::SessionProvider;

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Interval,
    ConnectivityRestored,
    Manual,
}

/// Work the scheduler runs.
#[allow(async_fn_in_trait)]
pub trait SyncJob {
    type Output;

    /// Run once; `None` when the account has no active session.
    async fn run(&self) -> Option<Self::Output>;
}

impl<L, R, A> SyncJob for SyncEngine<L, R, A>
where
    L: LocalStore + SyncMetadataStore,
    R: RemoteMirror,
    A: SessionProvider,
{
    type Output = SyncReport;

    async fn run(&self) -> Option<SyncReport> {
        self.run_if_signed_in().await
    }
}

/// Clears the in-progress flag when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs a [`SyncJob`] on an interval and when connectivity returns.
///
/// Overlapping triggers collapse into the active run; they are dropped, not
/// queued. Triggers while offline or signed out do nothing.
pub struct SyncScheduler<J> {
    job: J,
    in_progress: AtomicBool,
    online: watch::Receiver<bool>,
    interval: Duration,
}

impl<J: SyncJob> SyncScheduler<J> {
    /// `online` reports device connectivity.
    pub fn new(job: J, online: watch::Receiver<bool>, interval: Duration) -> Self {
        Self {
            job,
            in_progress: AtomicBool::new(false),
            online,
            interval,
        }
    }

    pub const fn job(&self) -> &J {
        &self.job
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run the job now unless a run is active or preconditions fail.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Option<J::Output> {
        if !*self.online.borrow() {
            tracing::debug!(?trigger, "Offline; sync trigger ignored");
            return None;
        }

        let Some(_guard) = RunGuard::acquire(&self.in_progress) else {
            tracing::debug!(?trigger, "Sync already running; trigger dropped");
            return None;
        };

        let output = self.job.run().await;
        if output.is_none() {
            tracing::debug!(?trigger, "Not signed in; sync trigger ignored");
        }
        output
    }

    /// Drive interval and connectivity triggers until `shutdown` resolves.
    ///
    /// `on_output` sees the result of every run that actually happened.
    pub async fn run_until<F>(&self, shutdown: F, mut on_output: impl FnMut(SyncTrigger, J::Output))
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online = self.online.clone();
        let mut was_online = *online.borrow_and_update();
        let mut watching = true;
        tokio::pin!(shutdown);

        loop {
            let trigger = tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => SyncTrigger::Interval,
                changed = online.changed(), if watching => {
                    if changed.is_err() {
                        // Connectivity source gone; keep the interval.
                        watching = false;
                        continue;
                    }
                    let now_online = *online.borrow_and_update();
                    let restored = now_online && !was_online;
                    was_online = now_online;
                    if !restored {
                        continue;
                    }
                    SyncTrigger::ConnectivityRestored
                }
            };

            if let Some(output) = self.trigger(trigger).await {
                on_output(trigger, output);
            }
        }

        tracing::info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
        signed_out: AtomicBool,
        started: Notify,
        release: Option<Arc<Notify>>,
    }

    impl SyncJob for CountingJob {
        type Output = usize;

        async fn run(&self) -> Option<usize> {
            if self.signed_out.load(Ordering::SeqCst) {
                return None;
            }
            self.started.notify_one();
            if let Some(release) = &self.release {
                release.notified().await;
            }
            Some(self.runs.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn scheduler(job: CountingJob, online: bool) -> (SyncScheduler<CountingJob>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(online);
        (SyncScheduler::new(job, rx, Duration::from_secs(3600)), tx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_trigger_runs_job() {
        let (scheduler, _tx) = scheduler(CountingJob::default(), true);
        assert_eq!(scheduler.trigger(SyncTrigger::Manual).await, Some(1));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_or_signed_out_is_a_silent_noop() {
        let (scheduler, tx) = scheduler(CountingJob::default(), false);
        assert_eq!(scheduler.trigger(SyncTrigger::Manual).await, None);

        tx.send(true).unwrap();
        scheduler.job().signed_out.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.trigger(SyncTrigger::Interval).await, None);
        assert_eq!(scheduler.job().runs.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_trigger_is_dropped() {
        let release = Arc::new(Notify::new());
        let job = CountingJob {
            release: Some(release.clone()),
            ..CountingJob::default()
        };
        let (scheduler, _tx) = scheduler(job, true);

        let (first, second) = tokio::join!(scheduler.trigger(SyncTrigger::Interval), async {
            scheduler.job().started.notified().await;
            assert!(scheduler.is_running());
            let dropped = scheduler.trigger(SyncTrigger::ConnectivityRestored).await;
            release.notify_one();
            dropped
        });

        assert_eq!(first, Some(1));
        assert_eq!(second, None);
        assert_eq!(scheduler.job().runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_until_fires_on_connectivity_restored() {
        let (tx, rx) = watch::channel(false);
        let scheduler = SyncScheduler::new(CountingJob::default(), rx, Duration::from_secs(3600));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut seen = Vec::new();

        tokio::join!(
            scheduler.run_until(
                async {
                    let _ = stop_rx.await;
                },
                |trigger, output| seen.push((trigger, output)),
            ),
            async {
                // The immediate first tick happens while offline and is ignored.
                tokio::time::sleep(Duration::from_millis(20)).await;
                tx.send(true).unwrap();
                while scheduler.job().runs.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                stop_tx.send(()).unwrap();
            }
        );

        assert_eq!(seen, vec![(SyncTrigger::ConnectivityRestored, 1)]);
    }
}
