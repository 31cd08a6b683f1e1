use std::path::Path;
use std::time::Duration;

use moodlog_core::config::SyncConfig;
use moodlog_core::sync::{HttpMirror, SyncScheduler};
use tokio::sync::watch;

use crate::commands::common::open_database;
use crate::commands::sync::SyncRound;
use crate::error::CliError;

const CONNECTIVITY_PROBE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn run_watch(interval_secs: Option<u64>, db_path: &Path) -> Result<(), CliError> {
    let config = SyncConfig::from_env()?;
    let interval = match interval_secs {
        Some(0) => {
            return Err(CliError::InvalidArgument(
                "--interval-secs must be greater than zero".to_string(),
            ))
        }
        Some(secs) => Duration::from_secs(secs),
        None => config.sync_interval,
    };

    let db = open_database(db_path).await?;
    let (round, mirror) = SyncRound::connect(db, &config).await?;

    let (online_tx, online_rx) = watch::channel(mirror.health_check().await);
    let probe = tokio::spawn(probe_connectivity(mirror, online_tx));

    println!(
        "Watching for changes every {}s (Ctrl-C to stop)",
        interval.as_secs()
    );
    let scheduler = SyncScheduler::new(round, online_rx, interval);
    scheduler
        .run_until(
            async {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Could not listen for Ctrl-C: {}", error);
                    std::future::pending::<()>().await;
                }
            },
            |trigger, report| {
                if report.is_noop() {
                    tracing::debug!(?trigger, "Nothing to sync");
                    return;
                }
                println!("[{trigger:?}] {}", report.summary());
                for message in report.error_messages() {
                    eprintln!("  {message}");
                }
            },
        )
        .await;

    probe.abort();
    Ok(())
}

/// Publish reachability of the mirror; only changes wake the scheduler.
async fn probe_connectivity(mirror: HttpMirror, online: watch::Sender<bool>) {
    let mut ticker = tokio::time::interval(CONNECTIVITY_PROBE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let reachable = mirror.health_check().await;
        online.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                tracing::info!(online = reachable, "Connectivity changed");
                *current = reachable;
                true
            }
        });
        if online.is_closed() {
            break;
        }
    }
}
