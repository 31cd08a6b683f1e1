use std::path::Path;

use moodlog_core::auth::SessionProvider;
use moodlog_core::config::SyncConfig;
use moodlog_core::services::DatabaseService;
use moodlog_core::storage::R2Storage;
use moodlog_core::sync::{
    AttachmentReport, AttachmentUploader, HttpMirror, SyncEngine, SyncIssue, SyncJob,
    SyncMetadataStore, SyncReport,
};
use serde::Serialize;

use crate::auth::{AuthClient, SessionStore};
use crate::commands::common::{format_sync_timestamp, open_database};
use crate::error::CliError;

type Engine = SyncEngine<DatabaseService, HttpMirror, AuthClient>;
type Uploader = AttachmentUploader<DatabaseService, HttpMirror, R2Storage, AuthClient>;

/// One entry sync followed by the attachment pass, if a content store is
/// configured.
pub struct SyncRound {
    auth: AuthClient,
    engine: Engine,
    uploader: Option<Uploader>,
}

#[derive(Debug)]
pub struct RoundReport {
    pub entries: SyncReport,
    pub attachments: Option<AttachmentReport>,
}

impl RoundReport {
    pub fn failed(&self) -> usize {
        self.entries.errors.len()
            + self
                .attachments
                .as_ref()
                .map_or(0, |attachments| attachments.errors.len())
    }

    /// Nothing moved or failed in either pass.
    pub fn is_noop(&self) -> bool {
        let attachments_moved = matches!(
            &self.attachments,
            Some(attachments) if attachments.uploaded > 0 || !attachments.errors.is_empty()
        );
        self.entries.is_noop() && !attachments_moved
    }

    pub fn summary(&self) -> String {
        let mut line = self.entries.summary();
        if let Some(attachments) = &self.attachments {
            line.push_str(&format!(
                "; attachments: {} uploaded, {} already present",
                attachments.uploaded, attachments.skipped
            ));
            if !attachments.errors.is_empty() {
                line.push_str(&format!(", {} failed", attachments.errors.len()));
            }
        }
        line
    }

    pub fn error_messages(&self) -> Vec<String> {
        let mut messages = self.entries.error_messages();
        if let Some(attachments) = &self.attachments {
            messages.extend(attachments.errors.iter().map(ToString::to_string));
        }
        messages
    }
}

impl SyncRound {
    pub async fn connect(db: DatabaseService, config: &SyncConfig) -> Result<(Self, HttpMirror), CliError> {
        let Some(api_base_url) = config.api_base_url.as_deref() else {
            return Err(CliError::SyncNotConfigured);
        };
        let auth = AuthClient::from_env(SessionStore::new())?;
        let device_id = db.device_id().await?;
        let mirror = HttpMirror::new(api_base_url, device_id)?;

        let uploader = config.r2.clone().map(|r2| {
            AttachmentUploader::new(db.clone(), mirror.clone(), R2Storage::new(r2), auth.clone())
        });
        if uploader.is_none() {
            tracing::info!("No content store configured; attachments will not upload");
        }

        let engine = SyncEngine::new(db, mirror.clone(), auth.clone());
        Ok((
            Self {
                auth,
                engine,
                uploader,
            },
            mirror,
        ))
    }
}

impl SyncJob for SyncRound {
    type Output = RoundReport;

    async fn run(&self) -> Option<RoundReport> {
        // Restoring the session may refresh the token; read it once per round.
        let session = self.auth.current_session().await?;
        let entries = self.engine.run_as(&session).await;
        let attachments = match &self.uploader {
            // Attachments reference entries; skip them while the account is unusable.
            Some(uploader) if !entries.errors.contains(&SyncIssue::Authentication) => {
                Some(uploader.run_as(&session).await)
            }
            _ => None,
        };
        Some(RoundReport {
            entries,
            attachments,
        })
    }
}

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let config = SyncConfig::from_env()?;
    let db = open_database(db_path).await?;
    let (round, _mirror) = SyncRound::connect(db, &config).await?;

    let Some(report) = round.run().await else {
        return Err(CliError::NotSignedIn);
    };
    println!("{}", report.summary());
    for message in report.error_messages() {
        eprintln!("  {message}");
    }

    match report.failed() {
        0 => Ok(()),
        failed => Err(CliError::SyncFailed(failed)),
    }
}

#[derive(Debug, Serialize)]
pub struct SyncStatusItem {
    pub device_id: String,
    /// Unix ms of the last successful pull
    pub last_synced_at: Option<i64>,
    pub pending_count: usize,
    pub api_base_url: Option<String>,
    pub private_entries_sync: bool,
}

pub async fn load_sync_status(
    db: &DatabaseService,
    config: &SyncConfig,
) -> Result<SyncStatusItem, CliError> {
    let metadata = db.load_sync_metadata().await?;
    let settings = db.load_settings().await?;
    Ok(SyncStatusItem {
        device_id: db.device_id().await?,
        last_synced_at: metadata.last_synced_at.map(|cursor| cursor.millis()),
        pending_count: metadata.pending_count,
        api_base_url: config.api_base_url.clone(),
        private_entries_sync: settings.sync_private_entries,
    })
}

pub async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let config = SyncConfig::from_env()?;
    let db = open_database(db_path).await?;
    let status = load_sync_status(&db, &config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let last_synced = status
        .last_synced_at
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    println!("Device:          {}", status.device_id);
    println!("Last synced:     {last_synced}");
    println!("Pending changes: {}", status.pending_count);
    println!(
        "Private entries: {}",
        if status.private_entries_sync {
            "synced"
        } else {
            "kept local"
        }
    );
    println!(
        "Remote mirror:   {}",
        status.api_base_url.as_deref().unwrap_or("not configured")
    );

    if let Some(r2) = config.r2 {
        let bucket = r2.bucket.clone();
        match R2Storage::new(r2).bucket_is_reachable().await {
            Ok(()) => println!("Content store:   {bucket} (reachable)"),
            Err(error) => println!("Content store:   {bucket} (unreachable: {error})"),
        }
    }

    Ok(())
}
