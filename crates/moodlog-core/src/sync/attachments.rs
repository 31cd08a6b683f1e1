//! Attachment upload pass.
//!
//! Runs after entries are synced. Each payload (original and thumbnail) is
//! checked against the mirror by fingerprint, uploaded to the content store
//! if missing, then recorded on the mirror. Failures stay per-attachment.

use std::path::Path;
use std::sync::Arc;

use super::protocol::{AttachmentFingerprint, RemoteAttachment};
use super::remote::{RemoteError, RemoteMirror};
use super::report::{AttachmentReport, SyncIssue, SyncPhase};
use super::store::LocalStore;
use crate::auth::{AuthSession, SessionProvider};
use crate::clock::{Clock, SystemClock};
use crate::models::{Attachment, AttachmentKind};
use crate::storage::{build_object_key, ContentStore};

/// One payload to upload.
#[derive(Debug, Clone)]
struct Payload<'a> {
    attachment: &'a Attachment,
    path: &'a Path,
    fingerprint: AttachmentFingerprint,
    mime_type: String,
    thumbnail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadOutcome {
    Uploaded,
    AlreadyPresent,
}

/// Uploads attachments of already-synced entries.
pub struct AttachmentUploader<L, R, C, A> {
    store: L,
    remote: R,
    content: C,
    auth: A,
    clock: Arc<dyn Clock>,
}

impl<L, R, C, A> AttachmentUploader<L, R, C, A>
where
    L: LocalStore,
    R: RemoteMirror,
    C: ContentStore,
    A: SessionProvider,
{
    pub fn new(store: L, remote: R, content: C, auth: A) -> Self {
        Self {
            store,
            remote,
            content,
            auth,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self) -> AttachmentReport {
        match self.auth.current_session().await {
            Some(session) => self.run_as(&session).await,
            None => AttachmentReport {
                errors: vec![SyncIssue::Authentication],
                ..AttachmentReport::default()
            },
        }
    }

    /// Upload pass with a session the caller already holds.
    pub async fn run_as(&self, session: &AuthSession) -> AttachmentReport {
        let mut report = AttachmentReport::default();
        let attachments = match self.store.list_syncable_attachments().await {
            Ok(attachments) => attachments,
            Err(error) => {
                report.errors.push(SyncIssue::store(None, error));
                return report;
            }
        };

        for attachment in &attachments {
            let mut payloads = vec![original_payload(attachment)];
            if let Some(thumbnail) = thumbnail_payload(attachment) {
                payloads.push(thumbnail);
            }

            for payload in payloads {
                match self.upload_payload(session, &payload).await {
                    Ok(PayloadOutcome::Uploaded) => report.uploaded += 1,
                    Ok(PayloadOutcome::AlreadyPresent) => report.skipped += 1,
                    Err(RemoteFailure::Unauthorized) => {
                        report.errors.push(SyncIssue::Authentication);
                        return report;
                    }
                    Err(RemoteFailure::Issue(issue)) => {
                        tracing::warn!(
                            attachment = %attachment.id,
                            thumbnail = payload.thumbnail,
                            "Attachment upload failed: {}",
                            issue
                        );
                        report.errors.push(issue);
                    }
                }
            }
        }

        tracing::info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.errors.len(),
            "Attachment pass finished"
        );
        report
    }

    async fn upload_payload(
        &self,
        session: &AuthSession,
        payload: &Payload<'_>,
    ) -> Result<PayloadOutcome, RemoteFailure> {
        let attachment = payload.attachment;
        let entry_key = payload.fingerprint.entry_key;

        if self
            .remote
            .find_attachment(session, &payload.fingerprint)
            .await
            .map_err(|error| RemoteFailure::from_remote(entry_key.to_string(), error))?
            .is_some()
        {
            return Ok(PayloadOutcome::AlreadyPresent);
        }

        let bytes = tokio::fs::read(payload.path).await.map_err(|error| {
            RemoteFailure::Issue(SyncIssue::record(
                attachment.id,
                format!("cannot read {}: {error}", payload.path.display()),
            ))
        })?;

        let file_name = payload
            .path
            .file_name()
            .map_or_else(|| attachment.file_name(), |name| name.to_string_lossy().into_owned());
        let object_key =
            build_object_key(&entry_key.as_str(), attachment.kind, &file_name, payload.thumbnail)
                .map_err(|error| RemoteFailure::Issue(SyncIssue::record(attachment.id, error)))?;

        self.content
            .put_object(&object_key, bytes, Some(&payload.mime_type))
            .await
            .map_err(|error| RemoteFailure::Issue(SyncIssue::record(attachment.id, error)))?;

        let record = RemoteAttachment {
            entry_key,
            kind: payload.fingerprint.kind,
            size_bytes: payload.fingerprint.size_bytes,
            object_key,
            mime_type: payload.mime_type.clone(),
            created_at: self.clock.now_millis(),
        };
        self.remote
            .insert_attachment(session, &record)
            .await
            .map_err(|error| RemoteFailure::from_remote(attachment.id.to_string(), error))?;

        Ok(PayloadOutcome::Uploaded)
    }
}

enum RemoteFailure {
    Unauthorized,
    Issue(SyncIssue),
}

impl RemoteFailure {
    fn from_remote(key: String, error: RemoteError) -> Self {
        match error {
            RemoteError::Unauthorized(_) => Self::Unauthorized,
            error if error.is_record_level() => Self::Issue(SyncIssue::record(key, error)),
            error => Self::Issue(SyncIssue::network(SyncPhase::Attachments, error)),
        }
    }
}

fn original_payload(attachment: &Attachment) -> Payload<'_> {
    Payload {
        attachment,
        path: &attachment.local_path,
        fingerprint: AttachmentFingerprint {
            entry_key: attachment.entry_id,
            kind: attachment.kind,
            size_bytes: attachment.size_bytes,
        },
        mime_type: attachment.mime_type.clone(),
        thumbnail: false,
    }
}

fn thumbnail_payload(attachment: &Attachment) -> Option<Payload<'_>> {
    let path = attachment.thumbnail_path.as_deref()?;
    Some(Payload {
        attachment,
        path,
        fingerprint: AttachmentFingerprint {
            entry_key: attachment.entry_id,
            kind: AttachmentKind::Thumbnail,
            size_bytes: attachment.thumbnail_size_bytes.unwrap_or_default(),
        },
        mime_type: thumbnail_mime_type(path).to_string(),
        thumbnail: true,
    })
}

fn thumbnail_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn thumbnail_mime_from_extension() {
        assert_eq!(thumbnail_mime_type(Path::new("a/thumb.PNG")), "image/png");
        assert_eq!(thumbnail_mime_type(Path::new("thumb.webp")), "image/webp");
        assert_eq!(thumbnail_mime_type(Path::new("thumb")), "image/jpeg");
    }

    #[test]
    fn thumbnail_fingerprint_uses_thumbnail_kind() {
        let attachment = Attachment::new(
            crate::models::SyncId::new(),
            AttachmentKind::Photo,
            "image/png",
            100,
            "/tmp/p.png",
        )
        .unwrap()
        .with_thumbnail(PathBuf::from("/tmp/p-thumb.jpg"), 10);

        let original = original_payload(&attachment);
        assert_eq!(original.fingerprint.kind, AttachmentKind::Photo);
        assert_eq!(original.fingerprint.size_bytes, 100);

        let thumbnail = thumbnail_payload(&attachment).unwrap();
        assert_eq!(thumbnail.fingerprint.kind, AttachmentKind::Thumbnail);
        assert_eq!(thumbnail.fingerprint.size_bytes, 10);
        assert_eq!(thumbnail.mime_type, "image/jpeg");
    }
}
