//! HTTP client for the Moodlog API remote mirror.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::protocol::{
    decode_row, AttachmentFingerprint, DeleteOutcome, DeleteRequest, EntryChange, LookupRequest,
    LookupResponse, PullResponse, RemoteAttachment, RemoteRow, WriteOutcome,
};
use super::remote::{PulledChanges, RemoteError, RemoteMirror, RemoteResult};
use crate::auth::AuthSession;
use crate::models::{SyncCursor, SyncId};
use crate::util::{compact_text, is_http_url};
use crate::{Error, Result};

/// Header carrying the diagnostic device id.
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Remote mirror reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMirror {
    base_url: String,
    device_id: String,
    client: reqwest::Client,
}

impl HttpMirror {
    /// Builds a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(format!(
                "Sync API URL must start with http:// or https://, got {base_url:?}"
            )));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            device_id: device_id.into(),
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Unauthenticated reachability probe, used as the connectivity signal.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Sync API unreachable: {}", error);
                false
            }
        }
    }

    fn authed(&self, request: RequestBuilder, session: &AuthSession) -> RequestBuilder {
        request
            .bearer_auth(&session.access_token)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .header("Accept", "application/json")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.base_url)
    }
}

impl RemoteMirror for HttpMirror {
    async fn lookup(&self, session: &AuthSession, keys: &[SyncId]) -> RemoteResult<Vec<RemoteRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let request = self.authed(self.client.post(self.url("/entries/lookup")), session);
        let body = LookupRequest {
            keys: keys.to_vec(),
        };
        let response = request.json(&body).send().await?;
        let payload: LookupResponse = read_json(response, None).await?;
        Ok(payload.rows)
    }

    async fn upsert(&self, session: &AuthSession, change: &EntryChange) -> RemoteResult<WriteOutcome> {
        let request = self.authed(
            self.client
                .put(self.url(&format!("/entries/{}", change.key))),
            session,
        );
        let response = request.json(change).send().await?;
        read_json(response, Some(change.key)).await
    }

    async fn delete(
        &self,
        session: &AuthSession,
        request: &DeleteRequest,
    ) -> RemoteResult<DeleteOutcome> {
        let http_request = self.authed(
            self.client
                .post(self.url(&format!("/entries/{}/delete", request.key))),
            session,
        );
        let response = http_request.json(request).send().await?;
        read_json(response, Some(request.key)).await
    }

    async fn pull(
        &self,
        session: &AuthSession,
        since: Option<SyncCursor>,
    ) -> RemoteResult<PulledChanges> {
        let mut request = self.client.get(self.url("/entries/changes"));
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = self.authed(request, session).send().await?;
        let payload: PullResponse = read_json(response, None).await?;
        Ok(PulledChanges {
            server_time: Some(payload.server_time),
            rows: payload.rows.into_iter().map(decode_row).collect(),
        })
    }

    async fn find_attachment(
        &self,
        session: &AuthSession,
        fingerprint: &AttachmentFingerprint,
    ) -> RemoteResult<Option<RemoteAttachment>> {
        let request = self.client.get(self.url("/attachments/lookup")).query(&[
            ("entry_key", fingerprint.entry_key.as_str()),
            ("kind", fingerprint.kind.as_str().to_string()),
            ("size_bytes", fingerprint.size_bytes.to_string()),
        ]);
        let response = self.authed(request, session).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response, Some(fingerprint.entry_key))
            .await
            .map(Some)
    }

    async fn insert_attachment(
        &self,
        session: &AuthSession,
        record: &RemoteAttachment,
    ) -> RemoteResult<()> {
        let request = self.authed(self.client.post(self.url("/attachments")), session);
        let response = request.json(record).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(status_error(response, Some(record.entry_key)).await)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
}

async fn read_json<T: DeserializeOwned>(response: Response, key: Option<SyncId>) -> RemoteResult<T> {
    if !response.status().is_success() {
        return Err(status_error(response, key).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|error| RemoteError::Decode(error.to_string()))
}

async fn status_error(response: Response, key: Option<SyncId>) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_status(status, &body, key)
}

fn classify_status(status: StatusCode, body: &str, key: Option<SyncId>) -> RemoteError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.error)
        .unwrap_or_else(|| compact_text(body));

    match (status, key) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => RemoteError::Unauthorized(message),
        (StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, Some(key)) => {
            RemoteError::Rejected {
                key: key.to_string(),
                message,
            }
        }
        (status, _) if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transport(format!("HTTP {}: {message}", status.as_u16()))
        }
        (status, _) => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
