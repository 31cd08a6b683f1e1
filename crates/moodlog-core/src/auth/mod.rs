//! Account sessions for the remote mirror.
//!
//! The sync engine only needs "is there a usable session, and what is its
//! bearer token". [`SessionProvider`] is that seam; the Supabase client below
//! is the production source and [`StaticSession`] the test one.

use std::fmt;
use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::util::{compact_text, is_http_url, normalize_text_option, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Account id; every remote row is scoped to it
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Supabase auth is not configured (set SUPABASE_URL and SUPABASE_ANON_KEY)")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where a signed-in session is kept between runs.
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Source of the active account session.
#[allow(async_fn_in_trait)]
pub trait SessionProvider {
    /// A usable session, or `None` when signed out or expired beyond refresh.
    async fn current_session(&self) -> Option<AuthSession>;
}

/// Fixed, swappable session. Used by tests and by callers that resolved the
/// session themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    session: Arc<RwLock<Option<AuthSession>>>,
}

impl StaticSession {
    #[must_use]
    pub fn new(session: Option<AuthSession>) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
        }
    }

    /// Non-expiring session for `user_id`.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self::new(Some(AuthSession {
            access_token: format!("token-{user_id}"),
            refresh_token: format!("refresh-{user_id}"),
            expires_at: i64::MAX / 2,
            user: AuthUser {
                id: user_id,
                email: None,
            },
        }))
    }

    pub async fn set(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }
}

impl SessionProvider for StaticSession {
    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }
}

#[derive(Clone)]
pub struct SupabaseAuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> SupabaseAuthClient<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
        })
    }

    /// Client configured from `SUPABASE_URL` / `SUPABASE_ANON_KEY`.
    pub fn from_env(store: S) -> AuthResult<Self> {
        let (url, anon_key) = resolve_optional_supabase_config(
            std::env::var("SUPABASE_URL").ok(),
            std::env::var("SUPABASE_ANON_KEY").ok(),
        )?
        .ok_or(AuthError::NotConfigured)?;
        Self::new(url, anon_key, store)
    }

    /// Load the persisted session, refreshing it if it expired.
    ///
    /// A session that cannot be refreshed is cleared.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored.is_expired() {
            return Ok(Some(stored));
        }

        match self.refresh_session(&stored.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        if email.trim().is_empty() {
            return Err(AuthError::Api("Email is required".to_string()));
        }
        if password.trim().is_empty() {
            return Err(AuthError::Api("Password is required".to_string()));
        }

        let payload = serde_json::json!({ "email": email.trim(), "password": password });
        self.token_grant("password", &payload, "Sign-in").await
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", &payload, "Refresh").await
    }

    pub async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        let response = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        // An already-invalid token still counts as signed out.
        let status = response.status();
        if !(status.is_success() || status == StatusCode::UNAUTHORIZED) {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        self.store.clear_session()?;
        Ok(())
    }

    /// Drop the persisted session without contacting the server.
    pub fn forget_session(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        payload: &serde_json::Value,
        action: &str,
    ) -> AuthResult<AuthSession> {
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", grant_type)])
                .json(payload),
        );
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        let session = response
            .json::<TokenResponse>()
            .await?
            .into_session(unix_timestamp_now())
            .ok_or_else(|| {
                AuthError::Api(format!("{action} response did not include an active session"))
            })?;

        self.store.save_session(&session)?;
        Ok(session)
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }
}

impl<S: SessionPersistence> SessionProvider for SupabaseAuthClient<S> {
    async fn current_session(&self) -> Option<AuthSession> {
        match self.restore_session().await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!("Could not restore auth session: {}", error);
                None
            }
        }
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !is_http_url(trimmed) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

/// Both values or neither; one without the other is a configuration error.
pub fn resolve_optional_supabase_config(
    url: Option<String>,
    anon_key: Option<String>,
) -> AuthResult<Option<(String, String)>> {
    match (normalize_text_option(url), normalize_text_option(anon_key)) {
        (None, None) => Ok(None),
        (Some(url), Some(anon_key)) => Ok(Some((url, anon_key))),
        _ => Err(AuthError::NotConfigured),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<TokenUser>,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Option<AuthSession> {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now.saturating_add(secs)))?;
        Some(AuthSession {
            access_token: self.access_token?,
            refresh_token: self.refresh_token?,
            expires_at,
            user: self.user.map(|user| AuthUser {
                id: user.id,
                email: user.email,
            })?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| {
            payload
                .message
                .or(payload.msg)
                .or(payload.error_description)
                .or(payload.error)
        })
        .unwrap_or_else(|| body.to_string());

    let message = compact_text(&message);
    if message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{message} ({})", status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> AuthSession {
        AuthSession {
            access_token: "secret-access-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            expires_at,
            user: AuthUser {
                id: "user".to_string(),
                email: None,
            },
        }
    }

    #[test]
    fn normalize_auth_url_appends_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co/").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
        let kept = normalize_auth_url("https://demo.supabase.co/auth/v1").unwrap();
        assert_eq!(kept, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn normalize_auth_url_rejects_missing_scheme() {
        assert!(normalize_auth_url("demo.supabase.co").is_err());
    }

    #[test]
    fn partial_supabase_config_is_an_error() {
        assert!(resolve_optional_supabase_config(None, None)
            .unwrap()
            .is_none());
        assert!(matches!(
            resolve_optional_supabase_config(Some("https://x".to_string()), Some(" ".to_string())),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn token_response_uses_expires_in() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "u1@example.com" }
        }))
        .unwrap();
        let session = response.into_session(1_000).unwrap();
        assert_eq!(session.expires_at, 4_600);
        assert_eq!(session.user.id, "u1");
    }

    #[test]
    fn token_response_without_tokens_has_no_session() {
        let response: TokenResponse =
            serde_json::from_value(serde_json::json!({ "user": { "id": "u1" } })).unwrap();
        assert!(response.into_session(0).is_none());
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let rendered = format!("{:?}", session(1_700_000_000));
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn api_error_prefers_message_fields() {
        let rendered = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(rendered, "Invalid login credentials (400)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn static_session_can_be_swapped() {
        let provider = StaticSession::for_user("alice");
        assert_eq!(
            provider.current_session().await.map(|s| s.user.id),
            Some("alice".to_string())
        );
        assert!(!provider.current_session().await.unwrap().is_expired());

        provider.set(None).await;
        assert!(provider.current_session().await.is_none());
    }
}
