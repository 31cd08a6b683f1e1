use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use moodlog_core::models::{SyncCursor, SyncId};
use moodlog_core::sync::http::DEVICE_ID_HEADER;
use moodlog_core::sync::protocol::{
    AttachmentFingerprint, DeleteOutcome, DeleteRequest, EntryChange, LookupRequest,
    LookupResponse, PullResponse, RemoteAttachment, WriteOutcome,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::{parse_kind, MirrorStore};

const MAX_LOOKUP_KEYS: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    jwt_verifier: Arc<JwtVerifier>,
    store: Arc<MirrorStore>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: MirrorStore) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            store: Arc::new(store),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/entries/lookup", post(lookup_entries))
        .route("/entries/changes", get(pull_changes))
        .route("/entries/{key}", put(upsert_entry))
        .route("/entries/{key}/delete", post(delete_entry))
        .route("/attachments/lookup", get(find_attachment))
        .route("/attachments", post(insert_attachment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let mut user = state.jwt_verifier.verify_access_token(token)?;
    user.device_id = request
        .headers()
        .get(DEVICE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn lookup_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<LookupResponse>, AppError> {
    if request.keys.len() > MAX_LOOKUP_KEYS {
        return Err(AppError::bad_request(format!(
            "at most {MAX_LOOKUP_KEYS} keys per lookup"
        )));
    }

    let rows = state.store.lookup(&user.account_id, &request.keys).await?;
    tracing::debug!(
        endpoint = "entries_lookup",
        user = user_fingerprint(&user.account_id),
        requested = request.keys.len(),
        found = rows.len(),
        "Looked up entries"
    );
    Ok(Json(LookupResponse { rows }))
}

async fn upsert_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    Json(change): Json<EntryChange>,
) -> Result<Json<WriteOutcome>, AppError> {
    let key = parse_key(&key)?;
    if change.key != key {
        return Err(AppError::unprocessable(format!(
            "body key {} does not match path key {key}",
            change.key
        )));
    }
    if change.updated_at <= 0 {
        return Err(AppError::unprocessable("updated_at must be positive"));
    }

    let outcome = state.store.upsert(&user.account_id, &change).await?;
    tracing::info!(
        endpoint = "entries_upsert",
        user = user_fingerprint(&user.account_id),
        device = user.device_id.as_deref().unwrap_or("unknown"),
        superseded = matches!(outcome, WriteOutcome::Superseded { .. }),
        "Handled entry upsert"
    );
    Ok(Json(outcome))
}

async fn delete_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<DeleteOutcome>, AppError> {
    let key = parse_key(&key)?;
    if request.key != key {
        return Err(AppError::unprocessable(format!(
            "body key {} does not match path key {key}",
            request.key
        )));
    }

    let outcome = state.store.delete(&user.account_id, &request).await?;
    tracing::info!(
        endpoint = "entries_delete",
        user = user_fingerprint(&user.account_id),
        device = user.device_id.as_deref().unwrap_or("unknown"),
        superseded = matches!(outcome, DeleteOutcome::Superseded { .. }),
        "Handled entry delete"
    );
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<String>,
}

async fn pull_changes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<PullResponse>, AppError> {
    let since = query
        .since
        .as_deref()
        .map(SyncCursor::parse)
        .transpose()
        .map_err(|error| AppError::bad_request(error.to_string()))?;

    let feed = state.store.changes(&user.account_id, since).await?;
    let rows = feed
        .rows
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(
        endpoint = "entries_changes",
        user = user_fingerprint(&user.account_id),
        device = user.device_id.as_deref().unwrap_or("unknown"),
        bootstrap = since.is_none(),
        rows = rows.len(),
        "Served change feed"
    );
    Ok(Json(PullResponse {
        server_time: feed.server_time,
        rows,
    }))
}

#[derive(Debug, Deserialize)]
struct AttachmentLookupQuery {
    entry_key: String,
    kind: String,
    size_bytes: i64,
}

async fn find_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<AttachmentLookupQuery>,
) -> Result<Json<RemoteAttachment>, AppError> {
    let fingerprint = AttachmentFingerprint {
        entry_key: parse_key(&query.entry_key)?,
        kind: parse_kind(&query.kind)?,
        size_bytes: query.size_bytes,
    };

    state
        .store
        .find_attachment(&user.account_id, &fingerprint)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("no attachment with this fingerprint"))
}

async fn insert_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(record): Json<RemoteAttachment>,
) -> Result<StatusCode, AppError> {
    if record.size_bytes < 0 || record.object_key.trim().is_empty() {
        return Err(AppError::unprocessable(
            "attachment needs an object key and a non-negative size",
        ));
    }

    state.store.insert_attachment(&user.account_id, &record).await?;
    tracing::info!(
        endpoint = "attachments_insert",
        user = user_fingerprint(&user.account_id),
        kind = record.kind.as_str(),
        size_bytes = record.size_bytes,
        "Recorded attachment"
    );
    Ok(StatusCode::CREATED)
}

fn parse_key(value: &str) -> Result<SyncId, AppError> {
    value
        .parse::<SyncId>()
        .map_err(|_| AppError::bad_request(format!("invalid entry key {value:?}")))
}

fn user_fingerprint(account_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    account_id.hash(&mut hasher);
    hasher.finish()
}
