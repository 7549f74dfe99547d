//! HTTP API.
//!
//! JSON over axum. The caller is identified by the `X-Remote-User` header set
//! by the fronting proxy; without it actions are attributed to `Unknown`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ad_client::{ComputerDetails, DirectoryClient};
use crate::audit_log::{
    AuditFilter, AuditLogger, AuditPage, AuditRecord, IntegrityReport, DEFAULT_RECENT_COUNT,
    UNKNOWN_USER,
};
use crate::clone_orchestrator::{CloneOrchestrator, CloneOutcome, CloneRequest};
use crate::credential_vault::{CredentialVault, ServiceIdentity};
use crate::errors::{DirectoryError, FailureKind};
use crate::ldap_utils::is_distinguished_name;
use crate::ou_config::{OuConfigStore, RetiredOuConfig};

/// Header carrying the authenticated caller.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Retired-OU versions listed when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CloneOrchestrator>,
    pub directory: Arc<dyn DirectoryClient>,
    pub vault: Arc<CredentialVault>,
    pub ou_config: Arc<OuConfigStore>,
    pub audit: Arc<AuditLogger>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/clone/execute", post(execute_clone))
        .route("/api/computer/search", get(search_computers))
        .route("/api/computer/:name/groups", get(computer_groups))
        .route("/api/computer/:name/ou", get(computer_ou))
        .route("/api/computer/:name/details", get(computer_details))
        .route("/api/groups/search", get(search_groups))
        .route("/api/ou/search", get(search_ous))
        .route(
            "/api/admin/service-account",
            get(get_service_account).put(save_service_account),
        )
        .route("/api/admin/service-account/test", post(test_service_account))
        .route(
            "/api/admin/retired-ou",
            get(get_retired_ou).put(save_retired_ou),
        )
        .route("/api/admin/retired-ou/history", get(retired_ou_history))
        .route("/api/audit", get(list_audit))
        .route("/api/audit/recent", get(recent_audit))
        .route("/api/audit/filters", get(audit_filters))
        .route("/api/audit/integrity", get(audit_integrity))
        .route("/api/audit/user/:username", get(audit_by_user))
        .route("/api/audit/:id", get(get_audit))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The clone workflow aborted.
    #[error("Clone operation failed: {0}")]
    CloneFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error) = match &self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "validation_error".to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), "not_found".to_string()),
            ApiError::Directory(e) => {
                let status = match e.kind() {
                    FailureKind::NotFound => StatusCode::NOT_FOUND,
                    FailureKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                    FailureKind::Permanent => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string(), "directory_error".to_string())
            }
            ApiError::CloneFailed(cause) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Clone operation failed".to_string(),
                cause.clone(),
            ),
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal_error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                message,
                error,
            }),
        )
            .into_response()
    }
}

/// Caller name from `X-Remote-User`, or `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RemoteUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(REMOTE_USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(UNKNOWN_USER);
        Ok(RemoteUser(user.to_string()))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn execute_clone(
    State(state): State<AppState>,
    RemoteUser(user): RemoteUser,
    Json(request): Json<CloneRequest>,
) -> Result<Json<CloneOutcome>, ApiError> {
    if request.source_computer.trim().is_empty() || request.target_computer.trim().is_empty() {
        return Err(ApiError::Validation(
            "Source and target computers are required".to_string(),
        ));
    }

    // The run lives in its own task so a dropped connection cancels it
    // cleanly (and audits it) rather than stopping it between two calls.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);
    let task =
        tokio::spawn(async move { orchestrator.execute(request, &user, cancel).await });

    let result = task
        .await
        .map_err(|e| ApiError::CloneFailed(format!("Clone task failed: {}", e)))?;
    guard.disarm();

    result
        .map(Json)
        .map_err(|fault| ApiError::CloneFailed(fault.to_string()))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    term: String,
}

/// At least two non-whitespace characters.
fn is_searchable(term: &str) -> bool {
    term.chars().filter(|c| !c.is_whitespace()).count() >= 2
}

/// Lookup endpoints degrade to an empty result when the directory fails.
fn or_empty<T: Default>(what: &str, subject: &str, result: Result<T, DirectoryError>) -> T {
    result.unwrap_or_else(|e| {
        warn!(lookup = what, subject = subject, error = %e, "Directory lookup failed");
        T::default()
    })
}

async fn search_computers(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<String>> {
    if !is_searchable(&params.term) {
        return Json(Vec::new());
    }
    let result = state.directory.find_computers(params.term.trim()).await;
    Json(or_empty("computer search", &params.term, result))
}

async fn search_groups(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<String>> {
    if !is_searchable(&params.term) {
        return Json(Vec::new());
    }
    let result = state.directory.find_groups(params.term.trim()).await;
    Json(or_empty("group search", &params.term, result))
}

async fn search_ous(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<String>> {
    if !is_searchable(&params.term) {
        return Json(Vec::new());
    }
    let result = state
        .directory
        .find_organizational_units(params.term.trim())
        .await;
    Json(or_empty("OU search", &params.term, result))
}

async fn computer_groups(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Vec<String>> {
    let result = state.directory.get_group_membership(&name).await;
    Json(or_empty("group membership", &name, result))
}

#[derive(Debug, Serialize)]
struct OuResponse {
    ou: String,
}

async fn computer_ou(State(state): State<AppState>, Path(name): Path<String>) -> Json<OuResponse> {
    let result = state.directory.get_organizational_unit(&name).await;
    Json(OuResponse {
        ou: or_empty("organizational unit", &name, result),
    })
}

async fn computer_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ComputerDetails>, ApiError> {
    Ok(Json(state.directory.get_computer_details(&name).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountStatus {
    configured: bool,
    #[serde(flatten)]
    identity: Option<ServiceIdentity>,
}

async fn get_service_account(
    State(state): State<AppState>,
) -> Result<Json<ServiceAccountStatus>, ApiError> {
    let vault = Arc::clone(&state.vault);
    let identity = blocking(move || vault.active_identity()).await?;
    Ok(Json(ServiceAccountStatus {
        configured: identity.is_some(),
        identity,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountRequest {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn save_service_account(
    State(state): State<AppState>,
    RemoteUser(user): RemoteUser,
    Json(request): Json<ServiceAccountRequest>,
) -> Result<Json<ServiceIdentity>, ApiError> {
    if request.domain.trim().is_empty() || request.username.trim().is_empty() {
        return Err(ApiError::Validation(
            "Domain and username are required".to_string(),
        ));
    }

    let vault = Arc::clone(&state.vault);
    let updated_by = user.clone();
    let identity = blocking(move || {
        vault.save_identity(
            &request.domain,
            &request.username,
            &request.password,
            &updated_by,
        )
    })
    .await?;
    info!(user = %user, "Service account saved");
    Ok(Json(identity))
}

#[derive(Debug, Serialize)]
struct TestResult {
    success: bool,
    message: String,
}

async fn test_service_account(
    State(state): State<AppState>,
    Json(request): Json<ServiceAccountRequest>,
) -> Json<TestResult> {
    let success = state
        .vault
        .test_identity(&request.domain, &request.username, &request.password)
        .await;
    Json(TestResult {
        success,
        message: if success {
            "Service account credentials are valid".to_string()
        } else {
            "Service account credentials could not be verified".to_string()
        },
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetiredOuStatus {
    configured: bool,
    #[serde(flatten)]
    config: Option<RetiredOuConfig>,
}

async fn get_retired_ou(State(state): State<AppState>) -> Result<Json<RetiredOuStatus>, ApiError> {
    let store = Arc::clone(&state.ou_config);
    let config = blocking(move || store.get_retired_ou()).await?;
    Ok(Json(RetiredOuStatus {
        configured: config.is_some(),
        config,
    }))
}

#[derive(Debug, Deserialize)]
struct RetiredOuRequest {
    #[serde(rename = "retiredComputersOU", default)]
    retired_computers_ou: String,
}

async fn save_retired_ou(
    State(state): State<AppState>,
    RemoteUser(user): RemoteUser,
    Json(request): Json<RetiredOuRequest>,
) -> Result<Json<RetiredOuConfig>, ApiError> {
    if !is_distinguished_name(request.retired_computers_ou.trim()) {
        return Err(ApiError::Validation(
            "Retired computers OU must be a distinguished name, e.g. OU=Retired,DC=example,DC=com"
                .to_string(),
        ));
    }

    let store = Arc::clone(&state.ou_config);
    let config =
        blocking(move || store.save_retired_ou(&request.retired_computers_ou, &user)).await?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn retired_ou_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<RetiredOuConfig>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let store = Arc::clone(&state.ou_config);
    Ok(Json(blocking(move || store.history(limit)).await?))
}

async fn list_audit(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<AuditPage>, ApiError> {
    let audit = Arc::clone(&state.audit);
    blocking(move || audit.query(&filter))
        .await
        .map(Json)
        .map_err(|e| ApiError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    count: Option<usize>,
}

async fn recent_audit(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let count = params.count.unwrap_or(DEFAULT_RECENT_COUNT);
    let audit = Arc::clone(&state.audit);
    Ok(Json(blocking(move || audit.recent(count)).await?))
}

async fn audit_by_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let count = params.count.unwrap_or(DEFAULT_RECENT_COUNT);
    let audit = Arc::clone(&state.audit);
    Ok(Json(blocking(move || audit.by_user(&username, count)).await?))
}

#[derive(Debug, Serialize)]
struct AuditFilterOptions {
    usernames: Vec<String>,
    operations: Vec<String>,
}

async fn audit_filters(
    State(state): State<AppState>,
) -> Result<Json<AuditFilterOptions>, ApiError> {
    let audit = Arc::clone(&state.audit);
    let options = blocking(move || {
        Ok(AuditFilterOptions {
            usernames: audit.distinct_usernames()?,
            operations: audit.distinct_operations()?,
        })
    })
    .await?;
    Ok(Json(options))
}

async fn get_audit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AuditRecord>, ApiError> {
    let audit = Arc::clone(&state.audit);
    blocking(move || audit.get(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Audit record {} not found", id)))
}

async fn audit_integrity(
    State(state): State<AppState>,
) -> Result<Json<IntegrityReport>, ApiError> {
    let audit = Arc::clone(&state.audit);
    Ok(Json(blocking(move || audit.verify_integrity()).await?))
}

/// Runs a SQLite-backed store call on the blocking pool.
async fn blocking<T, F>(call: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call).await?
}
