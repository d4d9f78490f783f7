//! REST API handlers.
//!
//! Each handler calls into the registry and returns JSON responses, except
//! the tail routes, which stream plain text.

use std::fmt;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use logagg_registry::{RegistryError, TailTopic};
use logagg_state::{Attrs, ComponentRole, QueueResourceRef};
use tracing::{error, warn};

use crate::ApiState;

pub const CLUSTER_SECRET_HEADER: &str = "x-cluster-secret";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for a registry failure.
pub fn status_for(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
        RegistryError::TenantNotFound(_) | RegistryError::ComponentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        RegistryError::DuplicateTenant(_) | RegistryError::DuplicateQueueResource(_) => {
            StatusCode::CONFLICT
        }
        RegistryError::NoResourceAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::InvalidArgument(_) | RegistryError::MalformedRecord(_) => {
            StatusCode::BAD_REQUEST
        }
        RegistryError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn registry_error(e: RegistryError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, status = status.as_u16(), "request failed");
    }
    error_response(&e.to_string(), status)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Cluster secret from the request headers; missing reads as empty,
/// which never matches a stored secret.
fn cluster_secret(headers: &HeaderMap) -> &str {
    header_value(headers, CLUSTER_SECRET_HEADER).unwrap_or_default()
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(admin) = &state.admin else {
        return Err(error_response(
            "admin access is not configured",
            StatusCode::FORBIDDEN,
        ));
    };
    let key = header_value(headers, ADMIN_KEY_HEADER);
    let secret = header_value(headers, ADMIN_SECRET_HEADER);
    if key == Some(admin.key.as_str()) && secret == Some(admin.secret.as_str()) {
        Ok(())
    } else {
        warn!(key = key.unwrap_or("-"), "admin authentication failed");
        Err(error_response(
            "admin authentication failed",
            StatusCode::UNAUTHORIZED,
        ))
    }
}

// ── Clusters ───────────────────────────────────────────────────

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> Response {
    match state.registry.list_tenants() {
        Ok(names) => ApiResponse::ok(names).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Create request body.
#[derive(serde::Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
}

/// POST /api/v1/clusters
pub async fn create_cluster(
    State(state): State<ApiState>,
    Json(req): Json<CreateClusterRequest>,
) -> Response {
    match state.registry.create_tenant(&req.name) {
        Ok(creds) => (StatusCode::CREATED, ApiResponse::ok(creds)).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/clusters/:name
pub async fn get_cluster(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.registry.tenant_info(&name, cluster_secret(&headers)) {
        Ok(tenant) => ApiResponse::ok(tenant).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Rotation request body.
#[derive(serde::Deserialize)]
pub struct RotateSecretRequest {
    pub old_secret: String,
    pub new_secret: String,
}

/// POST /api/v1/clusters/:name/secret
pub async fn rotate_secret(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<RotateSecretRequest>,
) -> Response {
    match state
        .registry
        .rotate_secret(&name, &req.old_secret, &req.new_secret)
    {
        Ok(creds) => ApiResponse::ok(creds).into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Components ─────────────────────────────────────────────────

/// Port as sent by clients: `"9001"` or `9001`.
#[derive(serde::Deserialize)]
#[serde(untagged)]
pub enum Port {
    Text(String),
    Number(u16),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Registration request body.
#[derive(serde::Deserialize)]
pub struct RegisterComponentRequest {
    pub role: String,
    pub secret: String,
    pub host: String,
    pub port: Port,
    #[serde(default)]
    pub attrs: Attrs,
}

/// POST /api/v1/clusters/:name/components
pub async fn register_component(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<RegisterComponentRequest>,
) -> Response {
    let role: ComponentRole = match req.role.parse() {
        Ok(role) => role,
        Err(e) => return error_response(&format!("{e}"), StatusCode::BAD_REQUEST),
    };
    match state.registry.register_component(
        role,
        &name,
        &req.secret,
        &req.host,
        &req.port.to_string(),
        req.attrs,
    ) {
        Ok(component) => ApiResponse::ok(component).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/clusters/:name/components
pub async fn list_components(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state
        .registry
        .list_components(&name, cluster_secret(&headers))
    {
        Ok(components) => ApiResponse::ok(components).into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Tail ───────────────────────────────────────────────────────

/// GET /api/v1/clusters/:name/tail
///
/// Chunked `text/plain`, one batch of lines per chunk. The tail stops when
/// the client disconnects and hyper drops the body.
pub async fn tail_logs(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    tail_response(&state, &name, &headers, TailTopic::Logs).await
}

/// GET /api/v1/clusters/:name/heartbeats/tail
///
/// Raw heartbeat records as the cluster's components send them.
pub async fn tail_heartbeats(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    tail_response(&state, &name, &headers, TailTopic::Heartbeat).await
}

async fn tail_response(
    state: &ApiState,
    name: &str,
    headers: &HeaderMap,
    topic: TailTopic,
) -> Response {
    let stream = match state
        .tail
        .open(name, cluster_secret(headers), topic, state.shutdown.clone())
        .await
    {
        Ok(stream) => stream,
        Err(e) => return registry_error(e),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

// ── Admin ──────────────────────────────────────────────────────

/// GET /api/v1/admin/ping
pub async fn admin_ping(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    ApiResponse::ok("pong").into_response()
}

/// GET /api/v1/admin/queues
pub async fn list_queues(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.registry.pool().list() {
        Ok(queues) => ApiResponse::ok(queues).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Queue registration body.
#[derive(serde::Deserialize)]
pub struct AddQueueRequest {
    pub tcp_address: String,
    pub http_address: String,
    #[serde(default)]
    pub api_address: Option<String>,
}

/// POST /api/v1/admin/queues
pub async fn add_queue(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<AddQueueRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let resource = QueueResourceRef::new(
        &req.tcp_address,
        &req.http_address,
        req.api_address.as_deref(),
    );
    match state.registry.pool().register(resource) {
        Ok(resource) => (StatusCode::CREATED, ApiResponse::ok(resource)).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Reset request body.
#[derive(serde::Deserialize)]
pub struct ResetSecretRequest {
    pub new_secret: String,
}

/// POST /api/v1/admin/clusters/:name/secret
pub async fn reset_secret(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ResetSecretRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.registry.reset_secret(&name, &req.new_secret) {
        Ok(creds) => ApiResponse::ok(creds).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/admin/pollers
pub async fn list_pollers(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    ApiResponse::ok(state.supervisor.phases().await).into_response()
}
