//! HTTP handlers for the authentication endpoint set.
//!
//! # Endpoints
//!
//! All paths are relative to the configured mount path (default `/auth/oauth`).
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/auth-request` | none | Authorization URL (out-of-band redirect) |
//! | `GET` | `/config` | admin | Stored provider configuration |
//! | `POST` | `/config` | admin | Replace the provider configuration |
//! | `POST` | `/login` | none | Exchange a code for a credential |
//! | `GET` | `/role/` | admin | List role names |
//! | `GET` | `/role/{name}` | admin | Read a role |
//! | `POST` | `/role/{name}` | admin | Create (or replace) a role |
//! | `PUT` | `/role/{name}` | admin | Merge fields into an existing role |
//! | `DELETE` | `/role/{name}` | admin | Delete a role |
//!
//! ## Login
//!
//! ```json
//! { "code": "<authorization code>", "redirect_uri": "http://127.0.0.1:4711/auth/oauth/cb", "role": "default" }
//! ```
//!
//! `redirect_uri` may be omitted for codes obtained through the out-of-band
//! URL returned by `auth-request`.
//!
//! ## Admin Authentication
//!
//! Config and role endpoints require `Authorization: Bearer <admin_token>`.
//! If no admin token is configured, they return `503 Service Unavailable`.
//!
//! Errors are returned as `{"errors": ["<message>"]}` with the status of
//! [`Error::status_code`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use oidc_login_core::{ClaimValue, RoleUpdate};
use serde::{Deserialize, Deserializer, de::Error as _};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::warn;

use super::{AuthBackend, RoleWrite, roles::normalize_name};
use crate::audit::{self, AuditEvent};
use crate::provider::ProviderConfig;
use crate::Error;

/// Shared state of the endpoint handlers
pub struct EndpointState {
    /// The authentication engine
    pub backend: Arc<AuthBackend>,
    /// Bearer token guarding config and role endpoints
    pub admin_token: Option<String>,
}

// ── Request types ─────────────────────────────────────────────────────────

/// `POST login` body
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Authorization code
    pub code: String,
    /// Redirect URI used in the authorization request
    pub redirect_uri: Option<String>,
    /// Role to authorize against
    pub role: String,
}

/// `POST|PUT role/{name}` body
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RoleRequest {
    /// Array of names or a comma-separated string
    #[serde(deserialize_with = "string_or_list")]
    pub policies: Option<Vec<String>>,
    /// Use limit of issued credentials
    pub num_uses: Option<i64>,
    /// Integer seconds or a duration string such as `"5m"`
    #[serde(deserialize_with = "wire_duration")]
    pub ttl: Option<Duration>,
    /// Integer seconds or a duration string such as `"1h"`
    #[serde(deserialize_with = "wire_duration")]
    pub max_ttl: Option<Duration>,
    /// Alias name claim
    pub user_claim: Option<String>,
    /// Email metadata claim
    pub email_claim: Option<String>,
    /// Given-name metadata claim
    pub given_name_claim: Option<String>,
    /// Required claim values
    pub bound_claims: Option<BTreeMap<String, ClaimValue>>,
}

impl From<RoleRequest> for RoleUpdate {
    fn from(req: RoleRequest) -> Self {
        Self {
            policies: req.policies,
            num_uses: req.num_uses,
            ttl: req.ttl,
            max_ttl: req.max_ttl,
            user_claim: req.user_claim,
            email_claim: req.email_claim,
            given_name_claim: req.given_name_claim,
            bound_claims: req.bound_claims,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<OneOrMany>::deserialize(d)?.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    Text(String),
}

fn wire_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    match Option::<WireDuration>::deserialize(d)? {
        None => Ok(None),
        Some(WireDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(WireDuration::Text(text)) => {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Ok(Some(Duration::from_secs(secs)));
            }
            humantime::parse_duration(text.trim())
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid duration {text:?}: {e}")))
        }
    }
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the endpoint routes, relative to the mount path
pub fn endpoint_routes(state: Arc<EndpointState>) -> Router {
    Router::new()
        .route("/auth-request", get(auth_request))
        .route("/config", get(read_config).post(write_config))
        .route("/login", post(login))
        .route("/role", get(list_roles))
        .route("/role/", get(list_roles))
        .route(
            "/role/{name}",
            get(read_role)
                .post(create_role)
                .put(update_role)
                .delete(delete_role),
        )
        .with_state(state)
}

/// Endpoint routes nested at `mount` with panic and trace layers
pub fn router(state: Arc<EndpointState>, mount: &str) -> Router {
    Router::new()
        .nest(mount, endpoint_routes(state))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `GET auth-request`
async fn auth_request(State(state): State<Arc<EndpointState>>) -> Response {
    match state.backend.auth_url().await {
        Ok(url) => Json(json!({"data": {"url": url.as_str()}})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET config`
async fn read_config(State(state): State<Arc<EndpointState>>, headers: HeaderMap) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }

    match state.backend.read_config().await {
        Ok(Some(config)) => Json(json!({"data": config})).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST config`
async fn write_config(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    body: Result<Json<ProviderConfig>, JsonRejection>,
) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }
    let Json(config) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    match state.backend.write_config(config).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, "Provider configuration rejected");
            error_response(&e)
        }
    }
}

/// `POST login`
async fn login(
    State(state): State<Arc<EndpointState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    match state
        .backend
        .login(&req.code, req.redirect_uri.as_deref(), &req.role)
        .await
    {
        Ok(credential) => Json(json!({"auth": credential})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET role/`
async fn list_roles(State(state): State<Arc<EndpointState>>, headers: HeaderMap) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }

    match state.backend.roles().list().await {
        Ok(keys) => Json(json!({"data": {"keys": keys}})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET role/{name}`
async fn read_role(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }

    match state.backend.roles().get(&name).await {
        Ok(Some(role)) => Json(json!({"data": role})).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST role/{name}`
async fn create_role(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    let result = state.backend.roles().create(&name, req.into()).await;
    role_write_response(&name, result)
}

/// `PUT role/{name}`
async fn update_role(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    let result = state.backend.roles().update(&name, req.into()).await;
    role_write_response(&name, result)
}

/// `DELETE role/{name}`
async fn delete_role(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(response) = check_admin_auth(&state, &headers) {
        return response;
    }

    match state.backend.roles().delete(&name).await {
        Ok(()) => {
            audit::emit(&AuditEvent::role_deleted(&normalize_name(&name)));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn role_write_response(name: &str, result: crate::Result<RoleWrite>) -> Response {
    match result {
        Ok(written) => {
            audit::emit(&AuditEvent::role_written(&normalize_name(name)));
            if written.warnings.is_empty() {
                StatusCode::NO_CONTENT.into_response()
            } else {
                Json(json!({"warnings": written.warnings})).into_response()
            }
        }
        Err(e) => error_response(&e),
    }
}

/// Check the `Authorization: Bearer <token>` header against the configured
/// admin token. Returns `Err(response)` if auth fails.
#[allow(clippy::result_large_err)]
fn check_admin_auth(state: &EndpointState, headers: &HeaderMap) -> Result<(), Response> {
    use subtle::ConstantTimeEq;

    let Some(ref admin_token) = state.admin_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"errors": ["admin token not configured; config and role endpoints disabled"]})),
        )
            .into_response());
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

    let matches = provided.is_some_and(|p| p.as_bytes().ct_eq(admin_token.as_bytes()).into());

    if matches {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            [("WWW-Authenticate", "Bearer")],
            Json(json!({"errors": ["permission denied"]})),
        )
            .into_response())
    }
}

/// JSON error response for `err`
fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"errors": [err.to_string()]}))).into_response()
}

fn rejection_response(rejection: &JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"errors": [rejection.body_text()]})),
    )
        .into_response()
}
