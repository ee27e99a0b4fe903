//! REST API route handlers for the control/telemetry server
//!
//! The handshake service installs and revokes sessions here; the metrics
//! pipeline scrapes the outcome counters. MAC keys go in, never come out.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use super::auth::{auth_middleware, AuthState};
use crate::config::parse_key;
use crate::error::SessionError;
use crate::protocol::{unix_now, AdmissionGate, SessionId, SessionSummary, StatsSnapshot};

/// Shared application state for route handlers
#[derive(Clone)]
pub struct AppState {
    pub gate: AdmissionGate,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_params",
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let (status, code) = match err {
            SessionError::CapacityExhausted { .. } => (StatusCode::INSUFFICIENT_STORAGE, "capacity_exhausted"),
            SessionError::DuplicateSession { .. } => (StatusCode::CONFLICT, "duplicate_session"),
            SessionError::UnknownSession { .. } => (StatusCode::NOT_FOUND, "unknown_session"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Build the API router with all routes behind Bearer auth
pub fn build_router(state: AppState, auth: AuthState) -> Router {
    Router::new()
        // Telemetry
        .route("/api/v1/stats", get(handle_stats))
        // Session provisioning
        .route(
            "/api/v1/sessions",
            get(handle_list_sessions).post(handle_install_session),
        )
        .route("/api/v1/sessions/:id", delete(handle_revoke_session))
        .route("/api/v1/sessions/:id/verify", post(handle_verify_session))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub capacity: usize,
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Deserialize)]
pub struct InstallSessionRequest {
    /// 32 hex characters
    pub session_id: String,
    /// base64 of 16 bytes
    pub mac_key: String,
    #[serde(default)]
    pub peer_identity_hash: u64,
    #[serde(default = "default_verified")]
    pub verified: bool,
}

fn default_verified() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct InstallSessionResponse {
    pub session_id: String,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct RevokeSessionResponse {
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifySessionResponse {
    pub verified: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/stats - Outcome counters
pub async fn handle_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.gate.stats().snapshot())
}

/// GET /api/v1/sessions - Session table summary (no keys)
pub async fn handle_list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.gate.sessions();
    Json(ListSessionsResponse {
        capacity: sessions.capacity(),
        count: sessions.len(),
        sessions: sessions.summaries(),
    })
}

/// POST /api/v1/sessions - Install a session from the handshake service
pub async fn handle_install_session(
    State(state): State<AppState>,
    Json(req): Json<InstallSessionRequest>,
) -> Result<(StatusCode, Json<InstallSessionResponse>), ApiError> {
    let session_id = parse_session_id(&req.session_id)?;
    let mac_key = parse_key(&req.mac_key, "mac_key").map_err(|e| ApiError::bad_request(e.to_string()))?;

    let sessions = state.gate.sessions();
    if req.verified {
        sessions.install(session_id, mac_key, req.peer_identity_hash, unix_now())?;
    } else {
        sessions.install_pending(session_id, mac_key, req.peer_identity_hash, unix_now())?;
    }

    Ok((
        StatusCode::CREATED,
        Json(InstallSessionResponse {
            session_id: session_id.to_string(),
            verified: req.verified,
        }),
    ))
}

/// POST /api/v1/sessions/:id/verify - Mark a pending session verified
pub async fn handle_verify_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VerifySessionResponse>, ApiError> {
    let session_id = parse_session_id(&id)?;
    state.gate.sessions().mark_verified(&session_id, unix_now())?;
    Ok(Json(VerifySessionResponse { verified: true }))
}

/// DELETE /api/v1/sessions/:id - Revoke a session
pub async fn handle_revoke_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RevokeSessionResponse>, ApiError> {
    let session_id = parse_session_id(&id)?;
    state.gate.sessions().revoke(&session_id)?;
    Ok(Json(RevokeSessionResponse { revoked: true }))
}

fn parse_session_id(value: &str) -> Result<SessionId, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid session id: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::protocol::{FilterStats, GatePolicy, SessionStore};

    const TOKEN: &str = "test-token";
    const SID_HEX: &str = "000102030405060708090a0b0c0d0e0f";
    const KEY_B64: &str = "MDEyMzQ1Njc4OWFiY2RlZg==";

    fn router(capacity: usize) -> (Router, AdmissionGate) {
        let gate = AdmissionGate::new(
            Arc::new(SessionStore::new(capacity)),
            Arc::new(FilterStats::new()),
            GatePolicy::default(),
        );
        let app = build_router(AppState { gate: gate.clone() }, AuthState::new(TOKEN.to_string()));
        (app, gate)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", TOKEN));
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn install_body() -> serde_json::Value {
        serde_json::json!({
            "session_id": SID_HEX,
            "mac_key": KEY_B64,
            "peer_identity_hash": 77,
        })
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (app, _) = router(4);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (app, gate) = router(4);
        gate.admit_datagram(b"short", 0).unwrap_err();

        let response = app.oneshot(request("GET", "/api/v1/stats", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["malformed"], 1);
        assert_eq!(body["admitted"], 0);
    }

    #[tokio::test]
    async fn test_install_list_revoke() {
        let (app, gate) = router(4);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/sessions", Some(install_body())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id: SessionId = SID_HEX.parse().unwrap();
        assert!(gate.sessions().lookup(&id).unwrap().is_verified());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/sessions", None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["peer_identity_hash"], 77);
        assert!(!body.to_string().contains(KEY_B64));

        let uri = format!("/api/v1/sessions/{}", SID_HEX);
        let response = app.clone().oneshot(request("DELETE", &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(gate.sessions().is_empty());

        let response = app.oneshot(request("DELETE", &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_install_conflicts_and_capacity() {
        let (app, _) = router(1);

        let first = app
            .clone()
            .oneshot(request("POST", "/api/v1/sessions", Some(install_body())))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let dup = app
            .clone()
            .oneshot(request("POST", "/api/v1/sessions", Some(install_body())))
            .await
            .unwrap();
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        let other = serde_json::json!({ "session_id": "ff".repeat(16), "mac_key": KEY_B64 });
        let full = app
            .oneshot(request("POST", "/api/v1/sessions", Some(other)))
            .await
            .unwrap();
        assert_eq!(full.status(), StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(json_body(full).await["code"], "capacity_exhausted");
    }

    #[tokio::test]
    async fn test_pending_then_verify() {
        let (app, gate) = router(4);
        let mut body = install_body();
        body["verified"] = serde_json::Value::Bool(false);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id: SessionId = SID_HEX.parse().unwrap();
        assert!(!gate.sessions().lookup(&id).unwrap().is_verified());

        let uri = format!("/api/v1/sessions/{}/verify", SID_HEX);
        let response = app.oneshot(request("POST", &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(gate.sessions().lookup(&id).unwrap().is_verified());
    }

    #[tokio::test]
    async fn test_bad_input_rejected() {
        let (app, _) = router(4);
        let body = serde_json::json!({ "session_id": "nothex", "mac_key": KEY_B64 });
        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = serde_json::json!({ "session_id": SID_HEX, "mac_key": "dG9vIHNob3J0" });
        let response = app
            .oneshot(request("POST", "/api/v1/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
