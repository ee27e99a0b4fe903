//! Control and telemetry API for the filter
//!
//! The handshake service provisions sessions over a loopback REST API,
//! authenticated with a Bearer token written to a root-owned file.

pub mod auth;
pub mod routes;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::error::{NetworkError, Result};
use crate::protocol::AdmissionGate;

use auth::AuthState;
use routes::AppState;

/// Default loopback port for the control API
pub const DEFAULT_HTTP_PORT: u16 = 26971;

/// Loopback-only REST service in front of the gate's session table and stats
pub struct ControlApi {
    gate: AdmissionGate,
    auth: AuthState,
}

impl ControlApi {
    pub fn new(gate: AdmissionGate, auth: AuthState) -> Self {
        Self { gate, auth }
    }

    /// Generate a fresh token, write it to `token_path`, and build the API
    pub fn with_new_token(gate: AdmissionGate, token_path: Option<PathBuf>) -> Result<Self> {
        let token = auth::generate_token();
        auth::write_token_file(&token, token_path)?;
        Ok(Self::new(gate, AuthState::new(token)))
    }

    pub fn router(&self) -> axum::Router {
        routes::build_router(
            AppState {
                gate: self.gate.clone(),
            },
            self.auth.clone(),
        )
        .layer(TraceLayer::new_for_http())
    }

    /// Serve on 127.0.0.1:`port` until `shutdown` flips to true
    pub async fn run(&self, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let listener = TcpListener::bind(addr).await.map_err(|e| NetworkError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
            .map_err(NetworkError::Io)?;

        tracing::info!("Control API stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::protocol::{FilterStats, GatePolicy, SessionStore};

    fn gate() -> AdmissionGate {
        AdmissionGate::new(
            Arc::new(SessionStore::new(8)),
            Arc::new(FilterStats::new()),
            GatePolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_with_new_token_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-token");
        let api = ControlApi::with_new_token(gate(), Some(path.clone())).unwrap();

        let token = auth::read_token_file(Some(path)).unwrap();
        let response = api
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let api = ControlApi::new(gate(), AuthState::new("t".to_string()));
        let (tx, rx) = watch::channel(false);

        // Port 0 lets the OS pick a free loopback port
        let handle = tokio::spawn(async move { api.run(0, rx).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
