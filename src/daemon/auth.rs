//! Authentication for the control API
//!
//! Handles token generation, storage, and validation. The handshake service
//! reads the token file and presents it as a Bearer token.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Default token file path
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/meshgate/auth-token";

/// Authentication state shared across handlers
#[derive(Clone)]
pub struct AuthState {
    /// The valid authentication token
    token: Arc<String>,
}

impl AuthState {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Constant-time comparison against the configured token
    pub fn accepts(&self, candidate: &str) -> bool {
        let expected = self.token.as_bytes();
        let candidate = candidate.as_bytes();
        expected.len() == candidate.len() && bool::from(expected.ct_eq(candidate))
    }
}

/// Generate a cryptographically secure 32-byte token, base64-encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Write the token to the specified file, readable by owner and group only
pub fn write_token_file(token: &str, path: Option<PathBuf>) -> Result<PathBuf, std::io::Error> {
    let token_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH));

    if let Some(parent) = token_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&token_path, token)?;

    #[cfg(unix)]
    set_unix_permissions(&token_path)?;

    tracing::info!("Auth token written to {:?}", token_path);
    Ok(token_path)
}

/// 0o640: owner read/write, group read
#[cfg(unix)]
fn set_unix_permissions(path: &Path) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode(0o640);
    std::fs::set_permissions(path, permissions)?;
    tracing::debug!("Token file created with 0o640 permissions");
    Ok(())
}

/// Read token from file
pub fn read_token_file(path: Option<PathBuf>) -> Result<String, std::io::Error> {
    let token_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH));
    let token = std::fs::read_to_string(&token_path)?;
    Ok(token.trim().to_string())
}

/// Axum middleware for Bearer token authentication
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if auth_state.accepts(token) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Invalid auth token provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
