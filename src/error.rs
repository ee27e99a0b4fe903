//! Error types for the MeshGate packet authentication engine
//!
//! Per-packet drop decisions are not errors: they are values (see
//! [`crate::protocol::admission::DropReason`]). The types here cover the
//! surrounding service: configuration, session provisioning, sockets.

use thiserror::Error;

/// Main error type for MeshGate
#[derive(Error, Debug)]
pub enum MeshGateError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session table errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Network errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid session id: {value}")]
    InvalidSessionId { value: String },

    #[error("Invalid address: {value}")]
    InvalidAddress { value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Hash input too long: {len} bytes exceeds bounded maximum of {max}")]
    InputTooLong { len: usize, max: usize },
}

/// Session table errors, reported to whoever provisions sessions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session table full ({capacity} rows); sweep expired sessions first")]
    CapacityExhausted { capacity: usize },

    #[error("Session {session_id} already installed")]
    DuplicateSession { session_id: String },

    #[error("Unknown session {session_id}")]
    UnknownSession { session_id: String },
}

/// Network-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshGateError {
    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected 16-byte base64-encoded key.",
                    field
                )
            }

            Self::Config(ConfigError::InvalidSessionId { value }) => {
                format!(
                    "Invalid session id '{}'. Expected 32 hex characters (16 bytes).",
                    value
                )
            }

            Self::Network(NetworkError::BindFailed { addr, .. }) => {
                format!(
                    "Could not bind {}.\n  \
                    Check that no other process holds UDP port 26970 and that the address is local.",
                    addr
                )
            }

            Self::Session(SessionError::CapacityExhausted { capacity }) => {
                format!(
                    "Session table is full ({} rows).\n  \
                    Raise SessionCapacity or revoke idle sessions.",
                    capacity
                )
            }

            _ => format!("{}", self),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::Network(_) => 3,
            Self::Session(_) => 4,
            Self::Crypto(_) => 5,
            Self::System(_) => 7,
        }
    }
}

/// Result type alias for MeshGate operations
pub type Result<T> = std::result::Result<T, MeshGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config: MeshGateError = ConfigError::MissingField {
            field: "ListenPort".to_string(),
        }
        .into();
        assert_eq!(config.exit_code(), 1);

        let full: MeshGateError = SessionError::CapacityExhausted { capacity: 4 }.into();
        assert_eq!(full.exit_code(), 4);
        assert!(full.user_message().contains("4 rows"));
    }
}
