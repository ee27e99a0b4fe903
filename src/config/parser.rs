//! MeshGate configuration file parser
//!
//! Parses INI-style `.conf` files with one optional [Filter] section and any
//! number of [Session] sections for statically provisioned sessions.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::crypto::MacKey;
use crate::error::ConfigError;
use crate::protocol::admission::GatePolicy;
use crate::protocol::messages::{SessionId, MESH_PORT};
use crate::protocol::session::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_SESSION_CAPACITY};

/// Default interval between expired-session sweeps, in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default interval between stats log lines, in seconds
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// Complete MeshGate configuration
#[derive(Debug, Clone)]
pub struct MeshGateConfig {
    /// Filter (listener and policy) configuration
    pub filter: FilterConfig,
    /// Sessions to install at startup
    pub sessions: Vec<SessionConfig>,
}

/// Listener and admission policy settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Address to bind the UDP listener on
    pub listen_address: IpAddr,
    /// Mesh service port
    pub listen_port: u16,
    /// Idle threshold in seconds
    pub idle_timeout: u64,
    /// Session table capacity
    pub session_capacity: usize,
    /// Where admitted payloads are forwarded (decryption service)
    pub forward_to: Option<SocketAddr>,
    /// Seconds between expired-session sweeps
    pub sweep_interval: u64,
    /// Seconds between stats log lines
    pub stats_interval: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: MESH_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            session_capacity: DEFAULT_SESSION_CAPACITY,
            forward_to: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL_SECS,
            stats_interval: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl FilterConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    pub fn policy(&self) -> GatePolicy {
        GatePolicy {
            service_port: self.listen_port,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// A statically provisioned session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: SessionId,
    pub mac_key: MacKey,
    pub peer_identity_hash: u64,
    /// Install as pending (unverified) when false
    pub verified: bool,
}

impl MeshGateConfig {
    /// Parse a MeshGate configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse a MeshGate configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut filter = FilterConfig::default();
        let mut sessions: Vec<SessionConfig> = Vec::new();
        let mut current_section: Option<Section> = None;

        // Temporary storage for current session being parsed
        let mut current_session: Option<SessionBuilder> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1; // 1-indexed
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[filter]") {
                if let Some(session) = current_session.take() {
                    sessions.push(session.build()?);
                }
                current_section = Some(Section::Filter);
                continue;
            } else if line.eq_ignore_ascii_case("[session]") {
                if let Some(session) = current_session.take() {
                    sessions.push(session.build()?);
                }
                current_section = Some(Section::Session);
                current_session = Some(SessionBuilder::new());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Filter) => match key.as_str() {
                    "listenaddress" => {
                        filter.listen_address =
                            value.parse().map_err(|_| ConfigError::InvalidAddress {
                                value: value.to_string(),
                            })?;
                    }
                    "listenport" => {
                        filter.listen_port = parse_number(value, "ListenPort", line_num)?;
                    }
                    "idletimeout" => {
                        filter.idle_timeout = parse_number(value, "IdleTimeout", line_num)?;
                    }
                    "sessioncapacity" => {
                        filter.session_capacity =
                            parse_number(value, "SessionCapacity", line_num)?;
                    }
                    "forwardto" => {
                        filter.forward_to =
                            Some(value.parse().map_err(|_| ConfigError::InvalidAddress {
                                value: value.to_string(),
                            })?);
                    }
                    "sweepinterval" => {
                        filter.sweep_interval = parse_number(value, "SweepInterval", line_num)?;
                    }
                    "statsinterval" => {
                        filter.stats_interval = parse_number(value, "StatsInterval", line_num)?;
                    }
                    _ => {
                        // Unknown key, ignore (forward compatibility)
                        tracing::debug!("Unknown filter key: {}", key);
                    }
                },
                Some(Section::Session) => {
                    let session = current_session.as_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "Session value outside of [Session] section".to_string(),
                    })?;

                    match key.as_str() {
                        "sessionid" => {
                            session.session_id = Some(value.parse().map_err(|_| {
                                ConfigError::InvalidSessionId {
                                    value: value.to_string(),
                                }
                            })?);
                        }
                        "mackey" => {
                            session.mac_key = Some(parse_key(value, "MacKey")?);
                        }
                        "peeridentityhash" => {
                            session.peer_identity_hash = parse_u64(value).ok_or_else(|| {
                                ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid PeerIdentityHash: {}", value),
                                }
                            })?;
                        }
                        "verified" => {
                            session.verified = parse_bool(value).ok_or_else(|| {
                                ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid Verified: {}", value),
                                }
                            })?;
                        }
                        _ => {
                            tracing::debug!("Unknown session key: {}", key);
                        }
                    }
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        // Save any pending session
        if let Some(session) = current_session.take() {
            sessions.push(session.build()?);
        }

        if filter.session_capacity == 0 {
            return Err(ConfigError::MissingField {
                field: "SessionCapacity (must be at least 1)".to_string(),
            });
        }
        if filter.sweep_interval == 0 || filter.stats_interval == 0 {
            return Err(ConfigError::MissingField {
                field: "SweepInterval/StatsInterval (must be at least 1)".to_string(),
            });
        }

        Ok(MeshGateConfig { filter, sessions })
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Filter,
    Session,
}

/// Builder for SessionConfig during parsing
struct SessionBuilder {
    session_id: Option<SessionId>,
    mac_key: Option<MacKey>,
    peer_identity_hash: u64,
    verified: bool,
}

impl SessionBuilder {
    fn new() -> Self {
        Self {
            session_id: None,
            mac_key: None,
            peer_identity_hash: 0,
            verified: true,
        }
    }

    fn build(self) -> Result<SessionConfig, ConfigError> {
        let session_id = self.session_id.ok_or(ConfigError::MissingField {
            field: "SessionId in [Session]".to_string(),
        })?;
        let mac_key = self.mac_key.ok_or(ConfigError::MissingField {
            field: "MacKey in [Session]".to_string(),
        })?;

        Ok(SessionConfig {
            session_id,
            mac_key,
            peer_identity_hash: self.peer_identity_hash,
            verified: self.verified,
        })
    }
}

/// Parse a base64-encoded 16-byte MAC key
pub fn parse_key(value: &str, field_name: &str) -> Result<MacKey, ConfigError> {
    let bytes = BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })?;

    MacKey::from_slice(&bytes).ok_or(ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line,
        message: format!("Invalid {}: {}", field, value),
    })
}

/// Decimal or `0x`-prefixed hexadecimal u64
pub fn parse_u64(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
