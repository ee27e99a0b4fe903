//! MeshGate - Fast-path packet authentication for the mesh data plane
//!
//! Sits in front of the decryption service and decides, per UDP datagram,
//! whether it is worth decrypting. Admission costs one session lookup and
//! one bounded SipHash-2-4 MAC; everything else is dropped silently and
//! counted.
//!
//! # Features
//!
//! - Bounds-checked parsing of the 30-byte authentication header
//! - Fixed-capacity concurrent session table with explicit exhaustion
//! - Per-session replay floor advanced by compare-and-swap
//! - Constant-time tag comparison
//! - Lock-free per-outcome counters
//! - Loopback REST API for session provisioning and telemetry
//!
//! # Usage
//!
//! ```no_run
//! use meshgate::{gate_from_config, FilterServer, MeshGateConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meshgate::MeshGateError> {
//!     let config = MeshGateConfig::from_file("meshgate.conf")?;
//!     let gate = gate_from_config(&config)?;
//!     let server = FilterServer::new(config.filter, gate).await?;
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     server.run(rx).await
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::MeshGateConfig;
pub use daemon::ControlApi;
pub use error::MeshGateError;
pub use protocol::{AdmissionGate, Admitted, DropReason, Outcome, SessionId, SessionStore};
pub use server::{gate_from_config, FilterServer};
