//! Configuration parsing for MeshGate
//!
//! This module handles parsing of MeshGate `.conf` configuration files.

mod parser;

pub use parser::{parse_key, parse_u64, FilterConfig, MeshGateConfig, SessionConfig};
