//! MeshGate filter server
//!
//! Userspace receive loop that:
//! - Listens on the mesh UDP port
//! - Runs every datagram through the admission gate
//! - Forwards admitted datagrams, unchanged, to the decryption service
//! - Periodically sweeps expired sessions and logs counters

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::{FilterConfig, MeshGateConfig};
use crate::error::{NetworkError, Result};
use crate::protocol::{unix_now, AdmissionGate, FilterStats, SessionStore};

/// Receive buffer size; comfortably above header + max payload
const BUFFER_SIZE: usize = 2048;

/// Build the session table and gate described by `config`, installing its
/// static sessions
pub fn gate_from_config(config: &MeshGateConfig) -> Result<AdmissionGate> {
    let sessions = Arc::new(SessionStore::new(config.filter.session_capacity));
    let now = unix_now();

    for session in &config.sessions {
        if session.verified {
            sessions.install(
                session.session_id,
                session.mac_key.clone(),
                session.peer_identity_hash,
                now,
            )?;
        } else {
            sessions.install_pending(
                session.session_id,
                session.mac_key.clone(),
                session.peer_identity_hash,
                now,
            )?;
        }
    }

    Ok(AdmissionGate::new(
        sessions,
        Arc::new(FilterStats::new()),
        config.filter.policy(),
    ))
}

/// UDP front end for the admission gate
pub struct FilterServer {
    config: FilterConfig,
    socket: UdpSocket,
    gate: AdmissionGate,
}

impl FilterServer {
    /// Bind the listener described by `config`
    pub async fn new(config: FilterConfig, gate: AdmissionGate) -> Result<Self> {
        let bind_addr = config.listen_addr();
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| NetworkError::BindFailed {
            addr: bind_addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            "Filter listening on UDP {} (idle timeout {}s, capacity {})",
            bind_addr,
            config.idle_timeout,
            gate.sessions().capacity()
        );
        match config.forward_to {
            Some(addr) => tracing::info!("Admitted packets forwarded to {}", addr),
            None => tracing::warn!("No ForwardTo configured; admitted packets are counted and discarded"),
        }

        Ok(Self { config, socket, gate })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr().map_err(NetworkError::Io)?)
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = [0u8; BUFFER_SIZE];
        let mut sweep = ticker(self.config.sweep_interval);
        let mut report = ticker(self.config.stats_interval);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                        // ICMP errors surface here on some platforms; not fatal
                        Err(e) => tracing::debug!("UDP receive error: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    self.gate.sessions().sweep_expired(unix_now(), self.config.idle_timeout);
                }
                _ = report.tick() => {
                    let snap = self.gate.stats().snapshot();
                    tracing::info!(
                        admitted = snap.admitted,
                        malformed = snap.malformed,
                        no_session = snap.no_session,
                        unverified = snap.unverified,
                        expired = snap.expired,
                        replayed = snap.replayed,
                        auth_failed = snap.auth_failed,
                        sessions = self.gate.sessions().len(),
                        "Filter stats"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Filter server shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let Ok(admitted) = self.gate.admit_datagram(datagram, unix_now()) else {
            // Silent drop: nothing goes back to the sender
            return;
        };

        tracing::trace!(
            session = %admitted.session_id,
            seq = admitted.packet_seq,
            %from,
            "Packet admitted"
        );

        if let Some(target) = self.config.forward_to {
            if let Err(e) = self.socket.send_to(datagram, target).await {
                tracing::warn!("Forward to {} failed: {}", target, e);
            }
        }
    }
}

fn ticker(secs: u64) -> Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MacKey;
    use crate::error::MeshGateError;
    use crate::protocol::{seal_packet, Outcome, SessionId};

    const SID: SessionId = SessionId([0x42; 16]);

    async fn start() -> (Arc<FilterServer>, UdpSocket, watch::Sender<bool>) {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut config = MeshGateConfig::parse(
            "[Filter]\nListenAddress = 127.0.0.1\nListenPort = 0\n",
        )
        .unwrap();
        config.filter.forward_to = Some(sink.local_addr().unwrap());

        let gate = gate_from_config(&config).unwrap();
        gate.sessions()
            .install(SID, MacKey::new([9u8; 16]), 7, unix_now())
            .unwrap();

        let server = Arc::new(FilterServer::new(config.filter, gate).await.unwrap());
        let (tx, rx) = watch::channel(false);
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run(rx).await });

        (server, sink, tx)
    }

    #[tokio::test]
    async fn test_admitted_packet_forwarded_unchanged() {
        let (server, sink, _shutdown) = start().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();

        let packet = seal_packet(SID, 0, &MacKey::new([9u8; 16]), b"ciphertext").unwrap();
        peer.send_to(&packet, target).await.unwrap();

        let mut buf = [0u8; BUFFER_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), sink.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &packet[..]);
        assert_eq!(server.gate().stats().get(Outcome::Admitted), 1);
    }

    #[tokio::test]
    async fn test_forged_packet_not_forwarded() {
        let (server, sink, _shutdown) = start().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();

        let forged = seal_packet(SID, 0, &MacKey::new([1u8; 16]), b"ciphertext").unwrap();
        peer.send_to(&forged, target).await.unwrap();

        let mut buf = [0u8; BUFFER_SIZE];
        let forwarded =
            tokio::time::timeout(Duration::from_millis(300), sink.recv_from(&mut buf)).await;
        assert!(forwarded.is_err());

        // Nothing is sent back to the sender either
        let reply = tokio::time::timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await;
        assert!(reply.is_err());
        assert_eq!(server.gate().stats().get(Outcome::AuthFailed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = MeshGateConfig::parse("[Filter]\nListenAddress = 127.0.0.1\nListenPort = 0\n").unwrap();
        config.filter.forward_to = Some(sink.local_addr().unwrap());
        let gate = gate_from_config(&config).unwrap();
        let server = FilterServer::new(config.filter, gate).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { server.run(rx).await });
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_gate_from_config_installs_sessions() {
        let config = MeshGateConfig::parse(
            "[Filter]\nSessionCapacity = 1\n\
             [Session]\nSessionId = 000102030405060708090a0b0c0d0e0f\nMacKey = MDEyMzQ1Njc4OWFiY2RlZg==\nVerified = no\n",
        )
        .unwrap();
        let gate = gate_from_config(&config).unwrap();
        let id: SessionId = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert!(!gate.sessions().lookup(&id).unwrap().is_verified());
        assert_eq!(gate.sessions().capacity(), 1);
    }

    #[test]
    fn test_gate_from_config_over_capacity() {
        let config = MeshGateConfig::parse(
            "[Filter]\nSessionCapacity = 1\n\
             [Session]\nSessionId = 000102030405060708090a0b0c0d0e0f\nMacKey = MDEyMzQ1Njc4OWFiY2RlZg==\n\
             [Session]\nSessionId = 100102030405060708090a0b0c0d0e0f\nMacKey = MDEyMzQ1Njc4OWFiY2RlZg==\n",
        )
        .unwrap();
        assert!(matches!(
            gate_from_config(&config),
            Err(MeshGateError::Session(_))
        ));
    }
}
