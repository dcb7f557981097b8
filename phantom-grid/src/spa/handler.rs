//! Userspace knock listener: receives UDP datagrams on the magic port,
//! runs the verification pipeline, and installs whitelist entries. Success
//! and failure are both silent on the wire; only the counters and the log
//! channel move.

use anyhow::{Context, Result};
use log::debug;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use super::replay::ReplayCache;
use super::verifier::{Verifier, VerifyError};
use crate::config::SpaConfig;
use crate::ebpf_manager::EbpfManager;
use crate::logger::{EventKind, LogSink};

/// Delay between the whitelist map write and the externally visible success
/// signal, so the kernel path observes the entry first.
const MAP_SYNC_DELAY: Duration = Duration::from_millis(100);

/// Receive timeout; bounds how long shutdown can go unnoticed.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SpaHandler {
    socket: UdpSocket,
    verifier: Verifier,
    maps: Arc<Mutex<EbpfManager>>,
    log: LogSink,
    replay: ReplayCache,
    static_token: Vec<u8>,
    whitelist_duration: u64,
}

impl SpaHandler {
    pub async fn bind(
        spa: &SpaConfig,
        verifier: Verifier,
        maps: Arc<Mutex<EbpfManager>>,
        log: LogSink,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", spa.magic_port))
            .await
            .with_context(|| format!("failed to listen on SPA port {}", spa.magic_port))?;

        log.event(
            EventKind::System,
            format!("SPA handler started on port {} (mode: {})", spa.magic_port, spa.mode),
        );

        Ok(Self {
            socket,
            verifier,
            maps,
            log,
            replay: ReplayCache::new(
                Duration::from_secs(spa.replay_window_seconds),
                spa.replay_max_entries,
            ),
            static_token: spa.static_token.clone().into_bytes(),
            whitelist_duration: spa.whitelist_duration_seconds,
        })
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; 1500];
        loop {
            if *shutdown.borrow() {
                break;
            }
            match timeout(READ_TIMEOUT, self.socket.recv_from(&mut buf)).await {
                Err(_) => continue, // timeout, re-check shutdown
                Ok(Err(e)) => {
                    self.log.event(EventKind::System, format!("SPA read error: {e}"));
                }
                Ok(Ok((len, peer))) => {
                    let data = buf[..len].to_vec();
                    self.process(&data, peer).await;
                }
            }
        }
        self.log.event(EventKind::System, "SPA handler stopping");
    }

    async fn process(&mut self, data: &[u8], peer: SocketAddr) {
        let IpAddr::V4(src) = peer.ip() else {
            debug!("[SPA] ignoring knock from non-IPv4 source {peer}");
            return;
        };

        debug!("[SPA] received packet from {src} (length: {} bytes)", data.len());

        if is_static_match(&self.static_token, data) {
            self.accept(src, "static token").await;
            return;
        }

        match self.verifier.verify(data) {
            Ok(packet) => {
                if self.replay.seen_or_insert(packet.nonce(), Instant::now()) {
                    self.reject(src, &VerifyError::Replay).await;
                    return;
                }
                self.accept(src, &format!("TOTP {}, timestamp {}", packet.totp, packet.timestamp))
                    .await;
            }
            Err(e) => self.reject(src, &e).await,
        }
    }

    async fn accept(&self, src: Ipv4Addr, detail: &str) {
        {
            let mut maps = self.maps.lock().await;
            if let Err(e) = maps.whitelist_ip(src, self.whitelist_duration) {
                self.log.event(EventKind::SpaFail, format!("failed to whitelist {src}: {e:#}"));
                return;
            }
        }

        // Let the map write land before anything acknowledges success.
        tokio::time::sleep(MAP_SYNC_DELAY).await;
        self.maps.lock().await.bump_spa_success();
        self.log.event(
            EventKind::SpaSuccess,
            format!("authenticated {src}, whitelisted for {} s ({detail})", self.whitelist_duration),
        );
    }

    async fn reject(&self, src: Ipv4Addr, reason: &VerifyError) {
        self.maps.lock().await.bump_spa_failed();
        self.log.event(EventKind::SpaFail, format!("rejected knock from {src}: {reason}"));
    }
}

/// Strict static match: exact length, byte-equal, and not shaped like a
/// dynamic packet (first byte is never the version byte).
fn is_static_match(token: &[u8], data: &[u8]) -> bool {
    data.len() == token.len() && data.first() != Some(&1) && data == token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_requires_exact_length() {
        let token = b"PHANTOM_GRID_SPA_2025";
        assert!(is_static_match(token, b"PHANTOM_GRID_SPA_2025"));
        assert!(!is_static_match(token, b"PHANTOM_GRID_SPA_2025\n"));
        assert!(!is_static_match(token, b"PHANTOM_GRID_SPA_202"));
        assert!(!is_static_match(token, b""));
    }

    #[test]
    fn version_byte_prefix_never_matches_static() {
        let token = [1u8, 2, 3];
        assert!(!is_static_match(&token, &[1u8, 2, 3]));
    }
}
