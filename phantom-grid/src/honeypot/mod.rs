pub mod banners;
pub mod ftp;
pub mod http;
pub mod mysql;
pub mod redis;
pub mod ssh;
pub mod telnet;
pub mod vfs;

use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::HoneypotConfig;
use crate::logger::{clock_tag, AuditLog, EventKind, LogSink};

/// Service catalog for The Mirage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Ssh,
    Http,
    Mysql,
    Redis,
    Ftp,
    Telnet,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Ssh,
        ServiceKind::Http,
        ServiceKind::Mysql,
        ServiceKind::Redis,
        ServiceKind::Ftp,
        ServiceKind::Telnet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Ssh => "ssh",
            ServiceKind::Http => "http",
            ServiceKind::Mysql => "mysql",
            ServiceKind::Redis => "redis",
            ServiceKind::Ftp => "ftp",
            ServiceKind::Telnet => "telnet",
        }
    }

    /// Deterministic service for a port the attacker actually dialed.
    pub fn by_port(port: u16) -> Option<ServiceKind> {
        match port {
            80 | 443 | 8080 | 8443 | 8000 | 8888 | 9200 | 5601 | 3000 | 5000 => {
                Some(ServiceKind::Http)
            }
            3306 | 5432 | 1433 | 1521 | 27017 | 27018 => Some(ServiceKind::Mysql),
            6379 | 11211 => Some(ServiceKind::Redis),
            21 => Some(ServiceKind::Ftp),
            23 => Some(ServiceKind::Telnet),
            3389 | 5900 => Some(ServiceKind::Ssh),
            _ => None,
        }
    }

    pub fn random() -> ServiceKind {
        *Self::ALL.choose(&mut rand::thread_rng()).unwrap_or(&ServiceKind::Ssh)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub honeypot_conns: u64,
    pub active_sessions: u64,
    pub total_commands: u64,
}

/// Connection statistics shared with external observers. Writers take the
/// lock briefly; readers may hold the read side.
#[derive(Default)]
pub struct SessionStats {
    inner: RwLock<StatsSnapshot>,
}

impl SessionStats {
    pub fn connection_opened(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.honeypot_conns += 1;
            stats.active_sessions += 1;
        }
    }

    pub fn connection_closed(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.active_sessions = stats.active_sessions.saturating_sub(1);
        }
    }

    pub fn command_seen(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.total_commands += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.read().map(|s| *s).unwrap_or_default()
    }
}

/// Everything an emulator session needs to talk to the rest of the system.
#[derive(Clone)]
pub struct SessionContext {
    pub peer_ip: String,
    pub log: LogSink,
    pub audit: AuditLog,
    pub stats: Arc<SessionStats>,
}

impl SessionContext {
    /// Timestamped line on the operator channel.
    pub fn log_line(&self, message: impl AsRef<str>) {
        self.log.send(format!("[{}] {}", clock_tag(), message.as_ref()));
    }

    /// Attacker input: operator line, audit record, command counter.
    pub fn command(&self, line: impl AsRef<str>, audit_entry: impl AsRef<str>) {
        self.log_line(line);
        self.audit.record(&self.peer_ip, audit_entry.as_ref());
        self.stats.command_seen();
    }
}

/// Longest input line an emulator will buffer.
pub(crate) const MAX_LINE: u64 = 4096;

/// Bounded line reader shared by the line-oriented emulators. Returns
/// trimmed lines; binary junk is lossily decoded rather than failing the
/// session.
pub(crate) struct LineReader<R> {
    inner: tokio::io::Take<tokio::io::BufReader<R>>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(read_half: R) -> Self {
        use tokio::io::AsyncReadExt;
        Self {
            inner: tokio::io::BufReader::new(read_half).take(MAX_LINE),
            buf: Vec::new(),
        }
    }

    /// None on EOF.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        use tokio::io::AsyncBufReadExt;
        self.buf.clear();
        self.inner.set_limit(MAX_LINE);
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).trim().to_string()))
    }
}

/// Small randomized pause before a response so sessions feel like a real
/// daemon under light load.
pub(crate) async fn realism_delay(min_ms: u64, max_ms: u64) {
    let ms = rand::Rng::gen_range(&mut rand::thread_rng(), min_ms..=max_ms);
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}

/// Dispatch a connection into the service's conversational state machine.
pub async fn run_service<S>(service: ServiceKind, stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match service {
        ServiceKind::Ssh => ssh::handle(stream, ctx).await,
        ServiceKind::Http => http::handle(stream, ctx).await,
        ServiceKind::Mysql => mysql::handle(stream, ctx).await,
        ServiceKind::Redis => redis::handle(stream, ctx).await,
        ServiceKind::Ftp => ftp::handle(stream, ctx).await,
        ServiceKind::Telnet => telnet::handle(stream, ctx).await,
    }
}

/// The port bank: one listener per fake port plus the fallback that
/// receives kernel-redirected traffic.
pub struct Honeypot {
    config: HoneypotConfig,
    log: LogSink,
    audit: AuditLog,
    stats: Arc<SessionStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl Honeypot {
    pub fn new(config: HoneypotConfig, log: LogSink, audit: AuditLog) -> Self {
        Self {
            config,
            log,
            audit,
            stats: Arc::new(SessionStats::default()),
            tasks: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut bound = 0usize;
        for &port in &self.config.fake_ports.clone() {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    self.log.event(EventKind::System, format!("Honeypot listening on port {port}"));
                    self.spawn_accept_loop(listener, port);
                    bound += 1;
                }
                Err(e) => {
                    self.log.send(format!(
                        "[WARN] Cannot bind port {port}: {e} (XDP will redirect to {})",
                        self.config.port
                    ));
                }
            }
        }

        self.bind_fallback().await?;

        self.log.event(
            EventKind::System,
            format!("Honeypot bound to {} ports ({bound} direct, 1 fallback) - The Mirage active", bound + 1),
        );
        Ok(())
    }

    async fn bind_fallback(&mut self) -> Result<()> {
        let port = self.config.port;
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                self.log.event(
                    EventKind::System,
                    format!("Honeypot listening on port {port} (fallback for redirected ports)"),
                );
                self.spawn_accept_loop(listener, port);
                return Ok(());
            }
            Err(e) => {
                self.log.send(format!("[ERROR] Cannot bind honeypot port {port}: {e}"));
                self.log.send(format!(
                    "[ERROR] Port {port} is required as the XDP redirect target!"
                ));
            }
        }

        for &alt in &self.config.fallback_ports.clone() {
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", alt)).await {
                self.log.send(format!(
                    "[WARN] Using alternative fallback port {alt} instead of {port}"
                ));
                self.log.send(format!(
                    "[WARN] CRITICAL: the kernel hook still redirects to port {port}; redirected traffic will NOT reach the honeypot. Testing only."
                ));
                self.spawn_accept_loop(listener, alt);
                return Ok(());
            }
        }

        bail!("failed to bind honeypot port {port} (XDP redirect target) and all alternatives")
    }

    fn spawn_accept_loop(&mut self, listener: TcpListener, port: u16) {
        let log = self.log.clone();
        let audit = self.audit.clone();
        let stats = Arc::clone(&self.stats);
        let honeypot_port = self.config.port;

        self.tasks.push(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let ctx_log = log.clone();
                        let ctx_audit = audit.clone();
                        let ctx_stats = Arc::clone(&stats);
                        tokio::spawn(async move {
                            handle_connection(stream, port, honeypot_port, ctx_log, ctx_audit, ctx_stats)
                                .await;
                        });
                    }
                    Err(e) => {
                        log.send(format!("[ERROR] Honeypot accept error on port {port}: {e}"));
                    }
                }
            }
        }));
    }

    /// Aborting the accept loops closes the listeners; live sessions end
    /// when their sockets do.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    port: u16,
    honeypot_port: u16,
    log: LogSink,
    audit: AuditLog,
    stats: Arc<SessionStats>,
) {
    let peer_ip = match stream.peer_addr() {
        Ok(addr) => extract_ip(&addr.to_string()),
        Err(_) => return,
    };

    // The original destination is lost once the kernel rewrites to the
    // fallback port, so those sessions draw a random service.
    let service = if port == honeypot_port {
        ServiceKind::random()
    } else {
        ServiceKind::by_port(port).unwrap_or_else(ServiceKind::random)
    };

    let ctx = SessionContext { peer_ip: peer_ip.clone(), log, audit, stats };
    ctx.stats.connection_opened();
    ctx.log_line(format!(
        "TRAP HIT! IP: {peer_ip} | Port: {port} | Service: {}",
        service.name().to_uppercase()
    ));
    ctx.audit.record(&peer_ip, &format!("TRAP_HIT_PORT_{port}"));

    let banner = banners::random_banner(service);
    if !banner.is_empty() && stream.write_all(banner.as_bytes()).await.is_err() {
        ctx.stats.connection_closed();
        return;
    }

    if let Err(e) = run_service(service, &mut stream, &ctx).await {
        log::debug!("session from {peer_ip} ended with error: {e:#}");
    }
    ctx.stats.connection_closed();
}

/// Peer IP from a socket address string, handling the bracketed IPv6 form.
pub fn extract_ip(remote: &str) -> String {
    if let Some(rest) = remote.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    remote.split(':').next().unwrap_or(remote).to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_selection_by_port_is_deterministic() {
        assert_eq!(ServiceKind::by_port(80), Some(ServiceKind::Http));
        assert_eq!(ServiceKind::by_port(443), Some(ServiceKind::Http));
        assert_eq!(ServiceKind::by_port(3306), Some(ServiceKind::Mysql));
        assert_eq!(ServiceKind::by_port(5432), Some(ServiceKind::Mysql));
        assert_eq!(ServiceKind::by_port(6379), Some(ServiceKind::Redis));
        assert_eq!(ServiceKind::by_port(11211), Some(ServiceKind::Redis));
        assert_eq!(ServiceKind::by_port(21), Some(ServiceKind::Ftp));
        assert_eq!(ServiceKind::by_port(23), Some(ServiceKind::Telnet));
        assert_eq!(ServiceKind::by_port(3389), Some(ServiceKind::Ssh));
        assert_eq!(ServiceKind::by_port(5900), Some(ServiceKind::Ssh));
        assert_eq!(ServiceKind::by_port(31337), None);
    }

    #[test]
    fn extract_ip_handles_both_address_families() {
        assert_eq!(extract_ip("10.0.0.5:43210"), "10.0.0.5");
        assert_eq!(extract_ip("[::1]:43210"), "::1");
        assert_eq!(extract_ip("[2001:db8::7]:80"), "2001:db8::7");
    }

    #[test]
    fn stats_track_session_lifecycle() {
        let stats = SessionStats::default();
        stats.connection_opened();
        stats.connection_opened();
        stats.command_seen();
        stats.connection_closed();

        let snap = stats.snapshot();
        assert_eq!(snap.honeypot_conns, 2);
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.total_commands, 1);
    }

    #[test]
    fn closing_more_than_opened_saturates_at_zero() {
        let stats = SessionStats::default();
        stats.connection_closed();
        assert_eq!(stats.snapshot().active_sessions, 0);
    }
}
