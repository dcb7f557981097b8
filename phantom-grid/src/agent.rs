//! Wires the subsystems together: kernel hooks, SPA listener, counter
//! monitor, and the deception server, with a watch channel carrying the
//! shutdown signal to every task.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use phantom_grid_common::ports::CRITICAL_PORTS;

use crate::config::{Config, SpaKeys};
use crate::ebpf_manager::EbpfManager;
use crate::honeypot::Honeypot;
use crate::logger::{AuditLog, EventKind, LogSink};
use crate::monitor::StatsMonitor;
use crate::network;
use crate::spa::{SpaHandler, Verifier};

pub struct Agent {
    honeypot: Honeypot,
    session_stats: Arc<crate::honeypot::SessionStats>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    log: LogSink,
    // Dropping the manager detaches the hooks and closes the maps, so it
    // lives as long as the agent.
    _maps: Arc<Mutex<EbpfManager>>,
}

impl Agent {
    pub async fn start(config: Config, keys: SpaKeys, log: LogSink, audit: AuditLog) -> Result<Self> {
        let interface = network::detect_interface(config.interface.as_deref())?;

        let mut manager = EbpfManager::new(&interface)
            .with_context(|| format!("failed to arm kernel path on '{interface}'"))?;
        manager
            .load_spa_config(&config.spa, &keys)
            .context("failed to mirror SPA config into kernel maps")?;
        let dlp_active = manager.egress_active();
        let maps = Arc::new(Mutex::new(manager));

        log.event(EventKind::System, format!("Kernel hooks attached to interface: {interface}"));
        if dlp_active {
            log.event(EventKind::System, "TC egress hook attached (DLP active)");
        }
        log.event(
            EventKind::System,
            format!(
                "{} critical ports gated behind SPA (knock port {})",
                CRITICAL_PORTS.len(),
                config.spa.magic_port
            ),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let monitor = StatsMonitor::new(Arc::clone(&maps), log.clone());
        tasks.push(tokio::spawn(monitor.run(shutdown_rx.clone())));

        let verifier = Verifier::new(&config.spa, keys);
        let handler = SpaHandler::bind(&config.spa, verifier, Arc::clone(&maps), log.clone())
            .await
            .context("failed to start SPA handler")?;
        tasks.push(tokio::spawn(handler.run(shutdown_rx.clone())));

        let mut honeypot = Honeypot::new(config.honeypot.clone(), log.clone(), audit);
        honeypot.start().await.context("failed to start honeypot")?;
        let session_stats = honeypot.stats();

        Ok(Self { honeypot, session_stats, shutdown_tx, tasks, log, _maps: maps })
    }

    /// Stops accepting knocks and connections, lets the tasks drain
    /// briefly, and detaches the kernel hooks on drop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.honeypot.shutdown();

        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(2), &mut task).await.is_err() {
                task.abort();
            }
        }

        let sessions = self.session_stats.snapshot();
        self.log.event(
            EventKind::System,
            format!(
                "Phantom Grid stopped ({} honeypot connections, {} commands observed)",
                sessions.honeypot_conns, sessions.total_commands
            ),
        );
    }
}
