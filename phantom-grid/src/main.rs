use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio::signal;

use phantom_grid::agent::Agent;
use phantom_grid::config::{Config, SpaKeys, SpaMode};
use phantom_grid::logger::{AuditLog, LogSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Phantom Grid - Host-resident active defense appliance", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "phantom-grid.toml")]
    config: PathBuf,

    /// Network interface to attach the kernel hooks to (auto-detected if omitted)
    #[arg(short, long)]
    interface: Option<String>,

    /// SPA authentication mode
    #[arg(long, value_enum)]
    spa_mode: Option<SpaMode>,

    /// Directory holding the SPA key material
    #[arg(long)]
    spa_key_dir: Option<PathBuf>,

    /// TOTP shared secret (base64 or raw), overriding the secret file
    #[arg(long)]
    spa_totp_secret: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Phantom Grid v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(interface) = args.interface {
        config.interface = Some(interface);
    }
    if let Some(mode) = args.spa_mode {
        config.spa.mode = mode;
    }
    if let Some(key_dir) = args.spa_key_dir {
        config.spa.key_dir = key_dir;
    }
    config.validate()?;

    let keys = SpaKeys::load(&config.spa, args.spa_totp_secret.as_deref())?;

    let (log, mut log_rx) = LogSink::channel();
    let audit = AuditLog::new(config.logging.audit_dir.clone());

    // The core only produces log lines; dashboards and exporters are
    // external consumers of the same channel. The built-in consumer just
    // forwards to the process log.
    tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            info!("{line}");
        }
    });

    let agent = Agent::start(config, keys, log, audit).await?;

    info!("Phantom Grid is now running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;

    info!("Shutting down Phantom Grid...");
    agent.shutdown().await;
    info!("Phantom Grid stopped successfully");
    Ok(())
}
