//! Knock client: builds one SPA datagram and fires it at the magic port.
//! No response ever comes back; success shows up as the protected ports
//! answering for the next thirty seconds.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use ed25519_dalek::SigningKey;
use std::net::UdpSocket;
use std::path::PathBuf;

use phantom_grid::config::{decode_totp_secret, SpaMode, HMAC_SECRET_FILE, TOTP_SECRET_FILE};
use phantom_grid::spa::packet::{build_ed25519_packet, build_hmac_packet};
use phantom_grid_common::{SPA_MAGIC_PORT, SPA_STATIC_TOKEN, SPA_WHITELIST_DURATION_SECS};

const PRIVATE_KEY_FILE: &str = "spa_private.key";

#[derive(Parser, Debug)]
#[command(author, version, about = "Phantom Grid SPA knock client", long_about = None)]
struct Args {
    /// Server to knock on
    server: String,

    /// Knock port on the server
    #[arg(short, long, default_value_t = SPA_MAGIC_PORT)]
    port: u16,

    /// SPA mode the server is running in
    #[arg(short, long, value_enum, default_value_t = SpaMode::Static)]
    mode: SpaMode,

    /// Private key file (asymmetric) or HMAC secret file (dynamic);
    /// auto-detected from ./keys and ~/.phantom-grid if omitted
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// TOTP secret file; auto-detected like --key
    #[arg(short, long)]
    totp: Option<PathBuf>,

    /// TOTP time step in seconds
    #[arg(long, default_value_t = 30)]
    time_step: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let payload = match args.mode {
        SpaMode::Static => SPA_STATIC_TOKEN.to_vec(),
        SpaMode::Dynamic => {
            let secret_path = locate(args.key.as_deref(), HMAC_SECRET_FILE)?;
            let mut hmac_secret = std::fs::read(&secret_path)
                .with_context(|| format!("failed to read HMAC secret: {}", secret_path.display()))?;
            // Strip the same trailing bytes the server's loader strips.
            while matches!(hmac_secret.last(), Some(0 | b'\r' | b'\n')) {
                hmac_secret.pop();
            }
            let totp_secret = load_totp_secret(args.totp.as_deref())?;
            build_hmac_packet(&hmac_secret, &totp_secret, args.time_step, Utc::now().timestamp())
        }
        SpaMode::Asymmetric => {
            let key_path = locate(args.key.as_deref(), PRIVATE_KEY_FILE)?;
            let raw = std::fs::read(&key_path)
                .with_context(|| format!("failed to read private key: {}", key_path.display()))?;
            let bytes: [u8; 64] = raw.as_slice().try_into().map_err(|_| {
                anyhow::anyhow!("invalid private key size: expected 64, got {}", raw.len())
            })?;
            let signing_key = SigningKey::from_keypair_bytes(&bytes)
                .context("invalid Ed25519 keypair bytes")?;
            let totp_secret = load_totp_secret(args.totp.as_deref())?;
            build_ed25519_packet(&signing_key, &totp_secret, args.time_step, Utc::now().timestamp())
        }
    };

    println!(
        "[*] Sending {} SPA packet to {}:{} ({} bytes)...",
        args.mode,
        args.server,
        args.port,
        payload.len()
    );

    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind local socket")?;
    socket
        .send_to(&payload, (args.server.as_str(), args.port))
        .context("failed to send knock")?;

    println!("[+] Knock sent. No reply is expected.");
    println!(
        "[+] If the knock verified, your IP is whitelisted for {} seconds.",
        SPA_WHITELIST_DURATION_SECS
    );
    Ok(())
}

/// Explicit path, else ./keys/<name>, else ~/.phantom-grid/<name>.
fn locate(explicit: Option<&std::path::Path>, name: &str) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let mut candidates = vec![PathBuf::from("./keys").join(name)];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".phantom-grid").join(name));
    }
    for candidate in &candidates {
        if candidate.exists() {
            println!("[*] Auto-detected {}: {}", name, candidate.display());
            return Ok(candidate.clone());
        }
    }
    bail!(
        "{name} not found; searched {}. Use --key/--totp to point at it.",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn load_totp_secret(explicit: Option<&std::path::Path>) -> Result<Vec<u8>> {
    let path = locate(explicit, TOTP_SECRET_FILE)?;
    let raw = std::fs::read(&path)
        .with_context(|| format!("failed to read TOTP secret: {}", path.display()))?;
    decode_totp_secret(&raw)
}
