use anyhow::{bail, Context, Result};
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use phantom_grid_common::{
    ports::{FAKE_PORTS, FALLBACK_PORTS},
    HONEYPOT_PORT, SPA_MAGIC_PORT, SPA_MODE_ASYMMETRIC, SPA_MODE_DYNAMIC, SPA_MODE_STATIC,
    SPA_STATIC_TOKEN, SPA_WHITELIST_DURATION_SECS,
};

pub const PUBLIC_KEY_FILE: &str = "spa_public.key";
pub const TOTP_SECRET_FILE: &str = "totp_secret.txt";
pub const HMAC_SECRET_FILE: &str = "hmac_secret.key";

/// SPA authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpaMode {
    /// Legacy static token (backward compatible).
    Static,
    /// TOTP + HMAC-SHA256 shared secret.
    Dynamic,
    /// TOTP + Ed25519 signature (recommended).
    Asymmetric,
}

impl SpaMode {
    pub fn as_map_value(self) -> u32 {
        match self {
            SpaMode::Static => SPA_MODE_STATIC,
            SpaMode::Dynamic => SPA_MODE_DYNAMIC,
            SpaMode::Asymmetric => SPA_MODE_ASYMMETRIC,
        }
    }
}

impl fmt::Display for SpaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaMode::Static => write!(f, "static"),
            SpaMode::Dynamic => write!(f, "dynamic"),
            SpaMode::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub interface: Option<String>,
    pub spa: SpaConfig,
    pub honeypot: HoneypotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpaConfig {
    pub mode: SpaMode,
    pub key_dir: PathBuf,
    pub magic_port: u16,
    pub static_token: String,
    pub totp_time_step: u32,
    pub totp_tolerance: u32,
    pub replay_window_seconds: u64,
    pub replay_max_entries: usize,
    pub whitelist_duration_seconds: u64,
    pub clock_skew_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HoneypotConfig {
    pub port: u16,
    pub fake_ports: Vec<u16>,
    pub fallback_ports: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub audit_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            spa: SpaConfig::default(),
            honeypot: HoneypotConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SpaConfig {
    fn default() -> Self {
        Self {
            mode: SpaMode::Asymmetric,
            key_dir: PathBuf::from("./keys"),
            magic_port: SPA_MAGIC_PORT,
            static_token: String::from_utf8_lossy(SPA_STATIC_TOKEN).into_owned(),
            totp_time_step: 30,
            totp_tolerance: 1,
            replay_window_seconds: 60,
            replay_max_entries: 1024,
            whitelist_duration_seconds: SPA_WHITELIST_DURATION_SECS,
            clock_skew_seconds: 300,
        }
    }
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            port: HONEYPOT_PORT,
            fake_ports: FAKE_PORTS.to_vec(),
            fallback_ports: FALLBACK_PORTS.to_vec(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { audit_dir: PathBuf::from("logs") }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Missing config file falls back to built-in defaults; a present but
    /// malformed file is a startup error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for &port in &self.honeypot.fake_ports {
            if port == 0 {
                bail!("invalid fake port: 0");
            }
            if !seen.insert(port) {
                bail!("duplicate fake port: {port}");
            }
        }
        if self.honeypot.port == 0 {
            bail!("invalid honeypot port: 0");
        }
        if self.spa.totp_time_step == 0 {
            bail!("totp_time_step must be non-zero");
        }
        if self.spa.whitelist_duration_seconds == 0 {
            bail!("whitelist duration must be non-zero");
        }
        if self.spa.static_token.is_empty() {
            bail!("static token must not be empty");
        }
        if self.spa.static_token.as_bytes()[0] == 1 {
            bail!("static token must not begin with the dynamic version byte");
        }
        Ok(())
    }
}

/// Key material loaded once at startup. The private half of the Ed25519 pair
/// stays with the knock client; the server only ever sees the public key.
#[derive(Clone)]
pub struct SpaKeys {
    pub totp_secret: Vec<u8>,
    pub hmac_secret: Option<Vec<u8>>,
    pub public_key: Option<VerifyingKey>,
}

impl SpaKeys {
    /// Loads whatever material the configured mode requires. Missing
    /// required files are fatal; static mode needs none.
    pub fn load(spa: &SpaConfig, totp_override: Option<&str>) -> Result<Self> {
        if spa.mode == SpaMode::Static {
            return Ok(Self { totp_secret: Vec::new(), hmac_secret: None, public_key: None });
        }

        let totp_secret = match totp_override {
            Some(value) => decode_totp_secret(value.as_bytes())?,
            None => {
                let path = spa.key_dir.join(TOTP_SECRET_FILE);
                let raw = fs::read(&path)
                    .with_context(|| format!("Failed to read TOTP secret: {}", path.display()))?;
                decode_totp_secret(&raw)?
            }
        };

        let hmac_secret = if spa.mode == SpaMode::Dynamic {
            let path = spa.key_dir.join(HMAC_SECRET_FILE);
            let raw = fs::read(&path)
                .with_context(|| format!("Failed to read HMAC secret: {}", path.display()))?;
            let secret = strip_trailing(&raw);
            if secret.is_empty() || secret.len() > 32 {
                bail!("HMAC secret must be 1..=32 bytes, got {}", secret.len());
            }
            Some(secret.to_vec())
        } else {
            None
        };

        let public_key = if spa.mode == SpaMode::Asymmetric {
            let path = spa.key_dir.join(PUBLIC_KEY_FILE);
            let raw = fs::read(&path)
                .with_context(|| format!("Failed to read public key: {}", path.display()))?;
            let bytes: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("invalid public key size: expected 32, got {}", raw.len()))?;
            Some(VerifyingKey::from_bytes(&bytes).context("invalid Ed25519 public key")?)
        } else {
            None
        };

        Ok(Self { totp_secret, hmac_secret, public_key })
    }
}

fn strip_trailing(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], 0 | b'\r' | b'\n') {
        end -= 1;
    }
    &raw[..end]
}

/// The secret file holds either base64 text or raw bytes; trailing
/// NUL/CR/LF are stripped before interpretation.
pub fn decode_totp_secret(raw: &[u8]) -> Result<Vec<u8>> {
    let trimmed = strip_trailing(raw);
    if trimmed.is_empty() {
        bail!("TOTP secret is empty");
    }

    let secret = match std::str::from_utf8(trimmed)
        .ok()
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
    {
        Some(decoded) => decoded,
        None => trimmed.to_vec(),
    };

    if secret.len() > 32 {
        bail!("TOTP secret too long: {} bytes (max 32)", secret.len());
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn totp_secret_base64_is_decoded() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"supersecret");
        let secret = decode_totp_secret(encoded.as_bytes()).unwrap();
        assert_eq!(secret, b"supersecret");
    }

    #[test]
    fn totp_secret_trailing_newline_is_stripped() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"supersecret");
        let secret = decode_totp_secret(format!("{encoded}\r\n").as_bytes()).unwrap();
        assert_eq!(secret, b"supersecret");
    }

    #[test]
    fn totp_secret_raw_bytes_pass_through() {
        let secret = decode_totp_secret(b"\xff\xfe\xfd\x01secret\n").unwrap();
        assert_eq!(secret, b"\xff\xfe\xfd\x01secret");
    }

    #[test]
    fn totp_secret_over_32_bytes_is_rejected() {
        assert!(decode_totp_secret(&[0x7f; 33]).is_err());
    }

    #[test]
    fn duplicate_fake_ports_are_rejected() {
        let mut config = Config::default();
        config.honeypot.fake_ports.push(80);
        assert!(config.validate().is_err());
    }

    #[test]
    fn static_token_starting_with_version_byte_is_rejected() {
        let mut config = Config::default();
        config.spa.static_token = "\u{1}boom".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_mode() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.spa.mode, SpaMode::Asymmetric);
        assert_eq!(parsed.honeypot.port, HONEYPOT_PORT);
    }

    #[test]
    fn static_mode_needs_no_key_files() {
        let spa = SpaConfig { mode: SpaMode::Static, ..SpaConfig::default() };
        let keys = SpaKeys::load(&spa, None).unwrap();
        assert!(keys.totp_secret.is_empty());
    }

    #[test]
    fn totp_override_skips_key_files() {
        let spa = SpaConfig {
            mode: SpaMode::Dynamic,
            key_dir: PathBuf::from("/nonexistent"),
            ..SpaConfig::default()
        };
        // The HMAC secret file is still required in dynamic mode.
        assert!(SpaKeys::load(&spa, Some("c2VjcmV0")).is_err());
    }

    #[test]
    fn base64_raw_decode_ambiguity_prefers_base64() {
        // "secret" is itself valid base64; the decoded form wins.
        let secret = decode_totp_secret(b"c2VjcmV0").unwrap();
        assert_eq!(secret, b"secret");
    }
}
