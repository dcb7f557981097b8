//! Dynamic knock packet wire format.
//!
//! ```text
//! offset 0      1      2..10        10..14   14..14+P        14+P..
//!        version mode  timestamp BE totp BE  random padding  signature
//! ```
//!
//! The signature covers everything before itself: header and padding. The
//! padding length varies per packet (16..=64 bytes) so knocks never have a
//! recognizable size on the wire.

use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

use super::totp;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_SIZE: usize = 14;
pub const HMAC_SIGNATURE_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;
pub const MIN_PADDING: usize = 16;
pub const MAX_PADDING: usize = 64;

pub const VERSION: u8 = 1;
pub const MODE_HMAC: u8 = 1;
pub const MODE_ED25519: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("unknown SPA mode: {0}")]
    UnknownMode(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaPacket {
    pub version: u8,
    pub mode: u8,
    pub timestamp: i64,
    pub totp: u32,
    pub padding: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SpaPacket {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::TooShort(data.len()));
        }

        let mode = data[1];
        let signature_size = match mode {
            MODE_HMAC => HMAC_SIGNATURE_SIZE,
            MODE_ED25519 => ED25519_SIGNATURE_SIZE,
            other => return Err(ParseError::UnknownMode(other)),
        };
        if data.len() < HEADER_SIZE + signature_size {
            return Err(ParseError::TooShort(data.len()));
        }

        let timestamp = i64::from_be_bytes(data[2..10].try_into().unwrap());
        let totp = u32::from_be_bytes(data[10..14].try_into().unwrap());
        let signature_start = data.len() - signature_size;

        Ok(Self {
            version: data[0],
            mode,
            timestamp,
            totp,
            padding: data[HEADER_SIZE..signature_start].to_vec(),
            signature: data[signature_start..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.padding.len() + self.signature.len());
        out.push(self.version);
        out.push(self.mode);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.totp.to_be_bytes());
        out.extend_from_slice(&self.padding);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Length of the signed prefix: header plus padding.
    pub fn signed_len(&self) -> usize {
        HEADER_SIZE + self.padding.len()
    }

    /// Anti-replay key: timestamp, TOTP, and the leading signature bytes.
    pub fn nonce(&self) -> (i64, u32, [u8; 8]) {
        let mut prefix = [0u8; 8];
        let take = self.signature.len().min(8);
        prefix[..take].copy_from_slice(&self.signature[..take]);
        (self.timestamp, self.totp, prefix)
    }
}

fn unsigned_packet(mode: u8, totp_secret: &[u8], time_step: u32, timestamp: i64) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let padding_len = rng.gen_range(MIN_PADDING..=MAX_PADDING);

    let mut packet = Vec::with_capacity(HEADER_SIZE + padding_len + ED25519_SIGNATURE_SIZE);
    packet.push(VERSION);
    packet.push(mode);
    packet.extend_from_slice(&timestamp.to_be_bytes());
    packet.extend_from_slice(&totp::totp(totp_secret, time_step, timestamp).to_be_bytes());
    let mut padding = vec![0u8; padding_len];
    rng.fill(padding.as_mut_slice());
    packet.extend_from_slice(&padding);
    packet
}

/// Knock signed with HMAC-SHA256 (dynamic mode). Used by the client side
/// and the verification tests.
pub fn build_hmac_packet(hmac_secret: &[u8], totp_secret: &[u8], time_step: u32, timestamp: i64) -> Vec<u8> {
    let mut packet = unsigned_packet(MODE_HMAC, totp_secret, time_step, timestamp);
    let mut mac = HmacSha256::new_from_slice(hmac_secret).expect("HMAC accepts keys of any length");
    mac.update(&packet);
    packet.extend_from_slice(&mac.finalize().into_bytes());
    packet
}

/// Knock signed with Ed25519 (asymmetric mode).
pub fn build_ed25519_packet(signing_key: &SigningKey, totp_secret: &[u8], time_step: u32, timestamp: i64) -> Vec<u8> {
    let mut packet = unsigned_packet(MODE_ED25519, totp_secret, time_step, timestamp);
    let signature = signing_key.sign(&packet);
    packet.extend_from_slice(&signature.to_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(padding_len: usize, mode: u8, signature_size: usize) -> SpaPacket {
        SpaPacket {
            version: VERSION,
            mode,
            timestamp: 1_700_000_123,
            totp: 287082,
            padding: (0..padding_len).map(|i| i as u8).collect(),
            signature: vec![0xab; signature_size],
        }
    }

    #[test]
    fn round_trip_over_the_padding_range() {
        for padding_len in MIN_PADDING..=MAX_PADDING {
            let packet = sample(padding_len, MODE_ED25519, ED25519_SIGNATURE_SIZE);
            let parsed = SpaPacket::parse(&packet.encode()).unwrap();
            assert_eq!(parsed, packet);
        }
    }

    #[test]
    fn round_trip_hmac_mode() {
        let packet = sample(32, MODE_HMAC, HMAC_SIGNATURE_SIZE);
        assert_eq!(SpaPacket::parse(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn header_alone_is_too_short() {
        let err = SpaPacket::parse(&[VERSION, MODE_HMAC, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ParseError::TooShort(14));
    }

    #[test]
    fn truncated_header_is_too_short() {
        assert_eq!(SpaPacket::parse(&[VERSION, MODE_HMAC, 9]).unwrap_err(), ParseError::TooShort(3));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut data = sample(16, MODE_HMAC, HMAC_SIGNATURE_SIZE).encode();
        data[1] = 9;
        assert_eq!(SpaPacket::parse(&data).unwrap_err(), ParseError::UnknownMode(9));
    }

    #[test]
    fn built_packets_parse_with_expected_fields() {
        let data = build_hmac_packet(b"hmac-key", b"totp-key", 30, 1_700_000_000);
        let packet = SpaPacket::parse(&data).unwrap();
        assert_eq!(packet.version, VERSION);
        assert_eq!(packet.mode, MODE_HMAC);
        assert_eq!(packet.timestamp, 1_700_000_000);
        assert!((MIN_PADDING..=MAX_PADDING).contains(&packet.padding.len()));
        assert_eq!(packet.signature.len(), HMAC_SIGNATURE_SIZE);
    }

    #[test]
    fn nonce_takes_leading_signature_bytes() {
        let packet = sample(16, MODE_ED25519, ED25519_SIGNATURE_SIZE);
        let (ts, code, prefix) = packet.nonce();
        assert_eq!(ts, packet.timestamp);
        assert_eq!(code, packet.totp);
        assert_eq!(prefix, [0xab; 8]);
    }
}
