//! Cryptographic verification of dynamic knock packets. Every check aborts
//! the pipeline on first failure; the caller decides how to count and log.

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::packet::{ParseError, SpaPacket, MODE_ED25519, MODE_HMAC, VERSION};
use super::totp;
use crate::config::{SpaConfig, SpaKeys};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unsupported packet version: {0}")]
    BadVersion(u8),
    #[error("timestamp outside clock-skew window: off by {0}s")]
    ClockSkew(i64),
    #[error("invalid TOTP")]
    BadTotp,
    #[error("{0} not configured")]
    MissingKey(&'static str),
    #[error("invalid HMAC signature")]
    BadHmac,
    #[error("invalid Ed25519 signature")]
    BadSignature,
    #[error("replayed nonce")]
    Replay,
}

pub struct Verifier {
    keys: SpaKeys,
    time_step: u32,
    tolerance: u32,
    clock_skew: i64,
}

impl Verifier {
    pub fn new(spa: &SpaConfig, keys: SpaKeys) -> Self {
        Self {
            keys,
            time_step: spa.totp_time_step,
            tolerance: spa.totp_tolerance,
            clock_skew: spa.clock_skew_seconds as i64,
        }
    }

    pub fn verify(&self, data: &[u8]) -> Result<SpaPacket, VerifyError> {
        self.verify_at(data, Utc::now().timestamp())
    }

    pub fn verify_at(&self, data: &[u8], now: i64) -> Result<SpaPacket, VerifyError> {
        let packet = SpaPacket::parse(data)?;

        if packet.version != VERSION {
            return Err(VerifyError::BadVersion(packet.version));
        }

        let skew = (now - packet.timestamp).abs();
        if skew > self.clock_skew {
            return Err(VerifyError::ClockSkew(skew));
        }

        if !totp::validate_at(&self.keys.totp_secret, self.time_step, self.tolerance, packet.totp, now) {
            return Err(VerifyError::BadTotp);
        }

        let signed = &data[..packet.signed_len()];
        match packet.mode {
            MODE_HMAC => {
                let secret = self
                    .keys
                    .hmac_secret
                    .as_deref()
                    .ok_or(VerifyError::MissingKey("HMAC secret"))?;
                let mut mac =
                    HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
                mac.update(signed);
                // verify_slice compares in constant time.
                mac.verify_slice(&packet.signature).map_err(|_| VerifyError::BadHmac)?;
            }
            MODE_ED25519 => {
                let key = self
                    .keys
                    .public_key
                    .as_ref()
                    .ok_or(VerifyError::MissingKey("public key"))?;
                let signature = Signature::from_slice(&packet.signature)
                    .map_err(|_| VerifyError::BadSignature)?;
                key.verify(signed, &signature).map_err(|_| VerifyError::BadSignature)?;
            }
            // Parse already rejected every other mode byte.
            _ => unreachable!("parse accepted an unknown mode"),
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spa::packet::{build_ed25519_packet, build_hmac_packet};
    use ed25519_dalek::SigningKey;

    const TOTP_SECRET: &[u8] = b"12345678901234567890";
    const HMAC_SECRET: &[u8] = b"a-32-byte-shared-hmac-secret!!!!";
    const NOW: i64 = 1_700_000_000;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn asymmetric_verifier() -> Verifier {
        let spa = SpaConfig::default();
        let keys = SpaKeys {
            totp_secret: TOTP_SECRET.to_vec(),
            hmac_secret: None,
            public_key: Some(signing_key().verifying_key()),
        };
        Verifier::new(&spa, keys)
    }

    fn hmac_verifier() -> Verifier {
        let spa = SpaConfig::default();
        let keys = SpaKeys {
            totp_secret: TOTP_SECRET.to_vec(),
            hmac_secret: Some(HMAC_SECRET.to_vec()),
            public_key: None,
        };
        Verifier::new(&spa, keys)
    }

    #[test]
    fn asymmetric_happy_path() {
        let data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW);
        let packet = asymmetric_verifier().verify_at(&data, NOW).unwrap();
        assert_eq!(packet.mode, MODE_ED25519);
        assert_eq!(packet.timestamp, NOW);
    }

    #[test]
    fn hmac_happy_path() {
        let data = build_hmac_packet(HMAC_SECRET, TOTP_SECRET, 30, NOW);
        let packet = hmac_verifier().verify_at(&data, NOW).unwrap();
        assert_eq!(packet.mode, MODE_HMAC);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mut data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW);
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::BadSignature)
        ));
    }

    #[test]
    fn tampered_hmac_is_rejected() {
        let mut data = build_hmac_packet(HMAC_SECRET, TOTP_SECRET, 30, NOW);
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(hmac_verifier().verify_at(&data, NOW), Err(VerifyError::BadHmac)));
    }

    #[test]
    fn wrong_hmac_key_is_rejected() {
        let data = build_hmac_packet(b"the-wrong-secret", TOTP_SECRET, 30, NOW);
        assert!(matches!(hmac_verifier().verify_at(&data, NOW), Err(VerifyError::BadHmac)));
    }

    #[test]
    fn wrong_totp_is_rejected() {
        // Signed correctly, but the TOTP belongs to a counter far outside
        // the tolerance window.
        let key = signing_key();
        let mut data = build_ed25519_packet(&key, TOTP_SECRET, 30, NOW);
        let bogus = crate::spa::totp::totp(TOTP_SECRET, 30, NOW - 3_600);
        data[10..14].copy_from_slice(&bogus.to_be_bytes());
        // Re-sign so only the TOTP check can fail.
        let signed_len = data.len() - 64;
        let signature = ed25519_dalek::Signer::sign(&key, &data[..signed_len]);
        data[signed_len..].copy_from_slice(&signature.to_bytes());

        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::BadTotp)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW - 301);
        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::ClockSkew(301))
        ));
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW + 400);
        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::ClockSkew(400))
        ));
    }

    #[test]
    fn skew_inside_the_window_is_accepted_when_totp_tolerates_it() {
        // 30 seconds of skew stays within both the 300 s window and a
        // one-step TOTP tolerance.
        let data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW - 30);
        assert!(asymmetric_verifier().verify_at(&data, NOW).is_ok());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut data = build_ed25519_packet(&signing_key(), TOTP_SECRET, 30, NOW);
        data[0] = 2;
        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::BadVersion(2))
        ));
    }

    #[test]
    fn hmac_packet_against_asymmetric_config_misses_the_key() {
        let data = build_hmac_packet(HMAC_SECRET, TOTP_SECRET, 30, NOW);
        assert!(matches!(
            asymmetric_verifier().verify_at(&data, NOW),
            Err(VerifyError::MissingKey("HMAC secret"))
        ));
    }
}
