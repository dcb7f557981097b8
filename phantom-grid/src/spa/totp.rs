//! RFC 6238 time-based one-time passwords: HMAC-SHA1 over the big-endian
//! time counter, dynamic truncation, 6-digit code.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Code for an explicit Unix timestamp.
pub fn totp(secret: &[u8], time_step: u32, timestamp: i64) -> u32 {
    let counter = (timestamp / time_step as i64) as u64;

    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3).
    let offset = (hash[19] & 0x0f) as usize;
    let code = u32::from_be_bytes([hash[offset], hash[offset + 1], hash[offset + 2], hash[offset + 3]])
        & 0x7fff_ffff;

    code % 1_000_000
}

/// Code for the current step.
pub fn generate(secret: &[u8], time_step: u32) -> u32 {
    totp(secret, time_step, Utc::now().timestamp())
}

/// Accepts a code matching any counter in `[now/step - tolerance,
/// now/step + tolerance]`.
pub fn validate(secret: &[u8], time_step: u32, tolerance: u32, received: u32) -> bool {
    validate_at(secret, time_step, tolerance, received, Utc::now().timestamp())
}

pub fn validate_at(secret: &[u8], time_step: u32, tolerance: u32, received: u32, now: i64) -> bool {
    let current_step = now / time_step as i64;
    let tolerance = tolerance as i64;
    for delta in -tolerance..=tolerance {
        let step = current_step + delta;
        if totp(secret, time_step, step * time_step as i64) == received {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_SECRET: &[u8] = b"12345678901234567890";

    // RFC 6238 appendix B vectors, truncated from 8 to 6 digits.
    #[test]
    fn rfc6238_vectors() {
        assert_eq!(totp(RFC_SECRET, 30, 59), 287082);
        assert_eq!(totp(RFC_SECRET, 30, 1111111109), 81804 % 1_000_000);
        assert_eq!(totp(RFC_SECRET, 30, 1234567890), 5924 % 1_000_000);
    }

    #[test]
    fn code_is_stable_within_one_step() {
        assert_eq!(totp(RFC_SECRET, 30, 30), totp(RFC_SECRET, 30, 59));
        assert_ne!(totp(RFC_SECRET, 30, 59), totp(RFC_SECRET, 30, 60));
    }

    #[test]
    fn tolerance_accepts_adjacent_steps() {
        let now = 1_700_000_000;
        let previous = totp(RFC_SECRET, 30, now - 30);
        let next = totp(RFC_SECRET, 30, now + 30);
        assert!(validate_at(RFC_SECRET, 30, 1, previous, now));
        assert!(validate_at(RFC_SECRET, 30, 1, next, now));
        // Two steps away falls outside a tolerance of one.
        let far = totp(RFC_SECRET, 30, now - 90);
        assert!(!validate_at(RFC_SECRET, 30, 1, far, now));
    }

    #[test]
    fn zero_tolerance_accepts_only_current_step() {
        let now = 1_700_000_000;
        assert!(validate_at(RFC_SECRET, 30, 0, totp(RFC_SECRET, 30, now), now));
        assert!(!validate_at(RFC_SECRET, 30, 0, totp(RFC_SECRET, 30, now - 30), now));
    }
}
