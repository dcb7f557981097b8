//! Anti-replay nonce cache: O(1) membership with TTL purge and a hard
//! capacity bound, oldest entries dropped first.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// (timestamp, totp, first 8 signature bytes)
pub type Nonce = (i64, u32, [u8; 8]);

pub struct ReplayCache {
    ttl: Duration,
    cap: usize,
    set: HashSet<Nonce>,
    order: VecDeque<(Instant, Nonce)>,
}

impl ReplayCache {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self {
            ttl,
            cap,
            set: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some((inserted, nonce)) = self.order.front().copied() {
            if now.duration_since(inserted) > self.ttl {
                self.order.pop_front();
                self.set.remove(&nonce);
            } else {
                break;
            }
        }
    }

    /// Returns true if the nonce was already honored inside the window;
    /// otherwise records it and returns false.
    pub fn seen_or_insert(&mut self, nonce: Nonce, now: Instant) -> bool {
        self.purge_expired(now);
        if self.set.contains(&nonce) {
            return true;
        }
        self.set.insert(nonce);
        self.order.push_back((now, nonce));
        while self.order.len() > self.cap {
            if let Some((_, evicted)) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(n: u8) -> Nonce {
        (n as i64, n as u32, [n; 8])
    }

    #[test]
    fn second_sighting_is_a_replay() {
        let mut cache = ReplayCache::new(Duration::from_secs(60), 16);
        let now = Instant::now();
        assert!(!cache.seen_or_insert(nonce(1), now));
        assert!(cache.seen_or_insert(nonce(1), now));
        assert!(!cache.seen_or_insert(nonce(2), now));
    }

    #[test]
    fn entries_expire_after_the_window() {
        let mut cache = ReplayCache::new(Duration::from_secs(60), 16);
        let start = Instant::now();
        assert!(!cache.seen_or_insert(nonce(1), start));
        // 61 seconds later the nonce has aged out and is accepted again.
        let later = start + Duration::from_secs(61);
        assert!(!cache.seen_or_insert(nonce(1), later));
    }

    #[test]
    fn entry_still_inside_window_is_kept() {
        let mut cache = ReplayCache::new(Duration::from_secs(60), 16);
        let start = Instant::now();
        cache.seen_or_insert(nonce(1), start);
        assert!(cache.seen_or_insert(nonce(1), start + Duration::from_secs(59)));
    }

    #[test]
    fn capacity_pressure_evicts_oldest_first() {
        let mut cache = ReplayCache::new(Duration::from_secs(600), 4);
        let now = Instant::now();
        for i in 0..6u8 {
            cache.seen_or_insert(nonce(i), now + Duration::from_millis(i as u64));
        }
        assert_eq!(cache.len(), 4);
        // The two oldest were evicted and read as fresh again.
        assert!(!cache.seen_or_insert(nonce(0), now + Duration::from_secs(1)));
        // The newest survivors are still replays.
        assert!(cache.seen_or_insert(nonce(5), now + Duration::from_secs(1)));
    }
}
