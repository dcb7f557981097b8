//! Counter monitor: polls the shared maps and turns increases into
//! one-line operator messages. Expiry of whitelist entries is enforced by
//! the kernel path itself; nothing is evicted from here.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::ebpf_manager::{CounterSnapshot, EbpfManager};
use crate::logger::{EventKind, LogSink};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct StatsMonitor {
    maps: Arc<Mutex<EbpfManager>>,
    log: LogSink,
}

impl StatsMonitor {
    pub fn new(maps: Arc<Mutex<EbpfManager>>, log: LogSink) -> Self {
        Self { maps, log }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        let mut last = CounterSnapshot::default();
        let mut initialized = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            let current = self.maps.lock().await.counters();
            if initialized {
                for (kind, line) in delta_lines(&last, &current) {
                    self.log.event(kind, line);
                }
            } else {
                // First read establishes the baseline without reporting
                // counts from before this process attached.
                initialized = true;
            }
            last = current;
        }
    }
}

fn delta_lines(last: &CounterSnapshot, current: &CounterSnapshot) -> Vec<(EventKind, String)> {
    let mut lines = Vec::new();

    if current.attack_stats > last.attack_stats {
        lines.push((
            EventKind::TrapHit,
            format!(
                "{} new connection(s) redirected to honeypot | Total: {}",
                current.attack_stats - last.attack_stats,
                current.attack_stats
            ),
        ));
    }
    if current.stealth_drops > last.stealth_drops {
        lines.push((
            EventKind::StealthDrop,
            format!(
                "{} stealth scan packet(s) blocked | Total: {}",
                current.stealth_drops - last.stealth_drops,
                current.stealth_drops
            ),
        ));
    }
    if current.os_mutations > last.os_mutations {
        lines.push((
            EventKind::OsMutation,
            format!(
                "{} OS fingerprint mutation(s) applied | Total: {}",
                current.os_mutations - last.os_mutations,
                current.os_mutations
            ),
        ));
    }
    if current.spa_auth_success > last.spa_auth_success {
        lines.push((
            EventKind::SpaSuccess,
            format!(
                "{} successful authentication(s) | Total: {}",
                current.spa_auth_success - last.spa_auth_success,
                current.spa_auth_success
            ),
        ));
    }
    if current.spa_auth_failed > last.spa_auth_failed {
        lines.push((
            EventKind::SpaFail,
            format!(
                "{} failed authentication attempt(s) | Total: {}",
                current.spa_auth_failed - last.spa_auth_failed,
                current.spa_auth_failed
            ),
        ));
    }
    if current.egress_blocks > last.egress_blocks {
        lines.push((
            EventKind::EgressBlock,
            format!(
                "{} data exfiltration attempt(s) blocked | Total: {}",
                current.egress_blocks - last.egress_blocks,
                current.egress_blocks
            ),
        ));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_counters_emit_nothing() {
        let snap = CounterSnapshot { attack_stats: 5, ..Default::default() };
        assert!(delta_lines(&snap, &snap).is_empty());
    }

    #[test]
    fn each_increase_emits_one_line() {
        let last = CounterSnapshot::default();
        let current = CounterSnapshot {
            attack_stats: 2,
            stealth_drops: 1,
            os_mutations: 0,
            spa_auth_success: 1,
            spa_auth_failed: 3,
            egress_blocks: 0,
        };
        let lines = delta_lines(&last, &current);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].0, EventKind::TrapHit);
        assert!(lines[0].1.contains("2 new connection(s)"));
        assert!(lines[0].1.contains("Total: 2"));
        assert!(lines.iter().any(|(k, l)| *k == EventKind::SpaFail && l.contains("failed authentication")));
    }

    #[test]
    fn decreases_are_ignored() {
        // Counters are monotonic; a smaller reading means the maps were
        // reloaded and the baseline resets silently.
        let last = CounterSnapshot { stealth_drops: 10, ..Default::default() };
        let current = CounterSnapshot { stealth_drops: 4, ..Default::default() };
        assert!(delta_lines(&last, &current).is_empty());
    }
}
