use anyhow::{Context, Result};
use aya::maps::{Array, HashMap as BpfHashMap, MapData, PerCpuArray};
use aya::programs::{tc, SchedClassifier, TcAttachType, Xdp, XdpFlags};
use aya::{include_bytes_aligned, Ebpf};
use log::{debug, info, warn};
use std::net::Ipv4Addr;

use phantom_grid_common::{
    CFG_REPLAY_WINDOW, CFG_SPA_MODE, CFG_TOTP_TIME_STEP, CFG_TOTP_TOLERANCE,
};

use crate::config::{SpaConfig, SpaKeys};

/// Expiry base used when `/proc/uptime` cannot be read: far enough in the
/// future that fresh entries are never stale on arrival, reclaimed by LRU
/// pressure instead of the expiry check.
const FALLBACK_EXPIRY_BASE_NS: u64 = 1_000_000_000_000_000_000;

/// Point-in-time view of the six kernel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub attack_stats: u64,
    pub stealth_drops: u64,
    pub os_mutations: u64,
    pub spa_auth_success: u64,
    pub spa_auth_failed: u64,
    pub egress_blocks: u64,
}

/// Loads the kernel-path object, attaches the hooks, and mediates every
/// userspace access to the shared maps.
pub struct EbpfManager {
    _ebpf: Ebpf,
    whitelist: BpfHashMap<MapData, u32, u64>,
    attack_stats: PerCpuArray<MapData, u64>,
    stealth_drops: PerCpuArray<MapData, u64>,
    os_mutations: PerCpuArray<MapData, u64>,
    egress_blocks: PerCpuArray<MapData, u64>,
    spa_auth_success: Array<MapData, u64>,
    spa_auth_failed: Array<MapData, u64>,
    spa_config: Array<MapData, u32>,
    totp_secret: Array<MapData, u8>,
    egress_active: bool,
}

impl EbpfManager {
    /// Ingress attach failure is fatal; egress attach failure disables the
    /// DLP hook and keeps going.
    pub fn new(interface: &str) -> Result<Self> {
        // eBPF maps are locked memory; lift RLIMIT_MEMLOCK for older
        // kernels that still account them there.
        let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
        let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
        if ret != 0 {
            debug!("remove limit on locked memory failed, ret is: {ret}");
        }

        let mut ebpf = Ebpf::load(include_bytes_aligned!(concat!(
            env!("OUT_DIR"),
            "/phantom-grid"
        )))
        .context("Failed to load eBPF object")?;

        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            warn!("failed to initialize eBPF logger: {e}");
        }

        {
            let ingress: &mut Xdp = ebpf
                .program_mut("phantom_grid")
                .context("ingress program not found in object")?
                .try_into()?;
            ingress.load().context("Failed to load XDP program")?;
            ingress
                .attach(interface, XdpFlags::SKB_MODE)
                .with_context(|| format!("Failed to attach XDP to interface '{interface}'"))?;
            info!("[*] XDP attached to interface: {interface} (generic mode)");
        }

        let egress_active = match attach_egress(&mut ebpf, interface) {
            Ok(()) => {
                info!("[*] TC egress hook attached (DLP active)");
                true
            }
            Err(e) => {
                warn!("[!] Warning: failed to attach TC egress: {e:#}");
                warn!("[!] Egress DLP disabled. Ingress protection still active.");
                false
            }
        };

        let whitelist = BpfHashMap::try_from(take(&mut ebpf, "SPA_WHITELIST")?)?;
        let attack_stats = PerCpuArray::try_from(take(&mut ebpf, "ATTACK_STATS")?)?;
        let stealth_drops = PerCpuArray::try_from(take(&mut ebpf, "STEALTH_DROPS")?)?;
        let os_mutations = PerCpuArray::try_from(take(&mut ebpf, "OS_MUTATIONS")?)?;
        let egress_blocks = PerCpuArray::try_from(take(&mut ebpf, "EGRESS_BLOCKS")?)?;
        let spa_auth_success = Array::try_from(take(&mut ebpf, "SPA_AUTH_SUCCESS")?)?;
        let spa_auth_failed = Array::try_from(take(&mut ebpf, "SPA_AUTH_FAILED")?)?;
        let spa_config = Array::try_from(take(&mut ebpf, "SPA_CONFIG")?)?;
        let totp_secret = Array::try_from(take(&mut ebpf, "TOTP_SECRET")?)?;

        Ok(Self {
            _ebpf: ebpf,
            whitelist,
            attack_stats,
            stealth_drops,
            os_mutations,
            egress_blocks,
            spa_auth_success,
            spa_auth_failed,
            spa_config,
            totp_secret,
            egress_active,
        })
    }

    pub fn egress_active(&self) -> bool {
        self.egress_active
    }

    /// Mirrors the SPA scalars and TOTP secret into the kernel-side maps.
    pub fn load_spa_config(&mut self, spa: &SpaConfig, keys: &SpaKeys) -> Result<()> {
        self.spa_config.set(CFG_TOTP_TIME_STEP, spa.totp_time_step, 0)?;
        self.spa_config.set(CFG_TOTP_TOLERANCE, spa.totp_tolerance, 0)?;
        self.spa_config.set(CFG_REPLAY_WINDOW, spa.replay_window_seconds as u32, 0)?;
        self.spa_config.set(CFG_SPA_MODE, spa.mode.as_map_value(), 0)?;

        for (i, byte) in keys.totp_secret.iter().take(32).enumerate() {
            self.totp_secret.set(i as u32, *byte, 0)?;
        }
        Ok(())
    }

    /// Installs a whitelist entry keyed on the source address in network
    /// byte order, with the expiry computed in the kernel's monotonic clock
    /// domain.
    pub fn whitelist_ip(&mut self, ip: Ipv4Addr, duration_secs: u64) -> Result<()> {
        let key = u32::from(ip).to_be();
        let expiry = kernel_expiry_ns(duration_secs);
        self.whitelist
            .insert(key, expiry, 0)
            .context("Failed to update whitelist map")?;
        debug!("[SPA] whitelisted {ip} until {expiry} ns (kernel clock)");
        Ok(())
    }

    pub fn bump_spa_success(&mut self) {
        let current = self.spa_auth_success.get(&0, 0).unwrap_or(0);
        let _ = self.spa_auth_success.set(0, current + 1, 0);
    }

    pub fn bump_spa_failed(&mut self) {
        let current = self.spa_auth_failed.get(&0, 0).unwrap_or(0);
        let _ = self.spa_auth_failed.set(0, current + 1, 0);
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            attack_stats: sum_percpu(&self.attack_stats),
            stealth_drops: sum_percpu(&self.stealth_drops),
            os_mutations: sum_percpu(&self.os_mutations),
            spa_auth_success: self.spa_auth_success.get(&0, 0).unwrap_or(0),
            spa_auth_failed: self.spa_auth_failed.get(&0, 0).unwrap_or(0),
            egress_blocks: sum_percpu(&self.egress_blocks),
        }
    }
}

fn take(ebpf: &mut Ebpf, name: &str) -> Result<aya::maps::Map> {
    ebpf.take_map(name)
        .with_context(|| format!("map '{name}' not found in eBPF object"))
}

fn attach_egress(ebpf: &mut Ebpf, interface: &str) -> Result<()> {
    // Adding clsact when it already exists is harmless.
    let _ = tc::qdisc_add_clsact(interface);
    let egress: &mut SchedClassifier = ebpf
        .program_mut("phantom_grid_egress")
        .context("egress program not found in object")?
        .try_into()?;
    egress.load().context("Failed to load TC egress program")?;
    egress
        .attach(interface, TcAttachType::Egress)
        .context("Failed to attach TC egress filter")?;
    Ok(())
}

fn sum_percpu(map: &PerCpuArray<MapData, u64>) -> u64 {
    map.get(&0, 0)
        .map(|values| values.iter().sum())
        .unwrap_or(0)
}

/// Whitelist expiries live in the kernel's monotonic clock domain
/// (`bpf_ktime_get_ns`, nanoseconds since boot). Userspace approximates it
/// from `/proc/uptime` and pads one second to absorb the residual skew
/// between the two reads.
pub fn kernel_expiry_ns(duration_secs: u64) -> u64 {
    let duration_ns = duration_secs.saturating_mul(1_000_000_000);
    match read_uptime_ns() {
        Some(uptime_ns) => uptime_ns
            .saturating_add(duration_ns)
            .saturating_add(1_000_000_000),
        None => FALLBACK_EXPIRY_BASE_NS.saturating_add(duration_ns),
    }
}

fn read_uptime_ns() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/uptime").ok()?;
    let seconds: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Some((seconds * 1e9) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_uptime_plus_duration_plus_buffer() {
        let before = read_uptime_ns().expect("/proc/uptime readable on test hosts");
        let expiry = kernel_expiry_ns(30);
        let after = read_uptime_ns().unwrap();
        // now + 30s + 1s buffer, modulo the time the calls themselves take.
        assert!(expiry >= before + 30_000_000_000);
        assert!(expiry <= after + 32_000_000_000);
    }

    #[test]
    fn expiry_never_overflows() {
        let expiry = kernel_expiry_ns(u64::MAX / 1_000_000_000);
        assert!(expiry > 0);
    }
}
