#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{xdp_action, TC_ACT_OK, TC_ACT_SHOT},
    helpers::bpf_ktime_get_ns,
    macros::{classifier, map, xdp},
    maps::{Array, LruHashMap, PerCpuArray},
    programs::{TcContext, XdpContext},
};
use aya_log_ebpf::info;
use core::mem;
use phantom_grid_common::{
    csum_replace, flow_key, is_stealth_scan,
    ports::{is_critical_asset_port, is_fake_port},
    select_os_persona, DLP_CANARY, DLP_PREFIXES, HONEYPOT_PORT, MAX_PAYLOAD_SCAN,
    MUTATION_FLOWS_MAX_ENTRIES, SPA_MAGIC_PORT, TCP_ACK, TCP_SYN, WHITELIST_MAX_ENTRIES,
};

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

/// Source IP -> whitelist expiry in monotonic nanoseconds. Populated by the
/// SPA verifier; consulted on every critical-port packet.
#[map]
static SPA_WHITELIST: LruHashMap<u32, u64> =
    LruHashMap::with_max_entries(WHITELIST_MAX_ENTRIES, 0);

/// Fake-port SYNs classified as reconnaissance and redirected.
#[map]
static ATTACK_STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Packets matching the stealth-scan heuristics.
#[map]
static STEALTH_DROPS: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Distinct flows whose responses had their OS fingerprint rewritten.
#[map]
static OS_MUTATIONS: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Egress packets dropped by the DLP hook.
#[map]
static EGRESS_BLOCKS: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

/// Verified knocks. Single writer: the userspace SPA handler.
#[map]
static SPA_AUTH_SUCCESS: Array<u64> = Array::with_max_entries(1, 0);

/// Rejected knocks. Single writer: the userspace SPA handler.
#[map]
static SPA_AUTH_FAILED: Array<u64> = Array::with_max_entries(1, 0);

/// Flow keys that already received a personality mutation, so the counter
/// moves once per flow.
#[map]
static MUTATION_FLOWS: LruHashMap<u64, u8> =
    LruHashMap::with_max_entries(MUTATION_FLOWS_MAX_ENTRIES, 0);

/// SPA scalars, mirrored from userspace at startup. Dynamic-knock
/// verification itself happens in userspace; the kernel path only gates.
#[map]
static SPA_CONFIG: Array<u32> = Array::with_max_entries(4, 0);

/// TOTP shared secret bytes, mirrored from userspace at startup.
#[map]
static TOTP_SECRET: Array<u8> = Array::with_max_entries(32, 0);

const ETH_P_IP: u16 = 0x0800;
const ETH_HDR_LEN: usize = 14;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

#[repr(C)]
struct EthernetHeader {
    dst_mac: [u8; 6],
    src_mac: [u8; 6],
    eth_type: u16,
}

#[repr(C)]
struct IpHeader {
    version_ihl: u8,
    tos: u8,
    total_length: u16,
    id: u16,
    flags_fragment: u16,
    ttl: u8,
    protocol: u8,
    checksum: u16,
    src_addr: u32,
    dst_addr: u32,
}

#[repr(C)]
struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    offset_flags: u16,
    window: u16,
    checksum: u16,
    urgent: u16,
}

#[repr(C)]
struct UdpHeader {
    src_port: u16,
    dst_port: u16,
    length: u16,
    checksum: u16,
}

#[inline(always)]
fn ptr_at<T>(start: usize, end: usize, offset: usize) -> Result<*const T, ()> {
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

#[inline(always)]
fn ptr_at_mut<T>(start: usize, end: usize, offset: usize) -> Result<*mut T, ()> {
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *mut T)
}

#[inline(always)]
fn bump_percpu(counter: &PerCpuArray<u64>) {
    if let Some(val) = counter.get_ptr_mut(0) {
        unsafe { *val += 1 };
    }
}

/// Rewrite TTL and TCP window to the flow's canned persona, fixing both
/// checksums incrementally. Counts once per distinct flow key.
#[inline(always)]
fn mutate_os_personality(
    start: usize,
    end: usize,
    ip_off: usize,
    tcp_off: usize,
    src_ip: u32,
    src_port: u16,
) -> Result<(), ()> {
    let persona = select_os_persona(src_ip, src_port);

    let ip = ptr_at_mut::<IpHeader>(start, end, ip_off)?;
    let tcp = ptr_at_mut::<TcpHeader>(start, end, tcp_off)?;

    let old_ttl = unsafe { (*ip).ttl };
    if old_ttl != persona.ttl {
        let proto = unsafe { (*ip).protocol };
        let old_word = u16::from_ne_bytes([old_ttl, proto]);
        let new_word = u16::from_ne_bytes([persona.ttl, proto]);
        unsafe {
            (*ip).ttl = persona.ttl;
            (*ip).checksum = csum_replace((*ip).checksum, old_word, new_word);
        }
    }

    let old_window = unsafe { (*tcp).window };
    let new_window = persona.window.to_be();
    if old_window != new_window {
        unsafe {
            (*tcp).window = new_window;
            (*tcp).checksum = csum_replace((*tcp).checksum, old_window, new_window);
        }
    }

    let key = flow_key(src_ip, src_port);
    if unsafe { MUTATION_FLOWS.get(&key) }.is_none() {
        let _ = MUTATION_FLOWS.insert(&key, &1, 0);
        bump_percpu(&OS_MUTATIONS);
    }

    Ok(())
}

#[xdp]
pub fn phantom_grid(ctx: XdpContext) -> u32 {
    match try_phantom_grid(&ctx) {
        Ok(ret) => ret,
        Err(_) => xdp_action::XDP_PASS,
    }
}

fn try_phantom_grid(ctx: &XdpContext) -> Result<u32, ()> {
    let start = ctx.data();
    let end = ctx.data_end();

    let eth = unsafe { ptr_at::<EthernetHeader>(start, end, 0)?.read_unaligned() };
    if u16::from_be(eth.eth_type) != ETH_P_IP {
        return Ok(xdp_action::XDP_PASS);
    }

    let ip = unsafe { ptr_at::<IpHeader>(start, end, ETH_HDR_LEN)?.read_unaligned() };
    let ihl = ((ip.version_ihl & 0x0f) as usize) * 4;
    if !(20..=60).contains(&ihl) {
        return Ok(xdp_action::XDP_PASS);
    }
    let l4_off = ETH_HDR_LEN + ihl;
    let src_ip = u32::from_be(ip.src_addr);

    if ip.protocol == IPPROTO_UDP {
        // Knocks on the magic port flow up to the userspace verifier;
        // everything else on UDP is benign from the hook's point of view.
        let udp = unsafe { ptr_at::<UdpHeader>(start, end, l4_off)?.read_unaligned() };
        if u16::from_be(udp.dst_port) == SPA_MAGIC_PORT {
            info!(ctx, "SPA knock from {:i}, deferring to userspace", src_ip);
        }
        return Ok(xdp_action::XDP_PASS);
    }

    if ip.protocol != IPPROTO_TCP {
        return Ok(xdp_action::XDP_PASS);
    }

    let tcp = unsafe { ptr_at::<TcpHeader>(start, end, l4_off)?.read_unaligned() };
    let flags = (u16::from_be(tcp.offset_flags) & 0x00ff) as u8;
    let dport = u16::from_be(tcp.dst_port);
    let sport = u16::from_be(tcp.src_port);

    // Reconnaissance probes are dropped before anything else, whatever the
    // destination port.
    if is_stealth_scan(flags) {
        bump_percpu(&STEALTH_DROPS);
        return Ok(xdp_action::XDP_DROP);
    }

    // The invisible wall: critical ports answer only whitelisted sources.
    if is_critical_asset_port(dport) {
        let src_key = ip.src_addr;
        match unsafe { SPA_WHITELIST.get(&src_key) } {
            Some(expiry) => {
                let now = unsafe { bpf_ktime_get_ns() };
                if now < *expiry {
                    return Ok(xdp_action::XDP_PASS);
                }
                let _ = SPA_WHITELIST.remove(&src_key);
                return Ok(xdp_action::XDP_DROP);
            }
            None => return Ok(xdp_action::XDP_DROP),
        }
    }

    // Fake-port SYNs are reconnaissance: rewrite them into the honeypot and
    // give the flow a borrowed OS personality.
    if is_fake_port(dport) && flags & TCP_SYN != 0 && flags & TCP_ACK == 0 {
        bump_percpu(&ATTACK_STATS);

        let tcp_mut = ptr_at_mut::<TcpHeader>(start, end, l4_off)?;
        let old_port = unsafe { (*tcp_mut).dst_port };
        let new_port = HONEYPOT_PORT.to_be();
        unsafe {
            (*tcp_mut).dst_port = new_port;
            (*tcp_mut).checksum = csum_replace((*tcp_mut).checksum, old_port, new_port);
        }

        mutate_os_personality(start, end, ETH_HDR_LEN, l4_off, src_ip, sport)?;
        return Ok(xdp_action::XDP_PASS);
    }

    Ok(xdp_action::XDP_PASS)
}

#[classifier]
pub fn phantom_grid_egress(ctx: TcContext) -> i32 {
    match try_phantom_grid_egress(&ctx) {
        Ok(ret) => ret,
        Err(_) => TC_ACT_OK,
    }
}

fn try_phantom_grid_egress(ctx: &TcContext) -> Result<i32, ()> {
    let start = ctx.data();
    let end = ctx.data_end();

    let eth = unsafe { ptr_at::<EthernetHeader>(start, end, 0)?.read_unaligned() };
    if u16::from_be(eth.eth_type) != ETH_P_IP {
        return Ok(TC_ACT_OK);
    }

    let ip = unsafe { ptr_at::<IpHeader>(start, end, ETH_HDR_LEN)?.read_unaligned() };
    if ip.protocol != IPPROTO_TCP {
        return Ok(TC_ACT_OK);
    }
    let ihl = ((ip.version_ihl & 0x0f) as usize) * 4;
    if !(20..=60).contains(&ihl) {
        return Ok(TC_ACT_OK);
    }

    let tcp_off = ETH_HDR_LEN + ihl;
    let tcp = unsafe { ptr_at::<TcpHeader>(start, end, tcp_off)?.read_unaligned() };
    let doff = ((u16::from_be(tcp.offset_flags) >> 12) & 0x0f) as usize * 4;
    if !(20..=60).contains(&doff) {
        return Ok(TC_ACT_OK);
    }

    let payload_off = tcp_off + doff;
    if start + payload_off >= end {
        return Ok(TC_ACT_OK);
    }

    if scan_payload(start, end, payload_off) {
        bump_percpu(&EGRESS_BLOCKS);
        info!(ctx, "egress DLP drop, sentinel in payload");
        return Ok(TC_ACT_SHOT);
    }

    Ok(TC_ACT_OK)
}

/// Bounded scan of the leading payload bytes for the sentinel patterns.
#[inline(always)]
fn scan_payload(start: usize, end: usize, payload_off: usize) -> bool {
    for prefix in DLP_PREFIXES {
        if match_at(start, end, payload_off, prefix) {
            return true;
        }
    }

    let mut i = 0;
    while i < MAX_PAYLOAD_SCAN {
        if start + payload_off + i + DLP_CANARY.len() > end {
            return false;
        }
        if match_at(start, end, payload_off + i, DLP_CANARY) {
            return true;
        }
        i += 1;
    }
    false
}

#[inline(always)]
fn match_at(start: usize, end: usize, offset: usize, pattern: &[u8]) -> bool {
    if start + offset + pattern.len() > end {
        return false;
    }
    let mut j = 0;
    while j < pattern.len() {
        let byte = unsafe { *((start + offset + j) as *const u8) };
        if byte != pattern[j] {
            return false;
        }
        j += 1;
    }
    true
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";

#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    loop {}
}
