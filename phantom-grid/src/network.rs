use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Resolves the interface the hooks attach to. A user-specified name must
/// exist; otherwise the first non-loopback interface that is up wins, with
/// loopback as a last resort for local testing.
pub fn detect_interface(specified: Option<&str>) -> Result<String> {
    if let Some(name) = specified {
        if !Path::new(SYS_CLASS_NET).join(name).exists() {
            bail!("network interface '{name}' not found");
        }
        info!("[*] Using user-specified interface: {name}");
        return Ok(name.to_string());
    }

    info!("[*] No interface specified, auto-detecting...");
    let mut fallback = None;
    for entry in fs::read_dir(SYS_CLASS_NET)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            fallback = Some(name);
            continue;
        }
        let operstate = fs::read_to_string(entry.path().join("operstate")).unwrap_or_default();
        debug!("[DEBUG] candidate interface {name} (operstate: {})", operstate.trim());
        if operstate.trim() == "up" {
            info!("[*] Using network interface: {name}");
            return Ok(name);
        }
    }

    match fallback {
        Some(name) => {
            warn!("[!] WARNING: falling back to LOOPBACK interface - local testing only");
            warn!("[!] WARNING: traffic from external hosts will NOT be captured!");
            Ok(name)
        }
        None => bail!("no suitable network interface found"),
    }
}
