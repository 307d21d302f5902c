// virsh output parsing

use crate::models::{VmInfo, VmOsType, VmState};

/// Field separator used by the batched VM listing script.
pub const FIELD_SEP: &str = "§§§";
/// Printed by the batched VM listing script when libvirt is down.
pub const LIBVIRT_NOT_RUNNING: &str = "libvirt_not_running";

const LINUX_NAME_TERMS: [&str; 8] = [
    "ubuntu", "linux", "debian", "centos", "fedora", "rhel", "suse", "arch",
];

/// OS family from the `<os>` section of the domain XML, falling back to the VM name.
pub fn detect_os_type(name: &str, xml: &str) -> VmOsType {
    let xml = xml.to_lowercase();
    if xml.contains("windows") || xml.contains("win") {
        return VmOsType::Windows;
    }
    if xml.contains("linux") {
        return VmOsType::Linux;
    }
    let name = name.to_lowercase().replace(['-', '_'], " ");
    if name.contains("windows") || name.contains("win") {
        VmOsType::Windows
    } else if LINUX_NAME_TERMS.iter().any(|t| name.contains(t)) {
        VmOsType::Linux
    } else {
        VmOsType::Other
    }
}

fn leading_number(s: &str) -> u64 {
    s.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// `name§§§state§§§cpus§§§memory§§§xml` lines. Returns None when libvirt is not running.
pub fn parse_vm_batch(output: &str) -> Option<Vec<VmInfo>> {
    if output.trim() == LIBVIRT_NOT_RUNNING {
        return None;
    }
    let vms = output
        .lines()
        .filter(|l| l.contains(FIELD_SEP))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(FIELD_SEP).collect();
            if parts.len() < 5 {
                return None;
            }
            let name = parts[0].trim();
            if name.is_empty() {
                return None;
            }
            Some(VmInfo {
                name: name.to_string(),
                state: VmState::parse(parts[1]),
                os_type: detect_os_type(name, parts[4]),
                vcpus: leading_number(parts[2]) as u32,
                memory_kib: leading_number(parts[3]),
            })
        })
        .collect();
    Some(vms)
}

/// `virsh list --all --name`.
pub fn parse_vm_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
