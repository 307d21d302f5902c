// docker ps parsing

use crate::models::{ContainerInfo, ContainerState};

/// Format string paired with [`parse_container_list`].
pub const PS_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Status}}|{{.Image}}";

/// `docker ps -a --format '{{.ID}}|{{.Names}}|{{.Status}}|{{.Image}}'`.
/// Lines without exactly four fields are skipped.
pub fn parse_container_list(output: &str) -> Vec<ContainerInfo> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() != 4 {
                tracing::debug!(line, "Skipping malformed docker ps line");
                return None;
            }
            let status = parts[2].trim();
            Some(ContainerInfo {
                id: parts[0].trim().to_string(),
                name: parts[1].trim().to_string(),
                state: ContainerState::from_status(status),
                status: status.to_string(),
                image: parts[3].trim().to_string(),
            })
        })
        .collect()
}

/// `/etc/rc.d/rc.docker status` output.
pub fn rc_reports_running(output: &str) -> bool {
    output.contains("is currently running")
}
