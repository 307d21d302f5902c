// Docker containers and libvirt VMs: listing and lifecycle control

use futures_util::{StreamExt, stream};
use tokio::time::Duration;
use tracing::instrument;

use super::{ITEM_CONCURRENCY, UnraidRepo, keys, shell_quote};
use crate::cache::CachePriority;
use crate::error::UnraidError;
use crate::models::{ContainerInfo, VmInfo, VmState};
use crate::parsers::{docker, vm};

/// Docker lifecycle commands get a shorter timeout than reads.
pub const DOCKER_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

const VM_BATCH_COMMAND: &str = "if [ -x /etc/rc.d/rc.libvirt ] && /etc/rc.d/rc.libvirt status | grep -q 'is currently running'; then \
  virsh list --all --name | while IFS= read -r vm; do \
    if [ -n \"$vm\" ] && [ \"$vm\" != \" \" ]; then \
      state=$(virsh domstate \"$vm\" 2>/dev/null || echo 'unknown'); \
      info=$(virsh dominfo \"$vm\" 2>/dev/null); \
      cpus=$(echo \"$info\" | grep 'CPU(s)' | awk '{print $2}' | head -1); \
      mem=$(echo \"$info\" | grep 'Max memory' | sed 's/Max memory://g' | xargs | head -1); \
      xml=$(virsh dumpxml \"$vm\" 2>/dev/null | grep -A5 \"<os>\" | tr '\\n' ' '); \
      echo \"$vm§§§$state§§§$cpus§§§$mem§§§$xml\"; \
    fi; \
  done; \
else \
  echo 'libvirt_not_running'; \
fi";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAction {
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
}

impl DockerAction {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "restart" => Self::Restart,
            _ => return None,
        })
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "unpause",
            Self::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
    Hibernate,
    ForceStop,
}

impl VmAction {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "restart" => Self::Restart,
            "hibernate" => Self::Hibernate,
            "force_stop" => Self::ForceStop,
            _ => return None,
        })
    }

    fn command(self, quoted_name: &str) -> String {
        match self {
            Self::Start => format!("virsh start {}", quoted_name),
            Self::Stop => format!("virsh shutdown {}", quoted_name),
            Self::Pause => format!("virsh suspend {}", quoted_name),
            Self::Resume => format!("virsh resume {}", quoted_name),
            Self::Restart => format!("virsh reboot {}", quoted_name),
            Self::Hibernate => format!("virsh dompmsuspend {} disk", quoted_name),
            Self::ForceStop => format!("virsh destroy {}", quoted_name),
        }
    }
}

fn require_name(kind: &str, name: &str) -> Result<(), UnraidError> {
    if name.trim().is_empty() {
        return Err(UnraidError::invalid(format!("{} name must not be empty", kind)));
    }
    Ok(())
}

impl UnraidRepo {
    /// rc.d status first, then a running dockerd with its socket present.
    #[instrument(skip(self), fields(repo = "unraid", operation = "check_docker_running"))]
    pub async fn check_docker_running(&self) -> bool {
        if let Some(out) = self.read("/etc/rc.d/rc.docker status").await
            && docker::rc_reports_running(&out)
        {
            return true;
        }
        self.succeeds("pgrep -f dockerd").await && self.succeeds("[ -S /var/run/docker.sock ]").await
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "get_docker_containers"))]
    pub async fn get_docker_containers(&self) -> Vec<ContainerInfo> {
        if let Some(list) = self
            .cache
            .get_as::<Vec<ContainerInfo>>(keys::DOCKER_CONTAINERS)
        {
            return list;
        }
        let command = format!("docker ps -a --format '{}'", docker::PS_FORMAT);
        let Some(out) = self.read(&command).await else {
            return Vec::new();
        };
        let containers = docker::parse_container_list(&out);
        self.cache.set_as(
            keys::DOCKER_CONTAINERS,
            &containers,
            None,
            CachePriority::Critical,
        );
        containers
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "docker_control"))]
    pub async fn docker_control(
        &self,
        container: &str,
        action: DockerAction,
    ) -> Result<(), UnraidError> {
        require_name("container", container)?;
        let command = format!("docker {} {}", action.verb(), shell_quote(container));
        let result = self
            .run_checked(&command, Some(DOCKER_CONTROL_TIMEOUT))
            .await;
        self.cache.invalidate_by_prefix(keys::DOCKER_PREFIX);
        result?;
        tracing::info!(container, action = action.verb(), "Container action completed");
        Ok(())
    }

    pub async fn docker_start(&self, container: &str) -> Result<(), UnraidError> {
        self.docker_control(container, DockerAction::Start).await
    }

    pub async fn docker_stop(&self, container: &str) -> Result<(), UnraidError> {
        self.docker_control(container, DockerAction::Stop).await
    }

    pub async fn docker_pause(&self, container: &str) -> Result<(), UnraidError> {
        self.docker_control(container, DockerAction::Pause).await
    }

    pub async fn docker_resume(&self, container: &str) -> Result<(), UnraidError> {
        self.docker_control(container, DockerAction::Resume).await
    }

    pub async fn docker_restart(&self, container: &str) -> Result<(), UnraidError> {
        self.docker_control(container, DockerAction::Restart).await
    }

    /// rc.d status first, then a running libvirtd with its socket present.
    #[instrument(skip(self), fields(repo = "unraid", operation = "check_libvirt_running"))]
    pub async fn check_libvirt_running(&self) -> bool {
        if let Some(out) = self.read("/etc/rc.d/rc.libvirt status").await
            && out.contains("is currently running")
        {
            return true;
        }
        self.succeeds("pgrep -f libvirtd").await
            && self.succeeds("[ -S /var/run/libvirt/libvirt-sock ]").await
    }

    /// All VMs in one round trip; falls back to one `virsh` call per VM when the
    /// batched script fails.
    #[instrument(skip(self), fields(repo = "unraid", operation = "get_vms"))]
    pub async fn get_vms(&self) -> Vec<VmInfo> {
        if let Some(list) = self.cache.get_as::<Vec<VmInfo>>(keys::VM_LIST) {
            return list;
        }
        let vms = match self.read(VM_BATCH_COMMAND).await {
            Some(out) => match vm::parse_vm_batch(&out) {
                Some(vms) => vms,
                None => {
                    tracing::debug!("libvirt not running");
                    return Vec::new();
                }
            },
            None => self.get_vms_individually().await,
        };
        self.cache
            .set_as(keys::VM_LIST, &vms, None, CachePriority::Critical);
        vms
    }

    async fn get_vms_individually(&self) -> Vec<VmInfo> {
        let Some(names) = self.read("virsh list --all --name").await else {
            return Vec::new();
        };
        stream::iter(vm::parse_vm_names(&names))
            .map(|name| self.read_vm(name))
            .buffered(ITEM_CONCURRENCY)
            .collect()
            .await
    }

    async fn read_vm(&self, name: String) -> VmInfo {
        let quoted = shell_quote(&name);
        let state_cmd = format!("virsh domstate {}", quoted);
        let os_cmd = format!("virsh dumpxml {} | grep -A5 \"<os>\"", quoted);
        let (state, xml) = tokio::join!(self.read(&state_cmd), self.read(&os_cmd));
        VmInfo {
            os_type: vm::detect_os_type(&name, xml.as_deref().unwrap_or("")),
            state: state.as_deref().map(VmState::parse).unwrap_or(VmState::Other),
            vcpus: 0,
            memory_kib: 0,
            name,
        }
    }

    async fn vm_state(&self, name: &str) -> Result<VmState, UnraidError> {
        let command = format!("virsh domstate {}", shell_quote(name));
        let out = self.run_checked(&command, None).await?;
        let state = out.stdout.trim();
        if state.is_empty() {
            return Err(UnraidError::parse(format!("empty domstate reply for {}", name)));
        }
        Ok(VmState::parse(state))
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "vm_control"))]
    pub async fn vm_control(&self, name: &str, action: VmAction) -> Result<(), UnraidError> {
        require_name("vm", name)?;
        let state = self.vm_state(name).await?;
        match action {
            VmAction::Start if state.is_running() => {
                tracing::info!(vm = name, "VM already running");
                return Ok(());
            }
            VmAction::Pause if state == VmState::Paused => return Ok(()),
            VmAction::Pause if !state.is_running() => {
                return Err(UnraidError::invalid(format!(
                    "cannot pause {}: not running (state {:?})",
                    name, state
                )));
            }
            VmAction::Resume if state.is_running() => return Ok(()),
            VmAction::Resume if state != VmState::Paused => {
                return Err(UnraidError::invalid(format!(
                    "cannot resume {}: not paused (state {:?})",
                    name, state
                )));
            }
            _ => {}
        }
        let result = self
            .run_checked(&action.command(&shell_quote(name)), None)
            .await;
        self.cache.invalidate_by_prefix(keys::VM_PREFIX);
        result?;
        tracing::info!(vm = name, action = ?action, "VM action completed");
        Ok(())
    }

    pub async fn vm_start(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Start).await
    }

    pub async fn vm_stop(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Stop).await
    }

    pub async fn vm_pause(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Pause).await
    }

    pub async fn vm_resume(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Resume).await
    }

    pub async fn vm_restart(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Restart).await
    }

    pub async fn vm_hibernate(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::Hibernate).await
    }

    pub async fn vm_force_stop(&self, name: &str) -> Result<(), UnraidError> {
        self.vm_control(name, VmAction::ForceStop).await
    }
}
