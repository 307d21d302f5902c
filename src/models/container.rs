// Docker container models

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Docker container state; serializes to lowercase JSON (e.g. "running").
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Exited,
    Created,
    Restarting,
    Paused,
    Dead,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ContainerState {
    /// Derive the state from a `docker ps` status column (e.g. "Up 3 hours (Paused)").
    pub fn from_status(status: &str) -> Self {
        let status = status.trim();
        if status.starts_with("Up") {
            if status.contains("(Paused)") {
                ContainerState::Paused
            } else {
                ContainerState::Running
            }
        } else if status.starts_with("Exited") {
            ContainerState::Exited
        } else if status.starts_with("Created") {
            ContainerState::Created
        } else if status.starts_with("Restarting") {
            ContainerState::Restarting
        } else if status.starts_with("Dead") {
            ContainerState::Dead
        } else {
            ContainerState::Unknown
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub status: String,
    pub image: String,
}
