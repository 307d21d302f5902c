// Domain models shared by parsers, the coordinator, history and the HTTP API

mod container;
mod network;
mod snapshot;
mod storage;
mod system;
mod ups;
mod vm;

pub use container::{ContainerInfo, ContainerState};
pub use network::{InterfaceAddress, NetworkInterface};
pub use snapshot::UnraidSnapshot;
pub use storage::{
    ArrayState, DiskInfo, DiskState, ParityCheck, ParityProgress, ParityStatus, ZfsPool,
};
pub use system::{
    CpuStats, FanReading, MemoryStats, MountStatus, MountUsage, ServerInfo, TemperatureReading,
    Temperatures, UsageStats, UserScript,
};
pub use ups::UpsInfo;
pub use vm::{VmInfo, VmOsType, VmState};
