// Build-time name and version, reported over HTTP and in the SSH banner

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Identification line sent to the SSH server, e.g. `SSH-2.0-unraid-monitor_0.8.0`.
pub fn ssh_client_id() -> String {
    format!("SSH-2.0-{}_{}", NAME, VERSION)
}
