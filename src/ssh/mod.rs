// SSH transport: one session per pooled connection, one channel per command.

mod client;

pub use client::{SshConnector, SshSettings};

use crate::error::UnraidError;
use async_trait::async_trait;

/// Result of a remote command. A non-zero exit status is not a transport error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Trimmed stdout when the command succeeded and printed something.
    pub fn stdout_if_ok(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (self.success() && !out.is_empty()).then_some(out)
    }
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, UnraidError>;
    async fn close(&mut self);
    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, UnraidError>;
    /// Host label for logs.
    fn host(&self) -> &str;
}
