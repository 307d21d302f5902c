// Errors raised by the SSH transport, the connection pool and remote operations

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnraidError {
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("authentication failed for {username}@{host}")]
    Authentication { host: String, username: String },

    #[error("command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("command failed with exit code {exit_code}: {command}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("circuit breaker open, retry in {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },

    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("not available: {message}")]
    NotAvailable { message: String },
}

impl UnraidError {
    pub fn connection(message: impl Into<String>) -> Self {
        UnraidError::Connection {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        UnraidError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        UnraidError::Parse {
            message: message.into(),
        }
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        UnraidError::NotAvailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same command may succeed.
    /// A command that ran and exited non-zero will fail the same way again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UnraidError::Connection { .. } | UnraidError::Timeout { .. }
        )
    }

    /// Errors that mean the session itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            UnraidError::Connection { .. }
                | UnraidError::Timeout { .. }
                | UnraidError::Authentication { .. }
        )
    }
}

/// First 100 characters of a command for logs and error messages.
pub fn command_preview(command: &str) -> String {
    if command.chars().count() > 100 {
        let head: String = command.chars().take(100).collect();
        format!("{}...", head)
    } else {
        command.to_string()
    }
}
