// Arbitrary commands, user scripts and power control

use tokio::time::Duration;
use tracing::instrument;

use super::{USER_SCRIPTS_DIR, UnraidRepo, keys, shell_quote};
use crate::error::UnraidError;
use crate::ssh::CommandOutput;

/// Longest delay accepted for a scheduled reboot or shutdown.
pub const MAX_POWER_DELAY_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerAction {
    Reboot,
    Shutdown,
}

fn power_command(action: PowerAction, delay_secs: u64) -> Result<String, UnraidError> {
    if delay_secs > MAX_POWER_DELAY_SECS {
        return Err(UnraidError::invalid(format!(
            "delay must be at most {}s, got {}s",
            MAX_POWER_DELAY_SECS, delay_secs
        )));
    }
    let when = match delay_secs / 60 {
        0 => "now".to_string(),
        mins => format!("+{}", mins),
    };
    Ok(match action {
        PowerAction::Reboot => format!("shutdown -r {}", when),
        PowerAction::Shutdown => format!("shutdown {}", when),
    })
}

fn script_path(name: &str) -> Result<String, UnraidError> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name == ".." {
        return Err(UnraidError::invalid(format!("invalid script name: {:?}", name)));
    }
    Ok(format!("{}/{}/script", USER_SCRIPTS_DIR, name))
}

impl UnraidRepo {
    /// Runs `command` as given and returns its output whatever the exit status.
    #[instrument(skip(self, command), fields(repo = "unraid", operation = "execute_command"))]
    pub async fn execute_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, UnraidError> {
        if command.trim().is_empty() {
            return Err(UnraidError::invalid("command must not be empty"));
        }
        match timeout {
            Some(t) => self.executor.execute_with_timeout(command, t).await,
            None => self.executor.execute(command).await,
        }
    }

    /// `docker exec` into a running container. Detached runs return immediately.
    #[instrument(skip(self, command), fields(repo = "unraid", operation = "execute_in_container"))]
    pub async fn execute_in_container(
        &self,
        container: &str,
        command: &str,
        detached: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, UnraidError> {
        if container.trim().is_empty() {
            return Err(UnraidError::invalid("container name must not be empty"));
        }
        let full = format!(
            "docker exec {}{} sh -c {}",
            if detached { "-d " } else { "" },
            shell_quote(container),
            shell_quote(command)
        );
        self.execute_command(&full, timeout).await
    }

    /// Runs a User Scripts plugin script, either in the foreground (output returned)
    /// or detached with `nohup`.
    #[instrument(skip(self), fields(repo = "unraid", operation = "execute_user_script"))]
    pub async fn execute_user_script(
        &self,
        name: &str,
        background: bool,
    ) -> Result<CommandOutput, UnraidError> {
        let path = shell_quote(&script_path(name)?);
        if !self.succeeds(&format!("[ -f {} ]", path)).await {
            self.cache.delete(keys::USER_SCRIPTS);
            return Err(UnraidError::not_available(format!(
                "user script {} not found",
                name
            )));
        }
        let command = if background {
            format!("nohup bash {} > /dev/null 2>&1 &", path)
        } else {
            format!("bash {}", path)
        };
        let out = self.run_checked(&command, None).await?;
        tracing::info!(script = name, background, "User script started");
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "stop_user_script"))]
    pub async fn stop_user_script(&self, name: &str) -> Result<(), UnraidError> {
        let path = script_path(name)?;
        let out = self
            .execute_command(&format!("pkill -f {}", shell_quote(&path)), None)
            .await?;
        // pkill exits 1 when nothing matched
        match out.exit_status {
            0 => {
                tracing::info!(script = name, "User script stopped");
                Ok(())
            }
            1 => Err(UnraidError::not_available(format!(
                "user script {} is not running",
                name
            ))),
            code => Err(UnraidError::CommandFailed {
                command: format!("pkill -f {}", path),
                exit_code: code,
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "system_reboot"))]
    pub async fn system_reboot(&self, delay_secs: u64) -> Result<(), UnraidError> {
        let command = power_command(PowerAction::Reboot, delay_secs)?;
        tracing::warn!(delay_secs, "Rebooting server");
        self.run_checked(&command, None).await.map(|_| ())
    }

    #[instrument(skip(self), fields(repo = "unraid", operation = "system_shutdown"))]
    pub async fn system_shutdown(&self, delay_secs: u64) -> Result<(), UnraidError> {
        let command = power_command(PowerAction::Shutdown, delay_secs)?;
        tracing::warn!(delay_secs, "Shutting down server");
        self.run_checked(&command, None).await.map(|_| ())
    }
}
