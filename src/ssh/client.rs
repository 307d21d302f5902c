// russh client: password auth, keepalive, exec over a fresh session channel

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::ssh_key::PublicKey;
use russh::{ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;

use super::{CommandOutput, Connector, Session};
use crate::error::UnraidError;

struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    // Unraid hosts are reached on the LAN with password auth; the host key is not pinned.
    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub login_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_max: usize,
}

pub struct SshConnector {
    settings: SshSettings,
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        let config = client::Config {
            client_id: russh::SshId::Standard(crate::version::ssh_client_id()),
            keepalive_interval: Some(settings.keepalive_interval),
            keepalive_max: settings.keepalive_max,
            ..Default::default()
        };
        Self {
            settings,
            config: Arc::new(config),
        }
    }

    async fn open(&self) -> Result<Handle<Client>, UnraidError> {
        let s = &self.settings;
        let mut handle = client::connect(self.config.clone(), (s.host.as_str(), s.port), Client)
            .await
            .map_err(|e| UnraidError::connection(format!("{}:{}: {}", s.host, s.port, e)))?;
        let auth = handle
            .authenticate_password(s.username.clone(), s.password.clone())
            .await
            .map_err(|e| UnraidError::connection(format!("auth exchange: {}", e)))?;
        if !auth.success() {
            return Err(UnraidError::Authentication {
                host: s.host.clone(),
                username: s.username.clone(),
            });
        }
        Ok(handle)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, UnraidError> {
        let secs = self.settings.login_timeout.as_secs();
        let handle = tokio::time::timeout(self.settings.login_timeout, self.open())
            .await
            .map_err(|_| UnraidError::Timeout {
                command: format!("ssh login to {}", self.settings.host),
                secs,
            })??;
        tracing::debug!(host = %self.settings.host, port = self.settings.port, "SSH session established");
        Ok(Box::new(SshSession {
            handle: Some(handle),
        }))
    }

    fn host(&self) -> &str {
        &self.settings.host
    }
}

struct SshSession {
    handle: Option<Handle<Client>>,
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, UnraidError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| UnraidError::connection("session closed"))?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| UnraidError::connection(format!("open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| UnraidError::connection(format!("exec: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }
        let exit_status = exit_status
            .ok_or_else(|| UnraidError::connection("channel closed without exit status"))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
        {
            tracing::debug!(error = %e, "SSH disconnect failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_closed())
    }
}
