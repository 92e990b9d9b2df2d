//! SSH transport implementation using russh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::{AuthMethod, ConnectParams, Transport};
use crate::error::{Result, TransportError};

/// SSH transport wrapping a russh client session with a PTY shell channel.
pub struct SshTransport {
    params: ConnectParams,
    session: Option<Handle<SshHandler>>,
    channel: Option<Channel<Msg>>,
}

impl SshTransport {
    /// Create a disconnected transport for the given parameters.
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            session: None,
            channel: None,
        }
    }

    /// The parameters this transport connects with.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn authenticate(&self, session: &mut Handle<SshHandler>) -> Result<()> {
        let username = &self.params.username;
        let success = match &self.params.auth {
            AuthMethod::None => session
                .authenticate_none(username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(
                    path,
                    passphrase.as_ref().map(ExposeSecret::expose_secret),
                )
                .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: username.clone(),
            }
            .into());
        }

        Ok(())
    }

    fn channel_mut(&mut self) -> Result<&mut Channel<Msg>> {
        self.channel
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected.into())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&mut self) -> Result<()> {
        let config = Arc::new(client::Config::default());

        let mut session = tokio::time::timeout(
            self.params.connect_timeout,
            client::connect(
                config,
                (self.params.host.as_str(), self.params.port),
                SshHandler,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.params.connect_timeout))?
        .map_err(TransportError::Ssh)?;

        self.authenticate(&mut session).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_pty(
                true,
                "xterm",
                self.params.terminal_width,
                self.params.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        debug!("ssh shell opened to {}", self.params.socket_addr());
        self.session = Some(session);
        self.channel = Some(channel);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.channel = None;
        if let Some(session) = self.session.take() {
            session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(TransportError::Ssh)?;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let channel = self.channel_mut()?;
        channel
            .data(text.as_bytes())
            .await
            .map_err(|_| TransportError::Disconnected)?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        let channel = self.channel_mut()?;
        loop {
            let msg = tokio::time::timeout(timeout, channel.wait())
                .await
                .map_err(|_| TransportError::ReadTimeout(timeout))?;

            match msg {
                Some(ChannelMsg::Data { data }) => {
                    return Ok(String::from_utf8_lossy(&data).into_owned());
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(String::from_utf8_lossy(&data).into_owned());
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.channel = None;
                    return Err(TransportError::Disconnected.into());
                }
                // Window adjusts, exit status etc. carry no output.
                Some(_) => continue,
            }
        }
    }

    fn is_active(&self) -> bool {
        self.channel.is_some()
            && self
                .session
                .as_ref()
                .is_some_and(|s| !s.is_closed())
    }
}

/// russh client handler. Host keys are accepted without verification;
/// automation targets live on management networks where known_hosts
/// churn (RMA'd line cards, re-imaged gear) would break every run.
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}
