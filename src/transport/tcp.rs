//! Raw TCP transport for unauthenticated line-based endpoints (console
//! servers, lab gear, test harnesses).

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{ConnectParams, Transport};
use crate::error::{Result, TransportError};

const READ_CHUNK: usize = 8192;

/// Plain TCP transport.
pub struct TcpTransport {
    params: ConnectParams,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Create a disconnected transport for the given parameters.
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            stream: None,
        }
    }

    /// The parameters this transport connects with.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected.into())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        let addr = self.params.socket_addr();
        let stream = tokio::time::timeout(
            self.params.connect_timeout,
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.params.connect_timeout))?
        .map_err(|e| TransportError::ConnectionFailed {
            host: self.params.host.clone(),
            port: self.params.port,
            source: e,
        })?;

        debug!("tcp connection opened to {addr}");
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(TransportError::Io)?;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let stream = self.stream_mut()?;
        stream
            .write_all(text.as_bytes())
            .await
            .map_err(TransportError::Io)?;
        stream.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; READ_CHUNK];

        let n = tokio::time::timeout(timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::ReadTimeout(timeout))?
            .map_err(TransportError::Io)?;

        if n == 0 {
            self.stream = None;
            return Err(TransportError::Disconnected.into());
        }

        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}
