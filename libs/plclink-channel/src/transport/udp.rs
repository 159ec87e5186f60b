//! UDP datagram transport

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{READ_BUFFER, READ_POLL};
use crate::config::UdpConfig;
use crate::error::{ChannelError, Result};
use crate::traits::Transport;

/// Datagram link to one remote endpoint. An ephemeral local socket is bound
/// and `connect`ed to the configured peer, so reads only see that peer's
/// datagrams. Counts as connected once the socket exists.
pub struct UdpTransport {
    label: String,
    config: UdpConfig,
    socket: parking_lot::Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            label: format!("udp://{}:{}", config.host, config.port),
            config,
            socket: parking_lot::Mutex::new(None),
        }
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().clone()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_connected(&self) -> bool {
        self.socket.lock().is_some()
    }

    async fn open(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ChannelError::connect(format!("{}: {e}", self.label)))?;
        socket
            .connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ChannelError::connect(format!("{}: {e}", self.label)))?;
        *self.socket.lock() = Some(Arc::new(socket));
        info!(channel = %self.label, "udp socket bound");
        Ok(())
    }

    async fn read_raw(&self) -> Result<Vec<u8>> {
        let Some(socket) = self.socket() else {
            return Ok(Vec::new());
        };

        let mut buffer = vec![0u8; READ_BUFFER];
        match tokio::time::timeout(READ_POLL, socket.recv(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(len)) => {
                buffer.truncate(len);
                debug!(channel = %self.label, data = %hex::encode(&buffer), "RX");
                Ok(buffer)
            }
            Ok(Err(e)) => Err(ChannelError::read(format!("{}: {e}", self.label))),
        }
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let Some(socket) = self.socket() else {
            return Err(ChannelError::NotConnected);
        };

        debug!(channel = %self.label, data = %hex::encode(data), "TX");
        socket
            .send(data)
            .await
            .map_err(|e| ChannelError::write(format!("{}: {e}", self.label)))?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.socket.lock().take();
    }
}
