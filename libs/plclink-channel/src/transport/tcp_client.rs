//! Outbound TCP transport

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CONNECT_TIMEOUT, READ_BUFFER, READ_POLL};
use crate::config::TcpConfig;
use crate::error::{ChannelError, Result};
use crate::traits::Transport;

/// Client-side TCP link. Dials the configured peer on every `connect` call;
/// the channel's connect worker provides the retry cadence.
pub struct TcpClientTransport {
    label: String,
    config: TcpConfig,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
}

impl TcpClientTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            label: format!("tcp://{}:{}", config.host, config.port),
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        // Drop any stale halves before dialing again.
        self.connected.store(false, Ordering::SeqCst);
        self.reader.lock().await.take();
        self.writer.lock().await.take();

        let addr = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::connect(format!("{}: dial timed out", self.label)))?
            .map_err(|e| ChannelError::connect(format!("{}: {e}", self.label)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ChannelError::connect(format!("{}: {e}", self.label)))?;

        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        info!(channel = %self.label, "tcp connected");
        Ok(())
    }

    async fn read_raw(&self) -> Result<Vec<u8>> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(Vec::new());
        };

        let mut buffer = vec![0u8; READ_BUFFER];
        match tokio::time::timeout(READ_POLL, reader.read(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                self.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::PeerClosed)
            }
            Ok(Ok(len)) => {
                buffer.truncate(len);
                debug!(channel = %self.label, data = %hex::encode(&buffer), "RX");
                Ok(buffer)
            }
            Ok(Err(e)) => {
                self.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::read(format!("{}: {e}", self.label)))
            }
        }
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        debug!(channel = %self.label, data = %hex::encode(data), "TX");
        match writer.write_all(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::write(format!("{}: {e}", self.label)))
            }
        }
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}
