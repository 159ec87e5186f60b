//! Single-client TCP listener transport

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{READ_BUFFER, READ_POLL};
use crate::config::TcpConfig;
use crate::error::{ChannelError, Result};
use crate::traits::Transport;

/// Server-side TCP link for devices that dial in. Listens on the configured
/// port and serves exactly one peer at a time; while a peer is attached, or
/// when the caller's source address is not the configured one, a new
/// connection is closed immediately. `config.host` is the allow-listed
/// source IP (empty or `0.0.0.0` admits any).
pub struct TcpListenerTransport {
    label: String,
    config: TcpConfig,
    link: Arc<Link>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Link {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
}

impl Link {
    async fn clear(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}

impl TcpListenerTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            label: format!("tcp-listen://{}:{}", config.host, config.port),
            config,
            link: Arc::new(Link::default()),
            local_addr: parking_lot::Mutex::new(None),
            accept_task: parking_lot::Mutex::new(None),
        }
    }

    /// Address actually bound, available once the channel has started. Lets
    /// a caller configure port 0 and discover the assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Transport for TcpListenerTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// Bind the listening socket and spawn the accept task. The task exits
    /// when the channel's token is cancelled.
    async fn open(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| ChannelError::connect(format!("{}: {e}", self.label)))?;
        *self.local_addr.lock() = listener.local_addr().ok();
        info!(channel = %self.label, "listening");

        let label = self.label.clone();
        let allowed = self.config.host.clone();
        let link = self.link.clone();
        let task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    () = cancel.cancelled() => break,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        // Dropping the stream closes the rejected socket.
                        if link.connected.load(Ordering::SeqCst) {
                            debug!(channel = %label, %peer, "rejected, peer already attached");
                            continue;
                        }
                        if !allowed.is_empty()
                            && allowed != "0.0.0.0"
                            && peer.ip().to_string() != allowed
                        {
                            warn!(channel = %label, %peer, "rejected, source not allowed");
                            continue;
                        }
                        if stream.set_nodelay(true).is_err() {
                            continue;
                        }
                        let (reader, writer) = stream.into_split();
                        *link.reader.lock().await = Some(reader);
                        *link.writer.lock().await = Some(writer);
                        link.connected.store(true, Ordering::SeqCst);
                        info!(channel = %label, %peer, "client attached");
                    }
                    Err(e) => {
                        warn!(channel = %label, "accept failed: {e}");
                    }
                }
            }
            debug!(channel = %label, "accept task stopped");
        });
        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Establishment is accept-driven; there is nothing to dial.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn read_raw(&self) -> Result<Vec<u8>> {
        let mut guard = self.link.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(Vec::new());
        };

        let mut buffer = vec![0u8; READ_BUFFER];
        match tokio::time::timeout(READ_POLL, reader.read(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                self.link.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::PeerClosed)
            }
            Ok(Ok(len)) => {
                buffer.truncate(len);
                debug!(channel = %self.label, data = %hex::encode(&buffer), "RX");
                Ok(buffer)
            }
            Ok(Err(e)) => {
                self.link.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::read(format!("{}: {e}", self.label)))
            }
        }
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.link.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        debug!(channel = %self.label, data = %hex::encode(data), "TX");
        match writer.write_all(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.link.connected.store(false, Ordering::SeqCst);
                guard.take();
                Err(ChannelError::write(format!("{}: {e}", self.label)))
            }
        }
    }

    async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        self.link.clear().await;
    }
}
