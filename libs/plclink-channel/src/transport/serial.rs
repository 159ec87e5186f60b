//! Serial line transport

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{READ_BUFFER, READ_POLL};
use crate::config::SerialConfig;
use crate::error::{ChannelError, Result};
use crate::traits::Transport;

/// RS-232/485 link over a local serial device.
pub struct SerialTransport {
    label: String,
    config: SerialConfig,
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    connected: AtomicBool,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            label: format!("serial:{}", config.path),
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
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
        self.connected.store(false, Ordering::SeqCst);
        self.reader.lock().await.take();
        self.writer.lock().await.take();

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(&self.config.path, self.config.baud_rate)
            .data_bits(self.config.data_bits())
            .parity(self.config.parity())
            .stop_bits(self.config.stop_bits())
            .open_native_async()?;
        #[cfg(unix)]
        let _ = port.set_exclusive(false);

        let (reader, writer) = tokio::io::split(port);
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        info!(channel = %self.label, baud = self.config.baud_rate, "serial port opened");
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
            // A serial line has no peer-close; zero bytes is just idle.
            Ok(Ok(0)) => Ok(Vec::new()),
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
