//! Modbus TCP master adapter
//!
//! [`ModbusBus`] is the seam the machine layer polls through; [`ModbusMaster`]
//! implements it over `tokio-modbus`. The live `client::Context` sits behind
//! one async mutex, so operations are naturally serialized. A failed or
//! timed-out operation drops the context and the next operation re-dials;
//! there is no retry inside a single call.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{info, warn};

use crate::error::{ProtocolError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OPERATION_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_slave")]
    pub slave: u8,
}

fn default_port() -> u16 {
    502
}

fn default_slave() -> u8 {
    1
}

impl ModbusConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            slave: default_slave(),
        }
    }

    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", default_port())
    }
}

/// Register/coil operations the polling layer needs from a Modbus link.
#[async_trait]
pub trait ModbusBus: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self);
    async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>>;
    async fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn write_single_coil(&self, address: u16, value: bool) -> Result<()>;
    async fn write_multiple_registers(&self, address: u16, data: &[u16]) -> Result<()>;
}

type Outcome<T> = std::result::Result<std::io::Result<T>, tokio::time::error::Elapsed>;

/// Modbus TCP master over `tokio-modbus`.
pub struct ModbusMaster {
    label: String,
    config: ModbusConfig,
    context: Mutex<Option<Context>>,
}

impl ModbusMaster {
    pub fn new(config: ModbusConfig) -> Self {
        Self {
            label: format!("modbus://{}:{}#{}", config.host, config.port, config.slave),
            config,
            context: Mutex::new(None),
        }
    }

    async fn dial(&self) -> Result<Context> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ProtocolError::config(format!("{}: {e}", self.label)))?;
        let context = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tcp::connect_slave(addr, Slave(self.config.slave)),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(|e| ProtocolError::connect(format!("{}: {e}", self.label)))?;
        info!(bus = %self.label, "modbus connected");
        Ok(context)
    }

    /// Map one timed operation outcome, dropping the context on failure so
    /// the next operation starts from a fresh dial.
    fn conclude<T>(&self, slot: &mut Option<Context>, outcome: Outcome<T>) -> Result<T> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(bus = %self.label, "modbus operation failed: {e}");
                slot.take();
                Err(e.into())
            }
            Err(_) => {
                warn!(bus = %self.label, "modbus operation timed out");
                slot.take();
                Err(ProtocolError::Timeout)
            }
        }
    }
}

#[async_trait]
impl ModbusBus for ModbusMaster {
    async fn start(&self) -> Result<()> {
        let mut guard = self.context.lock().await;
        guard.take();
        *guard = Some(self.dial().await?);
        Ok(())
    }

    async fn stop(&self) {
        self.context.lock().await.take();
    }

    async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>> {
        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let Some(context) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        let outcome =
            tokio::time::timeout(OPERATION_TIMEOUT, context.read_coils(address, count)).await;
        self.conclude(&mut guard, outcome)
    }

    async fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let Some(context) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        let outcome =
            tokio::time::timeout(OPERATION_TIMEOUT, context.read_holding_registers(address, count))
                .await;
        self.conclude(&mut guard, outcome)
    }

    async fn write_single_coil(&self, address: u16, value: bool) -> Result<()> {
        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let Some(context) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        let outcome =
            tokio::time::timeout(OPERATION_TIMEOUT, context.write_single_coil(address, value)).await;
        self.conclude(&mut guard, outcome)
    }

    async fn write_multiple_registers(&self, address: u16, data: &[u16]) -> Result<()> {
        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let Some(context) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };
        let outcome =
            tokio::time::timeout(OPERATION_TIMEOUT, context.write_multiple_registers(address, data))
                .await;
        self.conclude(&mut guard, outcome)
    }
}
