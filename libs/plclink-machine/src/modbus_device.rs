//! Modbus TCP machine
//!
//! Generic register/coil access over any [`ModbusBus`]. Holding registers
//! are addressed `H{n}` with n zero-based; coils are addressed `C{n}` with
//! n one-based as electricians label them, so `C1` is coil 0 on the wire.

use std::sync::Arc;

use async_trait::async_trait;

use plclink_protocols::{ModbusBus, ModbusConfig, ModbusMaster};

use crate::device::{
    i32_to_words, pack_ascii, parse_prefixed, unpack_ascii, words_to_i32, PlcDevice,
};
use crate::poll::{MachineCore, Scanner};
use crate::region::Region;
use crate::store::RegionStore;

/// Holding registers kept in the image.
const HOLDING_WORDS: usize = 10_000;
/// Coils kept in the image.
const COIL_BITS: usize = 10_000;
/// Registers fetched per scan block.
const BLOCK_WORDS: usize = 100;
/// Coils fetched per scan block.
const BLOCK_COILS: usize = 2_000;

pub struct ModbusDevice {
    inner: Arc<ModbusInner>,
}

struct ModbusInner {
    bus: Arc<dyn ModbusBus>,
    core: MachineCore,
}

impl ModbusDevice {
    /// Machine over a TCP master built from `config`.
    pub fn tcp(config: ModbusConfig) -> Self {
        let label = format!("modbus/{}:{}#{}", config.host, config.port, config.slave);
        Self::build(Arc::new(ModbusMaster::new(config)), label)
    }

    /// Machine over any bus implementation.
    pub fn with_bus(bus: Arc<dyn ModbusBus>) -> Self {
        Self::build(bus, "modbus".to_string())
    }

    fn build(bus: Arc<dyn ModbusBus>, label: String) -> Self {
        let store = RegionStore::new()
            .with_bits(Region::Coil, COIL_BITS)
            .with_words(Region::Holding, HOLDING_WORDS);
        Self {
            inner: Arc::new(ModbusInner {
                bus,
                core: MachineCore::new(label, store),
            }),
        }
    }
}

impl ModbusInner {
    async fn touch_holding(&self, index: usize, span: usize) {
        let span = span.min(HOLDING_WORDS - index);
        self.core
            .touch(Region::Holding, index, span, BLOCK_WORDS)
            .await;
    }

    async fn write_holding(&self, index: usize, words: &[u16]) {
        if self
            .bus
            .write_multiple_registers(index as u16, words)
            .await
            .is_ok()
        {
            self.core.mirror_words(Region::Holding, index, words);
        }
    }
}

#[async_trait]
impl Scanner for ModbusInner {
    fn core(&self) -> &MachineCore {
        &self.core
    }

    async fn scan_region(&self, region: Region) -> bool {
        let mut ok = true;
        match region {
            Region::Coil => {
                let Some(bits) = self.core.store.bits(region) else {
                    return true;
                };
                for block in self.core.registry.list_interest(region) {
                    let address = block * BLOCK_COILS;
                    let coils = match self
                        .bus
                        .read_coils(address as u16, BLOCK_COILS as u16)
                        .await
                    {
                        Ok(mut coils) => {
                            // Coil replies can be padded to a byte boundary.
                            coils.truncate(BLOCK_COILS);
                            coils
                        }
                        Err(_) => {
                            ok = false;
                            vec![false; BLOCK_COILS]
                        }
                    };
                    bits.set(address, &coils);
                }
            }
            _ => {
                let Some(store) = self.core.store.words(region) else {
                    return true;
                };
                for block in self.core.registry.list_interest(region) {
                    let address = block * BLOCK_WORDS;
                    let words = match self
                        .bus
                        .read_holding_registers(address as u16, BLOCK_WORDS as u16)
                        .await
                    {
                        Ok(words) => words,
                        Err(_) => {
                            ok = false;
                            vec![0; BLOCK_WORDS]
                        }
                    };
                    store.set(address, &words);
                }
            }
        }
        ok
    }
}

#[async_trait]
impl PlcDevice for ModbusDevice {
    async fn create_device(&self) -> anyhow::Result<()> {
        self.close_device().await;
        self.inner.bus.start().await?;
        self.inner.core.spawn_poll(self.inner.clone());
        Ok(())
    }

    async fn close_device(&self) {
        self.inner.core.stop_poll().await;
        self.inner.bus.stop().await;
        self.inner.core.store.clear_all();
    }

    async fn get_bit(&self, address: &str) -> bool {
        let Some(index) = parse_coil_address(address) else {
            return false;
        };
        self.inner
            .core
            .touch(Region::Coil, index, 1, BLOCK_COILS)
            .await;
        self.inner.core.cached_bit(Region::Coil, index)
    }

    async fn set_bit(&self, address: &str, value: bool) {
        let Some(index) = parse_coil_address(address) else {
            return;
        };
        self.inner
            .core
            .registry
            .register_interest(Region::Coil, index, 1, BLOCK_COILS);
        if self
            .inner
            .bus
            .write_single_coil(index as u16, value)
            .await
            .is_ok()
        {
            self.inner.core.mirror_bit(Region::Coil, index, value);
        }
    }

    async fn get_word_i16(&self, address: &str) -> i16 {
        let Some(index) = parse_holding_address(address) else {
            return 0;
        };
        self.inner.touch_holding(index, 1).await;
        self.inner
            .core
            .cached_words(Region::Holding, index, 1)
            .first()
            .map(|w| *w as i16)
            .unwrap_or(0)
    }

    async fn get_word_i32(&self, address: &str) -> i32 {
        let Some(index) = parse_holding_address(address) else {
            return 0;
        };
        self.inner.touch_holding(index, 2).await;
        let words = self.inner.core.cached_words(Region::Holding, index, 2);
        words_to_i32(
            words.first().copied().unwrap_or(0),
            words.get(1).copied().unwrap_or(0),
        )
    }

    async fn get_word_ascii(&self, address: &str, length: usize) -> String {
        let Some(index) = parse_holding_address(address) else {
            return String::new();
        };
        if length == 0 {
            return String::new();
        }
        self.inner.touch_holding(index, length).await;
        unpack_ascii(&self.inner.core.cached_words(Region::Holding, index, length))
    }

    async fn set_word_i16(&self, address: &str, value: i16) {
        let Some(index) = parse_holding_address(address) else {
            return;
        };
        self.inner.touch_holding(index, 2).await;
        self.inner.write_holding(index, &[value as u16]).await;
    }

    async fn set_word_i32(&self, address: &str, value: i32) {
        let Some(index) = parse_holding_address(address) else {
            return;
        };
        self.inner.touch_holding(index, 2).await;
        self.inner.write_holding(index, &i32_to_words(value)).await;
    }

    async fn set_word_ascii(&self, address: &str, length: usize, value: &str) {
        let Some(index) = parse_holding_address(address) else {
            return;
        };
        if length == 0 {
            return;
        }
        self.inner.touch_holding(index, 2).await;
        self.inner.write_holding(index, &pack_ascii(value, length)).await;
    }

    fn is_connected(&self) -> bool {
        self.inner.core.is_connected()
    }

    async fn wait_for_update(&self) {
        self.inner.core.wait_for_update().await;
    }

    fn set_on_data_updated(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.inner.core.set_on_data_updated(callback);
    }
}

fn parse_holding_address(address: &str) -> Option<usize> {
    parse_prefixed(address, "H").filter(|index| *index < HOLDING_WORDS)
}

/// Coil numbers start at 1; the wire address is one less.
fn parse_coil_address(address: &str) -> Option<usize> {
    let number = parse_prefixed(address, "C")?;
    if number == 0 || number > COIL_BITS {
        return None;
    }
    Some(number - 1)
}
