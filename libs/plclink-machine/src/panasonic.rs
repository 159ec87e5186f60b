//! Panasonic FP-series machine
//!
//! Mewtocol over UDP or serial. Data registers live in `DT`, contacts in
//! `R` (internal relays), `Y` (outputs), and `X` (inputs). Contact scans
//! move whole words via RCC and fan each word out into 16 cached bits;
//! single-contact writes go through WCS with the word/bit split the
//! protocol wants. `X` is physical input state, so writes to it are
//! dropped before they reach the wire.

use std::sync::Arc;

use async_trait::async_trait;

use plclink_channel::{SerialConfig, UdpConfig};
use plclink_protocols::{ContactRef, MewtocolClient};

use crate::device::{
    i32_to_words, pack_ascii, parse_prefixed, strip_prefix_ci, unpack_ascii, words_to_i32,
    PlcDevice,
};
use crate::poll::{MachineCore, Scanner};
use crate::region::Region;
use crate::store::RegionStore;

/// Data registers reachable through RDD/WDD.
const DATA_WORDS: usize = 50_000;
/// Contacts per bit region.
const CONTACT_BITS: usize = 16_000;
/// Words fetched per scan block.
const BLOCK_WORDS: usize = 250;

pub struct PanasonicDevice {
    inner: Arc<PanasonicInner>,
}

struct PanasonicInner {
    client: MewtocolClient,
    core: MachineCore,
}

impl PanasonicDevice {
    /// Machine over a UDP link (Ethernet units).
    pub fn udp(config: UdpConfig) -> Self {
        Self::with_client(MewtocolClient::udp(config))
    }

    /// Machine over a local serial port (tool or COM port units).
    pub fn serial(config: SerialConfig) -> Self {
        Self::with_client(MewtocolClient::serial(config))
    }

    /// Machine over an already configured client.
    pub fn with_client(client: MewtocolClient) -> Self {
        let store = RegionStore::new()
            .with_bits(Region::R, CONTACT_BITS)
            .with_bits(Region::Y, CONTACT_BITS)
            .with_bits(Region::X, CONTACT_BITS)
            .with_words(Region::Dt, DATA_WORDS);
        let label = format!("panasonic/{}", client.channel().label());
        Self {
            inner: Arc::new(PanasonicInner {
                client,
                core: MachineCore::new(label, store),
            }),
        }
    }
}

impl PanasonicInner {
    /// Register a DT span, clipped to the region, waiting when new.
    async fn touch_data(&self, index: usize, span: usize) {
        let span = span.min(DATA_WORDS - index);
        self.core.touch(Region::Dt, index, span, BLOCK_WORDS).await;
    }

    async fn write_data(&self, index: usize, words: &[u16]) {
        if self.client.write_data_words(index as u16, words).await.is_ok() {
            self.core.mirror_words(Region::Dt, index, words);
        }
    }
}

#[async_trait]
impl Scanner for PanasonicInner {
    fn core(&self) -> &MachineCore {
        &self.core
    }

    async fn scan_region(&self, region: Region) -> bool {
        let blocks = self.core.registry.list_interest(region);
        let mut ok = true;
        if region.is_bit() {
            let Some(code) = contact_code(region) else {
                return true;
            };
            let Some(bits) = self.core.store.bits(region) else {
                return true;
            };
            for block in blocks {
                let word_address = block * BLOCK_WORDS;
                let words = match self
                    .client
                    .read_contact_words(code, word_address as u16, BLOCK_WORDS as u16)
                    .await
                {
                    Ok(words) => words,
                    Err(_) => {
                        ok = false;
                        vec![0; BLOCK_WORDS]
                    }
                };
                bits.set(word_address * 16, &expand_contact_words(&words));
            }
        } else {
            let Some(store) = self.core.store.words(region) else {
                return true;
            };
            for block in blocks {
                let address = block * BLOCK_WORDS;
                let words = match self
                    .client
                    .read_data_words(address as u16, BLOCK_WORDS as u16)
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
        ok
    }
}

#[async_trait]
impl PlcDevice for PanasonicDevice {
    async fn create_device(&self) -> anyhow::Result<()> {
        self.close_device().await;
        self.inner.client.start().await?;
        self.inner.core.spawn_poll(self.inner.clone());
        Ok(())
    }

    async fn close_device(&self) {
        self.inner.core.stop_poll().await;
        self.inner.client.stop().await;
        self.inner.core.store.clear_all();
    }

    async fn get_bit(&self, address: &str) -> bool {
        let Some((region, index)) = parse_bit_address(address) else {
            return false;
        };
        self.inner
            .core
            .touch(region, index / 16, 1, BLOCK_WORDS)
            .await;
        self.inner.core.cached_bit(region, index)
    }

    async fn set_bit(&self, address: &str, value: bool) {
        let Some((region, index)) = parse_bit_address(address) else {
            return;
        };
        self.inner
            .core
            .registry
            .register_interest(region, index / 16, 1, BLOCK_WORDS);
        // Inputs are scanned like any contact but never written.
        if region == Region::X {
            return;
        }
        let Some(code) = contact_code(region) else {
            return;
        };
        let contact = ContactRef::new((index / 16) as u16, (index % 16) as u8);
        if self
            .inner
            .client
            .write_contact(code, contact, value)
            .await
            .is_ok()
        {
            self.inner.core.mirror_bit(region, index, value);
        }
    }

    async fn get_word_i16(&self, address: &str) -> i16 {
        let Some(index) = parse_data_address(address) else {
            return 0;
        };
        self.inner.touch_data(index, 1).await;
        self.inner
            .core
            .cached_words(Region::Dt, index, 1)
            .first()
            .map(|w| *w as i16)
            .unwrap_or(0)
    }

    async fn get_word_i32(&self, address: &str) -> i32 {
        let Some(index) = parse_data_address(address) else {
            return 0;
        };
        self.inner.touch_data(index, 2).await;
        let words = self.inner.core.cached_words(Region::Dt, index, 2);
        words_to_i32(
            words.first().copied().unwrap_or(0),
            words.get(1).copied().unwrap_or(0),
        )
    }

    async fn get_word_ascii(&self, address: &str, length: usize) -> String {
        let Some(index) = parse_data_address(address) else {
            return String::new();
        };
        if length == 0 {
            return String::new();
        }
        self.inner.touch_data(index, length).await;
        unpack_ascii(&self.inner.core.cached_words(Region::Dt, index, length))
    }

    async fn set_word_i16(&self, address: &str, value: i16) {
        let Some(index) = parse_data_address(address) else {
            return;
        };
        self.inner.touch_data(index, 2).await;
        self.inner.write_data(index, &[value as u16]).await;
    }

    async fn set_word_i32(&self, address: &str, value: i32) {
        let Some(index) = parse_data_address(address) else {
            return;
        };
        self.inner.touch_data(index, 2).await;
        self.inner.write_data(index, &i32_to_words(value)).await;
    }

    async fn set_word_ascii(&self, address: &str, length: usize, value: &str) {
        let Some(index) = parse_data_address(address) else {
            return;
        };
        if length == 0 {
            return;
        }
        self.inner.touch_data(index, 2).await;
        self.inner.write_data(index, &pack_ascii(value, length)).await;
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

fn contact_code(region: Region) -> Option<char> {
    match region {
        Region::R => Some('R'),
        Region::Y => Some('Y'),
        Region::X => Some('X'),
        _ => None,
    }
}

fn parse_data_address(address: &str) -> Option<usize> {
    parse_prefixed(address, "DT").filter(|index| *index < DATA_WORDS)
}

/// Resolve `R123A` style contact addresses to (region, bit index).
fn parse_bit_address(address: &str) -> Option<(Region, usize)> {
    for region in [Region::R, Region::Y, Region::X] {
        if let Some(index) = parse_contact_address(address, region.code()) {
            if index < CONTACT_BITS {
                return Some((region, index));
            }
            return None;
        }
    }
    None
}

/// Contact addresses are decimal word digits followed by one hex bit
/// digit: `R10A` is word 10, bit 10. The flat index is `word*16 + bit`.
fn parse_contact_address(address: &str, code: &str) -> Option<usize> {
    let rest = strip_prefix_ci(address, code)?;
    let mut chars = rest.chars();
    let bit = chars.next_back()?.to_digit(16)? as usize;
    let word_part = chars.as_str();
    if word_part.is_empty() {
        return None;
    }
    let word = word_part.parse::<usize>().ok()?;
    Some(word * 16 + bit)
}

/// One bool per contact, low bit of each word first.
fn expand_contact_words(words: &[u16]) -> Vec<bool> {
    let mut flags = Vec::with_capacity(words.len() * 16);
    for word in words {
        for bit in 0..16 {
            flags.push(word & (1 << bit) != 0);
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Address parsing
    // ========================================================================

    #[test]
    fn test_contact_address_splits_word_and_hex_bit() {
        assert_eq!(parse_contact_address("R10A", "R"), Some(170));
        assert_eq!(parse_contact_address("R00", "R"), Some(0));
        assert_eq!(parse_contact_address("R0F", "R"), Some(15));
        assert_eq!(parse_contact_address("Y123F", "Y"), Some(1983));
        // Case does not matter, in either the code or the bit digit.
        assert_eq!(parse_contact_address("r10a", "R"), Some(170));
    }

    #[test]
    fn test_contact_address_needs_word_and_bit() {
        assert_eq!(parse_contact_address("R5", "R"), None);
        assert_eq!(parse_contact_address("R", "R"), None);
        assert_eq!(parse_contact_address("RXYZ", "R"), None);
        assert_eq!(parse_contact_address("DT5", "R"), None);
    }

    #[test]
    fn test_bit_address_picks_region() {
        assert_eq!(parse_bit_address("R10A"), Some((Region::R, 170)));
        assert_eq!(parse_bit_address("Y20"), Some((Region::Y, 32)));
        assert_eq!(parse_bit_address("X00"), Some((Region::X, 0)));
        assert_eq!(parse_bit_address("DT100"), None);
        // word 9999, bit 9 lands far past the region
        assert_eq!(parse_bit_address("R99999"), None);
    }

    #[test]
    fn test_data_address_is_bounded_decimal() {
        assert_eq!(parse_data_address("DT0"), Some(0));
        assert_eq!(parse_data_address("DT49999"), Some(49_999));
        assert_eq!(parse_data_address("DT50000"), None);
        assert_eq!(parse_data_address("DT1A"), None);
    }

    // ========================================================================
    // Contact word expansion
    // ========================================================================

    #[test]
    fn test_expand_is_low_bit_first() {
        let flags = expand_contact_words(&[0x0001, 0x8000]);
        assert_eq!(flags.len(), 32);
        assert!(flags[0]);
        assert!(!flags[1]);
        assert!(!flags[16]);
        assert!(flags[31]);
    }
}
