//! Omron C-series machine
//!
//! Upperlink (Host Link) over serial. Only the DM data area is exposed;
//! the machine has no addressable bit regions, so bit reads are always
//! false and bit writes are dropped.

use std::sync::Arc;

use async_trait::async_trait;

use plclink_channel::SerialConfig;
use plclink_protocols::UpperlinkClient;

use crate::device::{
    i32_to_words, pack_ascii, parse_prefixed, unpack_ascii, words_to_i32, PlcDevice,
};
use crate::poll::{MachineCore, Scanner};
use crate::region::Region;
use crate::store::RegionStore;

/// DM words reachable through RD/WD.
const DATA_WORDS: usize = 50_000;
/// Words fetched per scan block.
const BLOCK_WORDS: usize = 250;

pub struct OmronDevice {
    inner: Arc<OmronInner>,
}

struct OmronInner {
    client: UpperlinkClient,
    core: MachineCore,
}

impl OmronDevice {
    /// Machine over a local serial port.
    pub fn serial(config: SerialConfig) -> Self {
        Self::with_client(UpperlinkClient::serial(config))
    }

    /// Machine over an already configured client.
    pub fn with_client(client: UpperlinkClient) -> Self {
        let store = RegionStore::new().with_words(Region::Dm, DATA_WORDS);
        let label = format!("omron/{}", client.channel().label());
        Self {
            inner: Arc::new(OmronInner {
                client,
                core: MachineCore::new(label, store),
            }),
        }
    }
}

impl OmronInner {
    async fn touch_data(&self, index: usize, span: usize) {
        let span = span.min(DATA_WORDS - index);
        self.core.touch(Region::Dm, index, span, BLOCK_WORDS).await;
    }

    async fn write_data(&self, index: usize, words: &[u16]) {
        if self.client.write_dm_words(index as u16, words).await.is_ok() {
            self.core.mirror_words(Region::Dm, index, words);
        }
    }
}

#[async_trait]
impl Scanner for OmronInner {
    fn core(&self) -> &MachineCore {
        &self.core
    }

    async fn scan_region(&self, region: Region) -> bool {
        let Some(store) = self.core.store.words(region) else {
            return true;
        };
        let mut ok = true;
        for block in self.core.registry.list_interest(region) {
            let address = block * BLOCK_WORDS;
            let words = match self
                .client
                .read_dm_words(address as u16, BLOCK_WORDS as u16)
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
        ok
    }
}

#[async_trait]
impl PlcDevice for OmronDevice {
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

    async fn get_bit(&self, _address: &str) -> bool {
        false
    }

    async fn set_bit(&self, _address: &str, _value: bool) {}

    async fn get_word_i16(&self, address: &str) -> i16 {
        let Some(index) = parse_data_address(address) else {
            return 0;
        };
        self.inner.touch_data(index, 1).await;
        self.inner
            .core
            .cached_words(Region::Dm, index, 1)
            .first()
            .map(|w| *w as i16)
            .unwrap_or(0)
    }

    async fn get_word_i32(&self, address: &str) -> i32 {
        let Some(index) = parse_data_address(address) else {
            return 0;
        };
        self.inner.touch_data(index, 2).await;
        let words = self.inner.core.cached_words(Region::Dm, index, 2);
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
        unpack_ascii(&self.inner.core.cached_words(Region::Dm, index, length))
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

fn parse_data_address(address: &str) -> Option<usize> {
    parse_prefixed(address, "DM").filter(|index| *index < DATA_WORDS)
}
