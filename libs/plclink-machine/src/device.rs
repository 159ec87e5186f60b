//! Common device surface
//!
//! `PlcDevice` is what application code programs against: typed reads and
//! writes on string addresses, backed by the cached image that the poll
//! loop keeps fresh. Reads never touch the wire; they register interest
//! and serve the cache. Writes go to the device and are mirrored into the
//! cache on success.
//!
//! Data access is forgiving: an address that does not parse reads as zero
//! and ignores writes. Lifecycle and connectivity are what callers should
//! watch instead.

use async_trait::async_trait;

/// A polled PLC with typed access to its cached memory image.
#[async_trait]
pub trait PlcDevice: Send + Sync {
    /// Connect the underlying link and start polling. Any previous session
    /// is torn down first.
    async fn create_device(&self) -> anyhow::Result<()>;

    /// Stop polling, drop the link, and zero the cached image.
    async fn close_device(&self);

    /// Read one bit from the cache.
    async fn get_bit(&self, address: &str) -> bool;

    /// Write one bit to the device.
    async fn set_bit(&self, address: &str, value: bool);

    /// Read one word from the cache as a signed 16-bit value.
    async fn get_word_i16(&self, address: &str) -> i16;

    /// Read two consecutive words from the cache as a signed 32-bit value,
    /// low word first.
    async fn get_word_i32(&self, address: &str) -> i32;

    /// Read `length` words from the cache as ASCII text, two characters per
    /// word, trailing NULs stripped.
    async fn get_word_ascii(&self, address: &str, length: usize) -> String;

    /// Write one word to the device.
    async fn set_word_i16(&self, address: &str, value: i16);

    /// Write two consecutive words to the device, low word first.
    async fn set_word_i32(&self, address: &str, value: i32);

    /// Write `length` words of ASCII text to the device, NUL-padded or
    /// truncated to fit.
    async fn set_word_ascii(&self, address: &str, length: usize, value: &str);

    /// Verdict of the latest poll pass.
    fn is_connected(&self) -> bool;

    /// Wait until freshly registered data has been through a full pass.
    async fn wait_for_update(&self);

    /// Replace the callback run after every poll pass.
    fn set_on_data_updated(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Strip `prefix` and parse the rest as a decimal index. Address prefixes
/// are matched without regard to case, so `dt100` and `DT100` are the same
/// register.
pub(crate) fn parse_prefixed(address: &str, prefix: &str) -> Option<usize> {
    strip_prefix_ci(address, prefix)?.parse::<usize>().ok()
}

/// Case-insensitive `strip_prefix` for ASCII region codes.
pub(crate) fn strip_prefix_ci<'a>(address: &'a str, prefix: &str) -> Option<&'a str> {
    let head = address.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &address[prefix.len()..])
}

pub(crate) fn words_to_i32(low: u16, high: u16) -> i32 {
    ((high as i32) << 16) | (low as i32 & 0xFFFF)
}

pub(crate) fn i32_to_words(value: i32) -> [u16; 2] {
    [value as u16, (value >> 16) as u16]
}

/// Pack text into `length` words, two bytes per word with the first
/// character in the low byte. Short input is NUL-padded, long input cut.
pub(crate) fn pack_ascii(value: &str, length: usize) -> Vec<u16> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.resize(length * 2, 0);
    bytes
        .chunks(2)
        .map(|pair| (pair[0] as u16) | ((pair[1] as u16) << 8))
        .collect()
}

/// Inverse of `pack_ascii`: low byte then high byte per word, trailing
/// NULs dropped.
pub(crate) fn unpack_ascii(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.push((word & 0xFF) as u8);
        bytes.push((word >> 8) as u8);
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
