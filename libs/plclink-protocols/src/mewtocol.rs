//! Panasonic Mewtocol-COM codec
//!
//! ASCII request/response protocol: every frame opens with `<`, carries a
//! two-digit station number, and closes with an XOR block check (two
//! uppercase hex characters) and a CR. Data registers move through RDD/WDD,
//! contacts through the RC*/WC* family. Replies flag success with `$` at
//! byte 3 (`!` marks a device-side error).
//!
//! Read results always have the requested length: words the device did not
//! answer stay zero. A reply that fails validation rejects the whole
//! operation and the raw exchange is logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use plclink_channel::{FramedChannel, SerialConfig, SerialTransport, Transport, UdpConfig, UdpTransport};

use crate::ascii::{checksum_matches, hex_byte, push_checksum};
use crate::error::{ProtocolError, Result};

/// Reply overhead: 6 header characters plus 2 block-check characters and CR
const REPLY_OVERHEAD: usize = 9;
/// First data character in a reply (`<01$RD` comes before it)
const DATA_OFFSET: usize = 6;

const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Contact location: word address plus bit index within that word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactRef {
    pub word: u16,
    pub bit: u8,
}

impl ContactRef {
    pub fn new(word: u16, bit: u8) -> Self {
        Self { word, bit }
    }
}

/// Mewtocol client over one framed channel.
pub struct MewtocolClient {
    channel: FramedChannel,
    station: u8,
}

impl MewtocolClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let channel = FramedChannel::new(transport);
        channel.set_start_marker(b"<".to_vec());
        channel.set_end_marker(b"\r".to_vec());
        channel.set_read_timeout(EXCHANGE_TIMEOUT);
        Self {
            channel,
            station: 1,
        }
    }

    /// Client over a UDP link to `host:port`.
    pub fn udp(config: UdpConfig) -> Self {
        Self::new(Arc::new(UdpTransport::new(config)))
    }

    /// Client over a local serial port.
    pub fn serial(config: SerialConfig) -> Self {
        Self::new(Arc::new(SerialTransport::new(config)))
    }

    pub fn with_station(mut self, station: u8) -> Self {
        self.station = station;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.channel.set_read_timeout(timeout);
        self
    }

    /// Underlying channel, for callbacks and lifecycle wiring
    pub fn channel(&self) -> &FramedChannel {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn start(&self) -> plclink_channel::Result<()> {
        self.channel.start().await
    }

    pub async fn stop(&self) {
        self.channel.stop().await
    }

    /// Read `size` data registers starting at `address` (RDD).
    pub async fn read_data_words(&self, address: u16, size: u16) -> Result<Vec<u16>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let end = u32::from(address) + u32::from(size) - 1;
        let command = build_command(self.station, &format!("RDD{address:05}{end:05}"));
        let reply = self.channel.send_receive(command.clone()).await;
        parse_word_reply(&reply, usize::from(size)).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Write data registers starting at `address` (WDD).
    pub async fn write_data_words(&self, address: u16, data: &[u16]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = u32::from(address) + data.len() as u32 - 1;
        let mut body = format!("WDD{address:05}{end:05}");
        for word in data {
            body.push_str(&format!("{:02X}{:02X}", word & 0xFF, word >> 8));
        }
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Read one contact (RCS).
    pub async fn read_contact(&self, code: char, contact: ContactRef) -> Result<bool> {
        let body = format!("RCS{}{:03}{:X}", code, contact.word, contact.bit);
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))?;
        if reply.len() < REPLY_OVERHEAD + 1 {
            return Err(reject(&command, &reply, "contact state missing"));
        }
        Ok(reply[DATA_OFFSET] == b'1')
    }

    /// Read up to eight contacts in one exchange (RCP). One flag per
    /// requested contact; unanswered positions stay false.
    pub async fn read_contacts(&self, code: char, contacts: &[ContactRef]) -> Result<Vec<bool>> {
        if contacts.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = format!("RCP{}", contacts.len());
        for contact in contacts {
            body.push_str(&format!("{}{:03}{:X}", code, contact.word, contact.bit));
        }
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))?;
        let answered = reply.len().saturating_sub(REPLY_OVERHEAD).min(contacts.len());
        let mut states = vec![false; contacts.len()];
        for (i, state) in states.iter_mut().take(answered).enumerate() {
            *state = reply[DATA_OFFSET + i] == b'1';
        }
        Ok(states)
    }

    /// Read a span of contact words (RCC), 16 contacts per word.
    pub async fn read_contact_words(&self, code: char, address: u16, size: u16) -> Result<Vec<u16>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let end = u32::from(address) + u32::from(size) - 1;
        let body = format!("RCC{code}{address:04}{end:04}");
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        parse_word_reply(&reply, usize::from(size)).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Write one contact (WCS).
    pub async fn write_contact(&self, code: char, contact: ContactRef, value: bool) -> Result<()> {
        let body = format!(
            "WCS{}{:03}{:X}{}",
            code,
            contact.word,
            contact.bit,
            u8::from(value)
        );
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Write up to eight contacts in one exchange (WCP).
    pub async fn write_contacts(&self, code: char, contacts: &[(ContactRef, bool)]) -> Result<()> {
        if contacts.is_empty() {
            return Ok(());
        }
        let mut body = format!("WCP{}", contacts.len());
        for (contact, value) in contacts {
            body.push_str(&format!(
                "{}{:03}{:X}{}",
                code,
                contact.word,
                contact.bit,
                u8::from(*value)
            ));
        }
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Write a span of contact words (WCC).
    pub async fn write_contact_words(&self, code: char, address: u16, data: &[u16]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = u32::from(address) + data.len() as u32 - 1;
        let mut body = format!("WCC{code}{address:04}{end:04}");
        for word in data {
            body.push_str(&format!("{:02X}{:02X}", word & 0xFF, word >> 8));
        }
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))
    }
}

/// Wrap a command body in header, block check, and CR.
fn build_command(station: u8, body: &str) -> Vec<u8> {
    let mut frame = format!("<{station:02}#{body}").into_bytes();
    push_checksum(&mut frame);
    frame.push(b'\r');
    frame
}

/// Header, status, and block-check validation shared by every reply shape.
fn check_reply(reply: &[u8]) -> std::result::Result<(), &'static str> {
    if reply.len() < REPLY_OVERHEAD {
        return Err("reply too short");
    }
    if reply[3] != b'$' {
        return Err("device error status");
    }
    let stated = &reply[reply.len() - 3..reply.len() - 1];
    if !checksum_matches(&reply[..reply.len() - 3], stated) {
        return Err("block check mismatch");
    }
    Ok(())
}

/// Decode word data: four hex characters per word, low byte first. The
/// result always has `size` words; positions past the answered count are
/// zero.
fn parse_word_reply(reply: &[u8], size: usize) -> std::result::Result<Vec<u16>, &'static str> {
    check_reply(reply)?;
    let answered = ((reply.len() - REPLY_OVERHEAD) / 4).min(size);
    let mut words = vec![0u16; size];
    for (i, word) in words.iter_mut().take(answered).enumerate() {
        let offset = DATA_OFFSET + i * 4;
        let (Some(low), Some(high)) = (
            hex_byte(&reply[offset..offset + 2]),
            hex_byte(&reply[offset + 2..offset + 4]),
        ) else {
            return Err("data not hex");
        };
        *word = u16::from(high) << 8 | u16::from(low);
    }
    Ok(words)
}

fn reject(command: &[u8], reply: &[u8], reason: &'static str) -> ProtocolError {
    warn!(
        command = %String::from_utf8_lossy(command),
        reply = %String::from_utf8_lossy(reply),
        "mewtocol exchange rejected: {reason}"
    );
    ProtocolError::invalid_reply(reason)
}
