//! Omron Upperlink (C-mode host link) codec
//!
//! ASCII frames open with `@` and a two-digit unit number and close with a
//! frame-check sequence (XOR, two uppercase hex characters) and `*\r`. Data
//! words are big-endian hex. Replies carry a two-character end code at
//! offset 5; `00` means success, and a unit that cannot parse the command
//! answers with `IC` in the header instead of the echoed command.
//!
//! Same surface rules as the Mewtocol codec: reads come back at the
//! requested length with unanswered words zeroed, rejected exchanges are
//! logged raw and fail the operation.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use plclink_channel::{FramedChannel, SerialConfig, SerialTransport, Transport};

use crate::ascii::{checksum_matches, hex_word, push_checksum};
use crate::error::{ProtocolError, Result};

/// Reply overhead: 5 header characters, 2 end-code characters, 2 check
/// characters, and the `*\r` terminator
const REPLY_OVERHEAD: usize = 11;
/// Shortest parseable reply (`@01IC` + check + terminator)
const MIN_REPLY: usize = 9;
/// First data character in a read reply (`@01RD00` comes before it)
const DATA_OFFSET: usize = 7;

const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upperlink client over one framed channel.
pub struct UpperlinkClient {
    channel: FramedChannel,
    station: u8,
}

impl UpperlinkClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let channel = FramedChannel::new(transport);
        channel.set_start_marker(b"@".to_vec());
        channel.set_end_marker(b"*\r".to_vec());
        channel.set_read_timeout(EXCHANGE_TIMEOUT);
        Self {
            channel,
            station: 1,
        }
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

    /// Read `size` DM words starting at `address` (RD).
    pub async fn read_dm_words(&self, address: u16, size: u16) -> Result<Vec<u16>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let command = build_command(self.station, &format!("RD{address:04}{size:04}"));
        let reply = self.channel.send_receive(command.clone()).await;
        parse_word_reply(&reply, usize::from(size)).map_err(|reason| reject(&command, &reply, reason))
    }

    /// Write DM words starting at `address` (WD).
    pub async fn write_dm_words(&self, address: u16, data: &[u16]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut body = format!("WD{address:04}");
        for word in data {
            body.push_str(&format!("{:02X}{:02X}", word >> 8, word & 0xFF));
        }
        let command = build_command(self.station, &body);
        let reply = self.channel.send_receive(command.clone()).await;
        check_reply(&reply).map_err(|reason| reject(&command, &reply, reason))
    }
}

/// Wrap a command body in header, frame check, and terminator.
fn build_command(station: u8, body: &str) -> Vec<u8> {
    let mut frame = format!("@{station:02}{body}").into_bytes();
    push_checksum(&mut frame);
    frame.extend_from_slice(b"*\r");
    frame
}

/// Header, end-code, and frame-check validation.
fn check_reply(reply: &[u8]) -> std::result::Result<(), &'static str> {
    if reply.len() < MIN_REPLY {
        return Err("reply too short");
    }
    if &reply[3..5] == b"IC" {
        return Err("command not recognized");
    }
    if &reply[5..7] != b"00" {
        return Err("nonzero end code");
    }
    let stated = &reply[reply.len() - 4..reply.len() - 2];
    if !checksum_matches(&reply[..reply.len() - 4], stated) {
        return Err("frame check mismatch");
    }
    Ok(())
}

/// Decode word data: four hex characters per word, high byte first. The
/// result always has `size` words; positions past the answered count are
/// zero.
fn parse_word_reply(reply: &[u8], size: usize) -> std::result::Result<Vec<u16>, &'static str> {
    check_reply(reply)?;
    let answered = (reply.len().saturating_sub(REPLY_OVERHEAD) / 4).min(size);
    let mut words = vec![0u16; size];
    for (i, word) in words.iter_mut().take(answered).enumerate() {
        let offset = DATA_OFFSET + i * 4;
        let Some(value) = hex_word(&reply[offset..offset + 4]) else {
            return Err("data not hex");
        };
        *word = value;
    }
    Ok(words)
}

fn reject(command: &[u8], reply: &[u8], reason: &'static str) -> ProtocolError {
    warn!(
        command = %String::from_utf8_lossy(command),
        reply = %String::from_utf8_lossy(reply),
        "upperlink exchange rejected: {reason}"
    );
    ProtocolError::invalid_reply(reason)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

    use super::*;

    // ========================================================================
    // Command building
    // ========================================================================

    #[test]
    fn test_read_command_layout() {
        // Unit 1, DM100, two words: four-digit fields, XOR frame check.
        let command = build_command(1, "RD01000002");
        assert_eq!(command, b"@01RD0100000254*\r".to_vec());
    }

    #[test]
    fn test_frame_check_is_xor_of_preceding_bytes() {
        let command = build_command(1, "RD01000002");
        let body = &command[..command.len() - 4];
        let xor = body.iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(&command[command.len() - 4..command.len() - 2], format!("{xor:02X}").as_bytes());
    }

    // ========================================================================
    // Reply validation
    // ========================================================================

    #[test]
    fn test_word_reply_decodes_big_endian() {
        let reply = b"@01RD0001020A0B57*\r";
        assert_eq!(parse_word_reply(reply, 2).unwrap(), vec![0x0102, 0x0A0B]);
    }

    #[test]
    fn test_word_reply_zero_fills_past_answered_words() {
        let reply = b"@01RD0001020A0B57*\r";
        assert_eq!(parse_word_reply(reply, 4).unwrap(), vec![0x0102, 0x0A0B, 0, 0]);
    }

    #[test]
    fn test_word_reply_caps_at_requested_size() {
        let reply = b"@01RD0001020A0B57*\r";
        assert_eq!(parse_word_reply(reply, 1).unwrap(), vec![0x0102]);
    }

    #[test]
    fn test_invalid_command_reply_rejected() {
        assert_eq!(check_reply(b"@01IC4B*\r"), Err("command not recognized"));
    }

    #[test]
    fn test_nonzero_end_code_rejected() {
        assert_eq!(check_reply(b"@01RD1650*\r"), Err("nonzero end code"));
    }

    #[test]
    fn test_frame_check_mismatch_rejected() {
        assert_eq!(check_reply(b"@01RD00FF*\r"), Err("frame check mismatch"));
    }

    #[test]
    fn test_write_reply_accepted() {
        assert_eq!(check_reply(b"@01WD0052*\r"), Ok(()));
    }

    #[test]
    fn test_short_reply_rejected() {
        assert_eq!(check_reply(b""), Err("reply too short"));
        assert_eq!(check_reply(b"@01RD00"), Err("reply too short"));
    }
}
