//! Helpers shared by the ASCII checksum protocols

/// XOR of every byte, the block-check value both codecs use.
pub(crate) fn xor_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Append the XOR of the frame so far as two uppercase hex characters.
pub(crate) fn push_checksum(frame: &mut Vec<u8>) {
    let sum = xor_sum(frame);
    frame.extend_from_slice(format!("{sum:02X}").as_bytes());
}

pub(crate) fn checksum_matches(payload: &[u8], stated: &[u8]) -> bool {
    format!("{:02X}", xor_sum(payload)).as_bytes() == stated
}

/// Two ASCII hex characters to one byte.
pub(crate) fn hex_byte(chars: &[u8]) -> Option<u8> {
    std::str::from_utf8(chars)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
}

/// Four ASCII hex characters to one word.
pub(crate) fn hex_word(chars: &[u8]) -> Option<u16> {
    std::str::from_utf8(chars)
        .ok()
        .and_then(|s| u16::from_str_radix(s, 16).ok())
}
