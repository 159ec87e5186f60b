//! Delimiter-based frame extraction
//!
//! Recovers message boundaries from a raw byte stream: bytes accumulate in a
//! reassembly buffer and every `(start marker, end marker)` pair found yields
//! one frame. The splitter is owned by the channel's buffer worker; it is
//! pure state + scanning and safe to drive from any chunking of the stream.

/// Reassembly buffer plus the framing convention of one channel.
///
/// Frame extraction rule: the frame starts at the earliest start-marker
/// occurrence (position 0 when the marker is unset or absent) and ends at the
/// first end-marker occurrence at or after that point, inclusive of the end
/// marker itself. When no end marker is configured the whole buffered content
/// is emitted as one frame per pushed chunk.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    buffer: Vec<u8>,
}

impl FrameSplitter {
    pub fn new(start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            buffer: Vec::new(),
        }
    }

    /// Bytes currently held waiting for a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append one raw chunk and extract every complete frame it unlocks,
    /// in stream order. Consumed bytes (frames and any garbage preceding
    /// them) are dropped from the buffer.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let start = self
                .start
                .as_deref()
                .and_then(|m| find_subsequence(&self.buffer, m))
                .unwrap_or(0);

            match self.end.as_deref() {
                Some(end_marker) => {
                    let Some(rel) = find_subsequence(&self.buffer[start..], end_marker) else {
                        break;
                    };
                    let end = start + rel + end_marker.len();
                    frames.push(self.buffer[start..end].to_vec());
                    self.buffer.drain(..end);
                }
                None => {
                    // Framing by start marker + length: emit everything buffered.
                    if !self.buffer.is_empty() {
                        frames.push(self.buffer[start..].to_vec());
                        self.buffer.clear();
                    }
                    break;
                }
            }
        }
        frames
    }
}

/// First occurrence of `needle` in `haystack`, or None. An empty needle
/// never matches.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

    use super::*;

    fn ascii_splitter() -> FrameSplitter {
        FrameSplitter::new(Some(b"<".to_vec()), Some(b"\r".to_vec()))
    }

    // ========================================================================
    // Basic extraction
    // ========================================================================

    #[test]
    fn test_single_complete_frame() {
        let mut splitter = ascii_splitter();
        let frames = splitter.push_chunk(b"<01$RD1234AB\r");
        assert_eq!(frames, vec![b"<01$RD1234AB\r".to_vec()]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut splitter = ascii_splitter();
        let frames = splitter.push_chunk(b"<AA\r<BB\r<CC\r");
        assert_eq!(
            frames,
            vec![b"<AA\r".to_vec(), b"<BB\r".to_vec(), b"<CC\r".to_vec()]
        );
    }

    #[test]
    fn test_incomplete_frame_is_held_back() {
        let mut splitter = ascii_splitter();
        assert!(splitter.push_chunk(b"<01$RD12").is_empty());
        assert_eq!(splitter.pending(), 8);

        let frames = splitter.push_chunk(b"34AB\r");
        assert_eq!(frames, vec![b"<01$RD1234AB\r".to_vec()]);
    }

    #[test]
    fn test_frame_split_byte_by_byte() {
        let mut splitter = ascii_splitter();
        let mut frames = Vec::new();
        for b in b"<HELLO\r" {
            frames.extend(splitter.push_chunk(&[*b]));
        }
        assert_eq!(frames, vec![b"<HELLO\r".to_vec()]);
    }

    #[test]
    fn test_garbage_between_frames_is_dropped() {
        let mut splitter = ascii_splitter();
        // Noise after a frame's end marker but before the next start marker
        // is consumed with the following frame's scan.
        let frames = splitter.push_chunk(b"<AA\rnoise<BB\r");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"<AA\r".to_vec());
        assert_eq!(frames[1], b"<BB\r".to_vec());
    }

    #[test]
    fn test_data_before_first_start_marker_is_attributed_to_zero() {
        let mut splitter = ascii_splitter();
        // No start marker present yet: the frame begins at position 0.
        let frames = splitter.push_chunk(b"junk\r");
        assert_eq!(frames, vec![b"junk\r".to_vec()]);
    }

    // ========================================================================
    // Marker configuration variants
    // ========================================================================

    #[test]
    fn test_no_start_marker_scans_from_zero() {
        let mut splitter = FrameSplitter::new(None, Some(b"\r".to_vec()));
        let frames = splitter.push_chunk(b"AAA\rBBB\r");
        assert_eq!(frames, vec![b"AAA\r".to_vec(), b"BBB\r".to_vec()]);
    }

    #[test]
    fn test_no_end_marker_emits_whole_buffer_per_chunk() {
        let mut splitter = FrameSplitter::new(Some(b"<".to_vec()), None);
        let frames = splitter.push_chunk(b"<AAAA");
        assert_eq!(frames, vec![b"<AAAA".to_vec()]);
        assert_eq!(splitter.pending(), 0);

        // Next chunk has no start marker at all: emitted from position 0.
        let frames = splitter.push_chunk(b"BB");
        assert_eq!(frames, vec![b"BB".to_vec()]);
    }

    #[test]
    fn test_two_byte_end_marker() {
        let mut splitter = FrameSplitter::new(Some(b"@".to_vec()), Some(b"*\r".to_vec()));
        let frames = splitter.push_chunk(b"@01RD000100012A*\r");
        assert_eq!(frames, vec![b"@01RD000100012A*\r".to_vec()]);
    }

    #[test]
    fn test_partial_end_marker_never_triggers_emission() {
        let mut splitter = FrameSplitter::new(Some(b"@".to_vec()), Some(b"*\r".to_vec()));
        // `*` alone is only half the end marker.
        assert!(splitter.push_chunk(b"@01AB52*").is_empty());
        let frames = splitter.push_chunk(b"\r");
        assert_eq!(frames, vec![b"@01AB52*\r".to_vec()]);
    }

    #[test]
    fn test_end_marker_is_searched_at_or_after_start() {
        // End-marker bytes that precede the start marker must not terminate
        // the frame early.
        let mut splitter = ascii_splitter();
        let frames = splitter.push_chunk(b"<AA\r");
        assert_eq!(frames, vec![b"<AA\r".to_vec()]);

        let mut splitter = FrameSplitter::new(Some(b"<".to_vec()), Some(b"\r".to_vec()));
        assert!(splitter.push_chunk(b"<incomplete").is_empty());
        let frames = splitter.push_chunk(b"\r");
        assert_eq!(frames, vec![b"<incomplete\r".to_vec()]);
    }

    // ========================================================================
    // Chunk-boundary independence
    // ========================================================================

    #[test]
    fn test_framing_is_chunk_boundary_independent() {
        let stream = b"<01$RD0102AB\rxx<02$RD0304CD\r<03!\r@garbage<04$\r";

        let mut reference = ascii_splitter();
        let expected = reference.push_chunk(stream);
        assert_eq!(expected.len(), 4);

        for split in 1..stream.len() {
            let mut splitter = ascii_splitter();
            let mut frames = splitter.push_chunk(&stream[..split]);
            frames.extend(splitter.push_chunk(&stream[split..]));
            assert_eq!(frames, expected, "diverged at split {split}");
        }

        // Extreme case: one byte per chunk.
        let mut splitter = ascii_splitter();
        let mut frames = Vec::new();
        for b in stream {
            frames.extend(splitter.push_chunk(&[*b]));
        }
        assert_eq!(frames, expected);
    }
}
