//! Stream reassembly
//!
//! Turns arbitrarily chunked byte arrivals into complete frames. Three
//! framing styles cover every supported board:
//! - Delimiter-terminated (extended Arduino, `CR LF`)
//! - Fixed length bounded by start/end sentinels (Pico)
//! - Fixed length announced by a magic header (Neobot)
//!
//! Partial frames are carried over between [`FrameDecoder::push`] calls, so a
//! frame split anywhere (down to one byte per chunk) decodes exactly like a
//! frame delivered whole.

/// Upper bound on carried-over bytes before the buffer is dropped
pub const MAX_PENDING: usize = 4096;

/// A fixed-length frame recognised by its leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpec {
    /// Leading magic bytes
    pub magic: &'static [u8],
    /// Total frame length including the magic
    pub len: usize,
}

/// Framing style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingType {
    /// Frames end with a delimiter; the delimiter is stripped
    Delimited(&'static [u8]),
    /// Fixed-length frames whose first and last byte are sentinels
    Sentinel {
        /// Frame length
        len: usize,
        /// Start sentinel at offset 0
        start: u8,
        /// End sentinel at offset `len - 1`
        end: u8,
    },
    /// Fixed-length frames selected by magic header
    Headed(&'static [HeaderSpec]),
}

impl FramingType {
    /// Get name of framing type
    pub fn name(&self) -> &'static str {
        match self {
            FramingType::Delimited(_) => "Delimited",
            FramingType::Sentinel { .. } => "Sentinel",
            FramingType::Headed(_) => "Headed",
        }
    }
}

enum HeaderMatch {
    Complete(usize),
    Partial,
    None,
}

/// Streaming frame decoder that carries partial data across chunks
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    framing: FramingType,
    buffer: Vec<u8>,
    discarded: u64,
}

impl FrameDecoder {
    /// Create new decoder
    pub fn new(framing: FramingType) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            discarded: 0,
        }
    }

    /// Framing used by this decoder
    pub fn framing(&self) -> FramingType {
        self.framing
    }

    /// Add data and return every frame completed by it
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let frames = match self.framing {
            FramingType::Delimited(delimiter) => self.drain_delimited(delimiter),
            FramingType::Sentinel { len, start, end } => self.drain_sentinel(len, start, end),
            FramingType::Headed(specs) => self.drain_headed(specs),
        };

        if self.buffer.len() > MAX_PENDING {
            tracing::warn!(
                "Dropping {} buffered bytes without a frame boundary",
                self.buffer.len()
            );
            self.discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }

        frames
    }

    /// Bytes waiting for the rest of their frame
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes skipped while resynchronising
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn drain_delimited(&mut self, delimiter: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if delimiter.is_empty() {
            return frames;
        }

        let mut consumed = 0;
        while let Some(pos) = find(&self.buffer[consumed..], delimiter) {
            let frame = &self.buffer[consumed..consumed + pos];
            if !frame.is_empty() {
                frames.push(frame.to_vec());
            }
            consumed += pos + delimiter.len();
        }
        self.buffer.drain(..consumed);

        frames
    }

    fn drain_sentinel(&mut self, len: usize, start: u8, end: u8) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if len < 2 {
            return frames;
        }

        while self.buffer.len() >= len {
            if self.buffer[0] != start || self.buffer[len - 1] != end {
                self.buffer.remove(0);
                self.discarded += 1;
                continue;
            }
            frames.push(self.buffer.drain(..len).collect());
        }

        frames
    }

    fn drain_headed(&mut self, specs: &[HeaderSpec]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        while !self.buffer.is_empty() {
            match header_at_start(&self.buffer, specs) {
                HeaderMatch::Complete(len) => {
                    if self.buffer.len() < len {
                        break;
                    }
                    frames.push(self.buffer.drain(..len).collect());
                }
                HeaderMatch::Partial => break,
                HeaderMatch::None => {
                    self.buffer.remove(0);
                    self.discarded += 1;
                }
            }
        }

        frames
    }
}

fn header_at_start(buffer: &[u8], specs: &[HeaderSpec]) -> HeaderMatch {
    let mut partial = false;
    for header in specs {
        if buffer.len() >= header.magic.len() {
            if buffer.starts_with(header.magic) {
                return HeaderMatch::Complete(header.len);
            }
        } else if header.magic.starts_with(buffer) {
            partial = true;
        }
    }
    if partial {
        HeaderMatch::Partial
    } else {
        HeaderMatch::None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRLF: FramingType = FramingType::Delimited(b"\r\n");
    const SENTINEL: FramingType = FramingType::Sentinel {
        len: 6,
        start: 0xFF,
        end: 0xFE,
    };
    const HEADED: FramingType = FramingType::Headed(&[
        HeaderSpec { magic: &[0xAB, 0xCD], len: 8 },
        HeaderSpec { magic: &[0xAA, 0xAA, 0xBB], len: 6 },
    ]);

    #[test]
    fn test_delimited_split_across_chunks() {
        let mut decoder = FrameDecoder::new(CRLF);
        assert!(decoder.push(&[0xFF, 0x55, 0x03, 0x10]).is_empty());
        assert!(decoder.push(&[0x00, 0x05, 0x01, 0x0D]).is_empty());
        let frames = decoder.push(&[0x0A, 0xFF]);
        assert_eq!(frames, vec![vec![0xFF, 0x55, 0x03, 0x10, 0x00, 0x05, 0x01]]);
        assert_eq!(decoder.pending(), &[0xFF]);
    }

    #[test]
    fn test_delimited_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new(CRLF);
        let frames = decoder.push(b"ab\r\ncd\r\n\r\nef");
        assert_eq!(frames, vec![b"ab".to_vec(), b"cd".to_vec()]);
        assert_eq!(decoder.pending(), b"ef");
    }

    #[test]
    fn test_sentinel_resync_after_garbage() {
        let mut decoder = FrameDecoder::new(SENTINEL);
        let frames = decoder.push(&[0x00, 0xFF, 0x03, 0x05, 0x00, 0x01, 0xFE]);
        assert_eq!(frames, vec![vec![0xFF, 0x03, 0x05, 0x00, 0x01, 0xFE]]);
        assert_eq!(decoder.discarded(), 1);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_sentinel_one_byte_at_a_time() {
        let mut decoder = FrameDecoder::new(SENTINEL);
        let packet = [0xFF, 0x04, 0x01, 0x02, 0x00, 0xFE];
        let mut frames = Vec::new();
        for byte in packet {
            frames.extend(decoder.push(&[byte]));
        }
        assert_eq!(frames, vec![packet.to_vec()]);
    }

    #[test]
    fn test_headed_keeps_partial_magic() {
        let mut decoder = FrameDecoder::new(HEADED);
        assert!(decoder.push(&[0x11, 0xAA, 0xAA]).is_empty());
        assert_eq!(decoder.pending(), &[0xAA, 0xAA]);
        let frames = decoder.push(&[0xBB, 0x03, 0x03, 0x06]);
        assert_eq!(frames, vec![vec![0xAA, 0xAA, 0xBB, 0x03, 0x03, 0x06]]);
    }

    #[test]
    fn test_headed_selects_length_by_magic() {
        let mut decoder = FrameDecoder::new(HEADED);
        let frames = decoder.push(&[0xAB, 0xCD, 1, 2, 3, 4, 5, 15, 0xAA, 0xAA, 0xBB, 3, 1, 4]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 8);
        assert_eq!(frames[1].len(), 6);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut decoder = FrameDecoder::new(CRLF);
        decoder.push(b"partial");
        decoder.clear();
        assert!(decoder.pending().is_empty());
    }
}
