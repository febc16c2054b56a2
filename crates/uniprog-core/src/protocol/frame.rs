//! Byte-driven frame parser and frame encoders

use embedded_io::Write;

use super::{Crc32, Flags, Header, Packet, CRC_LEN, HEADER_LEN, MAX_FRAME, MAX_PAYLOAD, SOF};
use crate::error::{Error, Result};

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseState {
    /// Discarding bytes until the sentinel
    WaitSof,
    /// Collecting the rest of the 6-byte header
    WaitHeader,
    /// Collecting the declared number of payload bytes
    WaitData,
    /// Collecting the 4 CRC bytes
    WaitCrc,
}

/// Outcome of a completed (or rejected) frame
#[derive(Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// Frame with a valid CRC
    Packet(Packet<'a>),
    /// Header declared a payload above [`MAX_PAYLOAD`]; the payload is not
    /// waited for
    PayloadTooLarge(Header),
    /// Frame completed but the CRC did not match
    CrcMismatch {
        /// Header of the rejected frame
        header: Header,
        /// CRC carried by the frame
        received: u32,
        /// CRC computed over header and payload
        computed: u32,
    },
}

/// Resynchronizing frame parser
///
/// Bytes are pushed one at a time, so the result never depends on how the
/// input stream was chunked. Any rejected frame drops the parser back to
/// [`ParseState::WaitSof`], which discards everything up to the next
/// sentinel.
pub struct FrameParser {
    state: ParseState,
    buf: [u8; HEADER_LEN + MAX_PAYLOAD],
    pos: usize,
    header: Header,
    crc: [u8; CRC_LEN],
    crc_pos: usize,
}

impl FrameParser {
    /// Create a parser waiting for a sentinel
    pub const fn new() -> Self {
        Self {
            state: ParseState::WaitSof,
            buf: [0; HEADER_LEN + MAX_PAYLOAD],
            pos: 0,
            header: Header {
                sequence: 0,
                command: 0,
                flags: Flags::empty(),
                length: 0,
            },
            crc: [0; CRC_LEN],
            crc_pos: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = ParseState::WaitSof;
        self.pos = 0;
        self.crc_pos = 0;
    }

    /// Consume one byte
    pub fn push(&mut self, byte: u8) -> Option<Event<'_>> {
        match self.state {
            ParseState::WaitSof => {
                if byte == SOF {
                    self.buf[0] = byte;
                    self.pos = 1;
                    self.state = ParseState::WaitHeader;
                }
                None
            }
            ParseState::WaitHeader => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                if self.pos < HEADER_LEN {
                    return None;
                }

                let mut raw = [0u8; HEADER_LEN];
                raw.copy_from_slice(&self.buf[..HEADER_LEN]);
                self.header = Header::from_bytes(&raw);
                self.crc_pos = 0;

                if self.header.length as usize > MAX_PAYLOAD {
                    self.reset();
                    return Some(Event::PayloadTooLarge(self.header));
                }
                self.state = if self.header.length == 0 {
                    ParseState::WaitCrc
                } else {
                    ParseState::WaitData
                };
                None
            }
            ParseState::WaitData => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                if self.pos == HEADER_LEN + self.header.length as usize {
                    self.state = ParseState::WaitCrc;
                }
                None
            }
            ParseState::WaitCrc => {
                self.crc[self.crc_pos] = byte;
                self.crc_pos += 1;
                if self.crc_pos < CRC_LEN {
                    return None;
                }

                self.state = ParseState::WaitSof;
                let end = self.pos;
                self.pos = 0;
                let received = u32::from_le_bytes(self.crc);
                let computed = Crc32::new().update(&self.buf[..end]).finish();
                if received != computed {
                    return Some(Event::CrcMismatch {
                        header: self.header,
                        received,
                        computed,
                    });
                }

                Some(Event::Packet(Packet {
                    sequence: self.header.sequence,
                    command: self.header.command,
                    flags: self.header.flags,
                    payload: &self.buf[HEADER_LEN..end],
                }))
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn header_for(sequence: u8, command: u8, flags: Flags, payload: &[u8]) -> Result<Header> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge);
    }
    Ok(Header {
        sequence,
        command,
        flags,
        length: payload.len() as u16,
    })
}

/// Encode a frame into `out`, returning the number of bytes used
pub fn encode_frame(
    sequence: u8,
    command: u8,
    flags: Flags,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize> {
    let header = header_for(sequence, command, flags, payload)?.to_bytes();
    let total = HEADER_LEN + payload.len() + CRC_LEN;
    if out.len() < total {
        return Err(Error::ResponseOverflow);
    }
    debug_assert!(total <= MAX_FRAME);

    out[..HEADER_LEN].copy_from_slice(&header);
    out[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    let crc = Crc32::new().update(&out[..HEADER_LEN + payload.len()]).finish();
    out[HEADER_LEN + payload.len()..total].copy_from_slice(&crc.to_le_bytes());
    Ok(total)
}

/// Write a frame straight to a transport without staging it
///
/// `payload` must not exceed [`MAX_PAYLOAD`]; the engine's response buffer
/// and error messages are sized so it cannot. Debug builds panic on a
/// longer payload, release builds log it and send the first
/// [`MAX_PAYLOAD`] bytes.
pub fn write_frame<W: Write>(
    writer: &mut W,
    sequence: u8,
    command: u8,
    flags: Flags,
    payload: &[u8],
) -> core::result::Result<(), W::Error> {
    debug_assert!(
        payload.len() <= MAX_PAYLOAD,
        "frame payload of {} bytes exceeds MAX_PAYLOAD",
        payload.len()
    );
    let payload = if payload.len() > MAX_PAYLOAD {
        log::error!(
            "Truncating cmd 0x{:02X} payload from {} to {} bytes",
            command,
            payload.len(),
            MAX_PAYLOAD
        );
        &payload[..MAX_PAYLOAD]
    } else {
        payload
    };
    let header = Header {
        sequence,
        command,
        flags,
        length: payload.len() as u16,
    }
    .to_bytes();
    let crc = Crc32::new().update(&header).update(payload).finish();
    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.write_all(&crc.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use std::{vec, vec::Vec};

    use super::*;
    use crate::protocol::crc32;

    fn frame(sequence: u8, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = [0u8; MAX_FRAME];
        let len = encode_frame(sequence, command, Flags::empty(), payload, &mut out).unwrap();
        out[..len].to_vec()
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Packet(u8, u8, Vec<u8>),
        TooLarge(u16),
        Crc,
    }

    fn parse_chunked(data: &[u8], chunk: usize) -> Vec<Seen> {
        let mut parser = FrameParser::new();
        let mut seen = Vec::new();
        for piece in data.chunks(chunk) {
            for &byte in piece {
                match parser.push(byte) {
                    Some(Event::Packet(p)) => {
                        seen.push(Seen::Packet(p.sequence, p.command, p.payload.to_vec()))
                    }
                    Some(Event::PayloadTooLarge(h)) => seen.push(Seen::TooLarge(h.length)),
                    Some(Event::CrcMismatch { .. }) => seen.push(Seen::Crc),
                    None => {}
                }
            }
        }
        seen
    }

    #[test]
    fn test_encode_layout() {
        let bytes = frame(7, 0x01, &[]);
        assert_eq!(&bytes[..6], &[0xA5, 7, 0x01, 0x00, 0x00, 0x00]);
        let crc = crc32(&bytes[..6]);
        assert_eq!(&bytes[6..], &crc.to_le_bytes());
    }

    #[test]
    fn test_crc_matches_independent_implementation() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let bytes = frame(0x42, 0x26, &payload);
        let body = &bytes[..bytes.len() - 4];
        let tail = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(tail, crc32fast::hash(body));
    }

    #[test]
    fn test_single_byte_corruption_is_detected() {
        let bytes = frame(3, 0x22, &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Skip the sentinel and the length bytes, which change framing
        // rather than content
        for index in [1, 2, 3, 6, 9, 13, 14, 17] {
            let mut corrupted = bytes.clone();
            corrupted[index] ^= 0x10;
            let seen = parse_chunked(&corrupted, 1);
            assert_eq!(seen, [Seen::Crc], "byte {}", index);
        }
    }

    #[test]
    fn test_resync_after_garbage_is_chunk_independent() {
        let mut stream = vec![0x00, 0x13, 0xFF, 0x5A, 0x01, 0x02, 0x03];
        stream.extend(frame(9, 0x11, b"hello"));

        for chunk in [1, 2, 3, 5, 7, stream.len()] {
            let seen = parse_chunked(&stream, chunk);
            assert_eq!(seen, [Seen::Packet(9, 0x11, b"hello".to_vec())], "chunk {}", chunk);
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = frame(1, 0x01, &[]);
        stream.extend(frame(2, 0x12, &[0x50, 0xAA]));
        stream.extend(frame(3, 0x03, &[]));
        let seen = parse_chunked(&stream, 4);
        assert_eq!(
            seen,
            [
                Seen::Packet(1, 0x01, vec![]),
                Seen::Packet(2, 0x12, vec![0x50, 0xAA]),
                Seen::Packet(3, 0x03, vec![]),
            ]
        );
    }

    #[test]
    fn test_oversized_length_rejected_at_header() {
        let mut parser = FrameParser::new();
        let len = 5000u16.to_le_bytes();
        let header = [0xA5, 1, 0x26, 0, len[0], len[1]];
        for &byte in &header[..5] {
            assert!(parser.push(byte).is_none());
        }
        match parser.push(header[5]) {
            Some(Event::PayloadTooLarge(h)) => assert_eq!(h.length, 5000),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parser.state(), ParseState::WaitSof);
    }

    #[test]
    fn test_max_payload_accepted() {
        let payload = vec![0x5A; MAX_PAYLOAD];
        let seen = parse_chunked(&frame(0, 0x27, &payload), 512);
        assert_eq!(seen, [Seen::Packet(0, 0x27, payload)]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut out = vec![0u8; MAX_FRAME + 16];
        assert_eq!(
            encode_frame(0, 0, Flags::empty(), &payload, &mut out),
            Err(Error::PayloadTooLarge)
        );
        let mut small = [0u8; 8];
        assert_eq!(
            encode_frame(0, 0, Flags::empty(), &[1, 2], &mut small),
            Err(Error::ResponseOverflow)
        );
    }

    #[test]
    fn test_write_frame_matches_encode() {
        let mut written = [0u8; 32];
        let mut cursor: &mut [u8] = &mut written;
        write_frame(&mut cursor, 5, 0x41, Flags::RESPONSE, &[1, 2, 3]).unwrap();
        let used = 32 - cursor.len();

        let mut out = [0u8; 32];
        let len = encode_frame(5, 0x41, Flags::RESPONSE, &[1, 2, 3], &mut out).unwrap();
        assert_eq!(used, len);
        assert_eq!(&written[..used], &out[..len]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exceeds MAX_PAYLOAD")]
    fn test_write_frame_refuses_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut written = vec![0u8; MAX_FRAME + 16];
        let mut cursor: &mut [u8] = &mut written;
        let _ = write_frame(&mut cursor, 0, 0x13, Flags::RESPONSE, &payload);
    }
}
