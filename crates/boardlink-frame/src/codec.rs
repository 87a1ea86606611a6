use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{FrameError, Result};

/// Frame delimiter.
pub const END: u8 = 0xC0;

/// Escape marker; the next byte says which special byte was stuffed.
pub const ESC: u8 = 0xDB;

/// `ESC ESC_END` decodes to a literal `END`.
pub const ESC_END: u8 = 0xDC;

/// `ESC ESC_ESC` decodes to a literal `ESC`.
pub const ESC_ESC: u8 = 0xDD;

/// Default maximum decoded frame size: 1 KiB.
pub const DEFAULT_MAX_FRAME: usize = 1024;

/// Default flush unit for chunked encoding (one full-speed USB packet).
pub const DEFAULT_WRITE_UNIT: usize = 64;

/// Configuration for SLIP readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum decoded payload size in bytes. Default: 1 KiB.
    pub max_frame_size: usize,
    /// Wire bytes buffered before an intermediate write. Default: 64.
    pub write_unit: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            write_unit: DEFAULT_WRITE_UNIT,
        }
    }
}

/// Wire bytes for one frame: leading `END`, stuffed payload, trailing `END`.
pub fn wire_bytes(payload: &[u8]) -> impl Iterator<Item = u8> + '_ {
    std::iter::once(END)
        .chain(payload.iter().flat_map(|&byte| escape(byte)))
        .chain(std::iter::once(END))
}

fn escape(byte: u8) -> impl Iterator<Item = u8> {
    let (pair, len) = match byte {
        END => ([ESC, ESC_END], 2),
        ESC => ([ESC, ESC_ESC], 2),
        other => ([other, 0], 1),
    };
    pair.into_iter().take(len)
}

/// Number of wire bytes [`encode_frame`] produces for `payload`.
pub fn encoded_len(payload: &[u8]) -> usize {
    let stuffed = payload
        .iter()
        .filter(|&&byte| byte == END || byte == ESC)
        .count();
    payload.len() + stuffed + 2
}

/// Encode a payload into one SLIP frame.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────────────────────────┬──────┐
/// │ END  │ payload, END/ESC byte-stuffed │ END  │
/// │ 0xC0 │                              │ 0xC0 │
/// └──────┴──────────────────────────────┴──────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(payload));
    dst.extend(wire_bytes(payload));
}

/// Encode a payload, handing the wire bytes to `flush` in chunks of at most
/// `unit` bytes.
///
/// `flush` is called each time `unit` bytes are buffered and once more for
/// the tail, so a transport with a fixed maximum write size never sees a
/// larger buffer. Returns the sum of the counts reported by `flush`.
pub fn encode_chunked<F, E>(payload: &[u8], unit: usize, mut flush: F) -> std::result::Result<usize, E>
where
    F: FnMut(&[u8]) -> std::result::Result<usize, E>,
{
    let unit = unit.max(1);
    let mut chunk = BytesMut::with_capacity(unit);
    let mut flushed = 0usize;

    for byte in wire_bytes(payload) {
        chunk.put_u8(byte);
        if chunk.len() >= unit {
            flushed += flush(&chunk)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        flushed += flush(&chunk)?;
    }

    Ok(flushed)
}

/// Position of the decoder inside an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Normal,
    Escaped,
}

/// Resumable SLIP decoder.
///
/// The decoder owns the partially decoded frame and its escape state, so
/// bytes can be fed one read at a time and a frame may straddle any number
/// of reads.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    frame: BytesMut,
    max_frame: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    /// Create a decoder that rejects frames longer than `max_frame` bytes.
    pub fn new(max_frame: usize) -> Self {
        Self {
            state: DecodeState::Normal,
            frame: BytesMut::with_capacity(max_frame.min(DEFAULT_MAX_FRAME)),
            max_frame,
            discarding: false,
        }
    }

    /// Current escape state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Bytes of the frame decoded so far.
    pub fn pending(&self) -> usize {
        self.frame.len()
    }

    /// Whether the decoder is dropping bytes until the next delimiter.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Maximum decoded frame size.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Feed one wire byte.
    ///
    /// Returns `Ok(Some(frame))` when `byte` completes a non-empty frame and
    /// `Ok(None)` when more bytes are needed. Back-to-back delimiters are not
    /// frames and are skipped.
    pub fn push(&mut self, byte: u8) -> Result<Option<Bytes>> {
        if self.discarding {
            if byte == END {
                debug!("decoder resynchronised on delimiter");
                self.discarding = false;
            }
            return Ok(None);
        }

        match (self.state, byte) {
            (state, END) => {
                if state == DecodeState::Escaped {
                    trace!("escape byte dropped before delimiter");
                }
                self.state = DecodeState::Normal;
                if self.frame.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.frame.split().freeze()))
            }
            (DecodeState::Normal, ESC) => {
                self.state = DecodeState::Escaped;
                Ok(None)
            }
            (DecodeState::Normal, other) => self.append(other),
            (DecodeState::Escaped, ESC_END) => self.append(END),
            (DecodeState::Escaped, ESC_ESC) => self.append(ESC),
            (DecodeState::Escaped, other) => {
                // RFC 1055: keep the byte that followed a bad escape.
                trace!(byte = other, "malformed escape kept verbatim");
                self.append(other)
            }
        }
    }

    fn append(&mut self, byte: u8) -> Result<Option<Bytes>> {
        self.state = DecodeState::Normal;
        if self.frame.len() >= self.max_frame {
            return Err(FrameError::FrameTooLong {
                max: self.max_frame,
            });
        }
        self.frame.put_u8(byte);
        Ok(None)
    }

    /// Decode from the front of `src`, consuming bytes as they are used.
    ///
    /// Stops right after the first completed frame, leaving any following
    /// bytes in `src` for the next call. Returns `Ok(None)` once `src` is
    /// drained without completing a frame; the partial frame is kept.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let mut consumed = 0usize;
        let result = loop {
            let Some(&byte) = src.get(consumed) else {
                break Ok(None);
            };
            consumed += 1;
            match self.push(byte) {
                Ok(None) => continue,
                other => break other,
            }
        };
        src.advance(consumed);
        result
    }

    /// Drop the partial frame and skip input up to the next delimiter.
    ///
    /// Call after [`FrameError::FrameTooLong`] so the tail of the oversized
    /// frame is not mistaken for the start of the next one.
    pub fn resync(&mut self) {
        self.frame.clear();
        self.state = DecodeState::Normal;
        self.discarding = true;
    }

    /// Return to the initial state, dropping any partial frame.
    pub fn reset(&mut self) {
        self.frame.clear();
        self.state = DecodeState::Normal;
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &[u8]) -> BytesMut {
        let mut wire = BytesMut::new();
        encode_frame(payload, &mut wire);
        wire
    }

    #[test]
    fn test_encode_plain_payload() {
        let wire = encode(b"hello");
        assert_eq!(wire.as_ref(), &[END, b'h', b'e', b'l', b'l', b'o', END]);
        assert_eq!(encoded_len(b"hello"), wire.len());
    }

    #[test]
    fn test_encode_stuffs_special_bytes() {
        let wire = encode(&[0x01, END, ESC, 0x02]);
        assert_eq!(
            wire.as_ref(),
            &[END, 0x01, ESC, ESC_END, ESC, ESC_ESC, 0x02, END]
        );
        assert_eq!(encoded_len(&[0x01, END, ESC, 0x02]), wire.len());
    }

    #[test]
    fn test_roundtrip_with_special_bytes() {
        let payload: Vec<u8> = (0u8..=255).chain([END, ESC, END, END, ESC]).collect();
        let mut wire = encode(&payload);

        let mut decoder = FrameDecoder::new(4096);
        let frame = decoder.decode(&mut wire).unwrap().unwrap();

        assert_eq!(frame.as_ref(), payload.as_slice());
        assert!(wire.is_empty());
    }

    #[test]
    fn test_decode_incomplete_keeps_state() {
        let mut decoder = FrameDecoder::default();
        let mut first = BytesMut::from(&[END, b'a', ESC][..]);
        assert!(decoder.decode(&mut first).unwrap().is_none());
        assert!(first.is_empty());
        assert_eq!(decoder.state(), DecodeState::Escaped);
        assert_eq!(decoder.pending(), 1);

        let mut second = BytesMut::from(&[ESC_END, b'b', END][..]);
        let frame = decoder.decode(&mut second).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[b'a', END, b'b']);
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let mut decoder = FrameDecoder::default();
        let mut wire = BytesMut::from(&[END, END, END, b'x', END][..]);
        let frame = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"x");
    }

    #[test]
    fn test_bad_escape_is_kept_verbatim() {
        let mut decoder = FrameDecoder::default();
        let mut wire = BytesMut::from(&[END, b'a', ESC, b'q', b'b', END][..]);
        let frame = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"aqb");
        assert_eq!(decoder.state(), DecodeState::Normal);
    }

    #[test]
    fn test_escape_before_delimiter_ends_frame() {
        let mut decoder = FrameDecoder::default();
        let mut wire = BytesMut::from(&[b'a', ESC, END][..]);
        let frame = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"a");
        assert!(!frame.contains(&END));
    }

    #[test]
    fn test_multiple_frames_leave_remainder() {
        let mut wire = encode(b"first");
        wire.extend_from_slice(&encode(b"second"));

        let mut decoder = FrameDecoder::default();
        let f1 = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(f1.as_ref(), b"first");
        assert!(!wire.is_empty());

        let f2 = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(f2.as_ref(), b"second");
        assert!(decoder.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_long_then_resync() {
        let mut decoder = FrameDecoder::new(4);
        let mut wire = BytesMut::from(&[END, 1, 2, 3, 4, 5, 6, END][..]);
        wire.extend_from_slice(&encode(b"ok"));

        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLong { max: 4 }));

        decoder.resync();
        assert!(decoder.is_discarding());
        let frame = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"ok");
        assert!(!decoder.is_discarding());
    }

    #[test]
    fn test_frame_at_exact_limit_is_accepted() {
        let mut decoder = FrameDecoder::new(3);
        let mut wire = encode(&[ESC, END, 7]);
        let frame = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[ESC, END, 7]);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut decoder = FrameDecoder::default();
        let mut wire = BytesMut::from(&[END, b'z', ESC][..]);
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        decoder.reset();
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.state(), DecodeState::Normal);
    }

    #[test]
    fn test_encode_chunked_respects_unit() {
        let payload = vec![END; 40];
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let flushed = encode_chunked::<_, ()>(&payload, 16, |chunk| {
            chunks.push(chunk.to_vec());
            Ok(chunk.len())
        })
        .unwrap();

        assert_eq!(flushed, encoded_len(&payload));
        assert!(chunks.iter().all(|c| c.len() <= 16));
        assert_eq!(chunks.concat(), encode(&payload).to_vec());
    }

    #[test]
    fn test_encode_chunked_stops_on_flush_error() {
        let mut calls = 0;
        let result = encode_chunked(&[0u8; 100], 8, |_chunk| {
            calls += 1;
            if calls == 2 {
                Err("link down")
            } else {
                Ok(8)
            }
        });
        assert_eq!(result, Err("link down"));
        assert_eq!(calls, 2);
    }
}
