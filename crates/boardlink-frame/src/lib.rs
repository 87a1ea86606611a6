//! SLIP packet framing for serial and stream transports.
//!
//! Every message travels as `END payload END`, where occurrences of the
//! delimiter and escape bytes inside the payload are byte-stuffed:
//!
//! - `END` (0xC0) in the payload becomes `ESC ESC_END`
//! - `ESC` (0xDB) in the payload becomes `ESC ESC_ESC`
//!
//! The leading `END` flushes any line noise sitting in a desynchronised
//! receiver. Decoding is resumable: a [`FrameDecoder`] keeps its state and
//! partial output between calls, so frames may arrive split across any
//! number of underlying reads.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::SlipCodec;
pub use codec::{
    encode_chunked, encode_frame, encoded_len, wire_bytes, DecodeState, FrameConfig, FrameDecoder,
    DEFAULT_MAX_FRAME, DEFAULT_WRITE_UNIT, END, ESC, ESC_END, ESC_ESC,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
