use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME};
use crate::error::FrameError;

/// SLIP framing for `tokio_util::codec::{FramedRead, FramedWrite}`.
#[derive(Debug)]
pub struct SlipCodec {
    decoder: FrameDecoder,
}

impl SlipCodec {
    /// Create a codec that rejects frames longer than `max_frame` bytes.
    pub fn new(max_frame: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_frame),
        }
    }
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for SlipCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src).inspect_err(|err| {
            warn!(%err, "dropping oversized frame");
            self.decoder.resync();
        })
    }
}

impl Encoder<Bytes> for SlipCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst);
        Ok(())
    }
}

impl Encoder<&[u8]> for SlipCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(item, dst);
        Ok(())
    }
}
