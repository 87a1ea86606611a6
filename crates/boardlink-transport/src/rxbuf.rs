use bytes::{Buf, Bytes, BytesMut};
use boardlink_frame::{FrameDecoder, FrameError};
use tracing::warn;

/// Receive-side carry-over shared by the serial and stream channels.
///
/// Holds bytes received but not yet handed to the caller, plus the SLIP
/// decoder state for message reads, so a unit that was only partly
/// consumed is served before the transport is asked for more.
#[derive(Debug)]
pub(crate) struct RxBuffer {
    pending: BytesMut,
    decoder: FrameDecoder,
}

impl RxBuffer {
    pub(crate) fn new(max_frame: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            decoder: FrameDecoder::new(max_frame),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Copy retained bytes into `buf`, returning how many were served.
    pub(crate) fn serve(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }

    /// Serve from a freshly received unit and retain whatever does not fit.
    pub(crate) fn serve_unit(&mut self, unit: &[u8], buf: &mut [u8]) -> usize {
        let n = buf.len().min(unit.len());
        buf[..n].copy_from_slice(&unit[..n]);
        self.pending.extend_from_slice(&unit[n..]);
        n
    }

    pub(crate) fn extend(&mut self, unit: &[u8]) {
        self.pending.extend_from_slice(unit);
    }

    /// Next complete frame from the retained bytes, if one is there.
    ///
    /// After an oversized frame the decoder is resynchronised before the
    /// error is returned, so the following frame decodes normally.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        self.decoder.decode(&mut self.pending).inspect_err(|err| {
            warn!(%err, "dropping oversized frame");
            self.decoder.resync();
        })
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_frame::END;

    #[test]
    fn serve_unit_retains_tail() {
        let mut rx = RxBuffer::new(64);
        let unit: Vec<u8> = (0..10).collect();
        let mut buf = [0u8; 4];

        assert_eq!(rx.serve_unit(&unit, &mut buf), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(rx.len(), 6);

        assert_eq!(rx.serve(&mut buf), 4);
        assert_eq!(buf, [4, 5, 6, 7]);
        assert_eq!(rx.serve(&mut buf), 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert!(rx.is_empty());
    }

    #[test]
    fn frames_span_extends() {
        let mut rx = RxBuffer::new(64);
        rx.extend(&[END, b'a']);
        assert!(rx.next_frame().unwrap().is_none());
        rx.extend(&[b'b', END, END, b'c']);
        assert_eq!(rx.next_frame().unwrap().unwrap().as_ref(), b"ab");
        assert!(rx.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_resyncs() {
        let mut rx = RxBuffer::new(2);
        rx.extend(&[END, 1, 2, 3, 4, END, 9, END]);
        assert!(matches!(
            rx.next_frame(),
            Err(FrameError::FrameTooLong { max: 2 })
        ));
        assert_eq!(rx.next_frame().unwrap().unwrap().as_ref(), &[9]);
    }

    #[test]
    fn clear_drops_partial_frame() {
        let mut rx = RxBuffer::new(64);
        rx.extend(&[END, b'x']);
        assert!(rx.next_frame().unwrap().is_none());
        rx.clear();
        rx.extend(&[b'y', END]);
        assert_eq!(rx.next_frame().unwrap().unwrap().as_ref(), b"y");
    }
}
