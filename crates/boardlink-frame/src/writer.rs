use std::io::{ErrorKind, Write};

use crate::codec::{encode_chunked, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes SLIP frames to any `Write` stream.
///
/// Wire bytes are handed to the stream in chunks of at most
/// [`FrameConfig::write_unit`] bytes.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send one payload as a frame (blocking).
    ///
    /// Returns the number of wire bytes written.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.len() > self.config.max_frame_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_frame_size,
            });
        }

        let inner = &mut self.inner;
        let written = encode_chunked(payload, self.config.write_unit, |chunk| {
            write_chunk(inner, chunk)
        })?;

        self.flush()?;
        Ok(written)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn write_chunk<T: Write>(inner: &mut T, chunk: &[u8]) -> Result<usize> {
    let mut offset = 0usize;
    while offset < chunk.len() {
        match inner.write(&chunk[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encoded_len, FrameDecoder, END, ESC};

    fn decode_all(wire: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = BytesMut::from(wire);
        let mut decoder = FrameDecoder::new(usize::MAX);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf).unwrap() {
            frames.push(frame.to_vec());
        }
        frames
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let written = writer.send(b"hello").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(written, wire.len());
        assert_eq!(decode_all(&wire), vec![b"hello".to_vec()]);
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"one").unwrap();
        writer.send(&[END, ESC]).unwrap();
        writer.send(b"three").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(
            decode_all(&wire),
            vec![b"one".to_vec(), vec![END, ESC], b"three".to_vec()]
        );
    }

    #[test]
    fn writes_are_bounded_by_unit() {
        let cfg = FrameConfig {
            write_unit: 8,
            ..FrameConfig::default()
        };
        let sink = RecordingWriter::default();
        let mut writer = FrameWriter::with_config(sink, cfg);

        let payload = [END; 20];
        let written = writer.send(&payload).unwrap();

        let sink = writer.into_inner();
        assert_eq!(written, encoded_len(&payload));
        assert!(sink.writes.iter().all(|w| *w <= 8));
        assert_eq!(decode_all(&sink.data), vec![payload.to_vec()]);
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_frame_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send(b"retry").unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_all(&inner.data), vec![b"retry".to_vec()]);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn written_bytes_decode_with_reader() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"z").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire));
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"z");
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<usize>,
        data: Vec<u8>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.push(buf.len());
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
