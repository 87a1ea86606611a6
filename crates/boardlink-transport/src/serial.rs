//! Framed serial channel over a completion-driven link driver.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use boardlink_frame::{encode_chunked, FrameConfig, FrameError};
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelKind, Deadline, MessageChannel};
use crate::completion::{Completer, CompletionSlot, WaitResult};
use crate::error::{Result, TransportError};
use crate::rxbuf::RxBuffer;

/// Read and write unit of a full-speed USB bulk endpoint.
pub const DEFAULT_UNIT: usize = 64;

pub type ReadCompletion = Completer<io::Result<Bytes>>;
pub type WriteCompletion = Completer<io::Result<usize>>;

/// Driver surface of a serial link.
///
/// `start_*` only queue the operation. The driver later calls
/// [`Completer::complete`] from its own context; an empty read result means
/// the link reached end of stream.
pub trait SerialLink: Send {
    /// Whether the link is up and accepting operations.
    fn is_configured(&self) -> bool;

    fn max_read_unit(&self) -> usize {
        DEFAULT_UNIT
    }

    fn max_write_unit(&self) -> usize {
        DEFAULT_UNIT
    }

    fn start_read(&mut self, max: usize, done: ReadCompletion) -> io::Result<()>;

    fn start_write(&mut self, data: Bytes, done: WriteCompletion) -> io::Result<()>;

    /// Stop accepting operations. Completions still outstanding may arrive
    /// later and are dropped by the closed slots.
    fn shutdown(&mut self) {}
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    fn max_read_unit(&self) -> usize {
        (**self).max_read_unit()
    }

    fn max_write_unit(&self) -> usize {
        (**self).max_write_unit()
    }

    fn start_read(&mut self, max: usize, done: ReadCompletion) -> io::Result<()> {
        (**self).start_read(max, done)
    }

    fn start_write(&mut self, data: Bytes, done: WriteCompletion) -> io::Result<()> {
        (**self).start_write(data, done)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

struct ReadRequest {
    max: usize,
    done: ReadCompletion,
}

struct WriteRequest {
    data: Bytes,
    done: WriteCompletion,
}

/// Slice of a polled read between checks of the shutdown flag.
#[cfg(unix)]
const POLL_SLICE_MS: libc::c_int = 50;

/// Reader over a device file that gives up once the link shuts down.
#[cfg(unix)]
struct PolledReader {
    file: File,
    stop: Arc<AtomicBool>,
}

#[cfg(unix)]
impl Read for PolledReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::fd::AsRawFd;

        loop {
            if self.stop.load(Ordering::Acquire) {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, "serial link shut down"));
            }
            let mut fds = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `fds` is one valid pollfd for the duration of the call and
            // the descriptor is owned by `self.file`.
            let rc = unsafe { libc::poll(&mut fds, 1, POLL_SLICE_MS) };
            match rc {
                0 => continue,
                n if n > 0 => return self.file.read(buf),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// [`SerialLink`] over a blocking `Read`/`Write` pair, such as a tty device
/// file. One worker thread per direction performs the I/O and delivers the
/// completion.
///
/// Links built with [`StreamLink::open`] or [`StreamLink::from_file`] (on
/// unix) stop their reader on shutdown and release the device. A reader
/// passed to [`StreamLink::new`] is released once its pending read returns.
pub struct StreamLink {
    reads: Option<Sender<ReadRequest>>,
    writes: Option<Sender<WriteRequest>>,
    read_unit: usize,
    write_unit: usize,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    stoppable: bool,
}

impl StreamLink {
    /// Drive `reader` and `writer` with the default 64-byte units.
    pub fn new<R, W>(reader: R, writer: W) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::with_units(reader, writer, DEFAULT_UNIT, DEFAULT_UNIT)
    }

    pub fn with_units<R, W>(
        reader: R,
        writer: W,
        read_unit: usize,
        write_unit: usize,
    ) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::spawn(reader, writer, read_unit, write_unit, Arc::new(AtomicBool::new(false)), false)
    }

    /// Drive a device file whose reader stops on shutdown.
    #[cfg(unix)]
    pub fn from_file(file: File) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let reader = PolledReader {
            file: file.try_clone()?,
            stop: Arc::clone(&stop),
        };
        Self::spawn(reader, file, DEFAULT_UNIT, DEFAULT_UNIT, stop, true)
    }

    fn spawn<R, W>(
        mut reader: R,
        mut writer: W,
        read_unit: usize,
        write_unit: usize,
        stop: Arc<AtomicBool>,
        stoppable: bool,
    ) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (read_tx, read_rx) = mpsc::channel::<ReadRequest>();
        let reader_thread = thread::Builder::new()
            .name("boardlink-serial-rx".into())
            .spawn(move || {
                for request in read_rx {
                    let mut buf = vec![0u8; request.max];
                    let result = loop {
                        match reader.read(&mut buf) {
                            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                            other => break other,
                        }
                    };
                    let result = result.map(|n| {
                        buf.truncate(n);
                        Bytes::from(buf)
                    });
                    request.done.complete(result);
                }
                trace!("serial reader stopped");
            })?;

        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>();
        thread::Builder::new()
            .name("boardlink-serial-tx".into())
            .spawn(move || {
                for request in write_rx {
                    let result = writer
                        .write_all(&request.data)
                        .and_then(|()| writer.flush())
                        .map(|()| request.data.len());
                    request.done.complete(result);
                }
                trace!("serial writer stopped");
            })?;

        Ok(Self {
            reads: Some(read_tx),
            writes: Some(write_tx),
            read_unit: read_unit.max(1),
            write_unit: write_unit.max(1),
            stop,
            reader: Some(reader_thread),
            stoppable,
        })
    }

    /// Open a serial device node for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(?path, "opened serial device");
        Self::from_device(file)
    }

    #[cfg(unix)]
    fn from_device(file: File) -> io::Result<Self> {
        Self::from_file(file)
    }

    #[cfg(not(unix))]
    fn from_device(file: File) -> io::Result<Self> {
        let reader = file.try_clone()?;
        Self::new(reader, file)
    }

    /// Whether the reader worker has exited and dropped its end of the link.
    pub fn reader_stopped(&self) -> bool {
        self.reader.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

fn link_down() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "serial link is down")
}

impl SerialLink for StreamLink {
    fn is_configured(&self) -> bool {
        self.reads.is_some() && self.writes.is_some()
    }

    fn max_read_unit(&self) -> usize {
        self.read_unit
    }

    fn max_write_unit(&self) -> usize {
        self.write_unit
    }

    fn start_read(&mut self, max: usize, done: ReadCompletion) -> io::Result<()> {
        let reads = self.reads.as_ref().ok_or_else(link_down)?;
        reads
            .send(ReadRequest { max, done })
            .map_err(|_| link_down())
    }

    fn start_write(&mut self, data: Bytes, done: WriteCompletion) -> io::Result<()> {
        let writes = self.writes.as_ref().ok_or_else(link_down)?;
        writes
            .send(WriteRequest { data, done })
            .map_err(|_| link_down())
    }

    fn shutdown(&mut self) {
        self.reads = None;
        self.writes = None;
        self.stop.store(true, Ordering::Release);
        if !self.stoppable {
            return;
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("serial reader panicked");
            }
        }
    }
}

impl Drop for StreamLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Releases waiters of a [`SerialChannel`] from another thread.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    rx: CompletionSlot<io::Result<Bytes>>,
    tx: CompletionSlot<io::Result<usize>>,
}

impl CloseHandle {
    /// Cancel both directions. The channel reports itself closed afterwards
    /// and its owner should still call [`Channel::close`].
    pub fn close(&self) {
        self.rx.close();
        self.tx.close();
    }
}

/// SLIP-framed channel over a [`SerialLink`].
///
/// Writes are split into units no larger than the link's write unit. Reads
/// serve bytes left over from an earlier receive before starting a new one,
/// and the frame decoder keeps its state between calls.
pub struct SerialChannel<L> {
    link: L,
    rx: CompletionSlot<io::Result<Bytes>>,
    tx: CompletionSlot<io::Result<usize>>,
    buffer: RxBuffer,
    write_unit: usize,
    max_frame: usize,
}

impl<L: SerialLink> SerialChannel<L> {
    pub fn new(link: L) -> Self {
        Self::with_config(link, FrameConfig::default())
    }

    /// `config.write_unit` is capped at the link's own write unit.
    pub fn with_config(link: L, config: FrameConfig) -> Self {
        let write_unit = config.write_unit.clamp(1, link.max_write_unit().max(1));
        Self {
            link,
            rx: CompletionSlot::new(),
            tx: CompletionSlot::new(),
            buffer: RxBuffer::new(config.max_frame_size),
            write_unit,
            max_frame: config.max_frame_size,
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            rx: self.rx.clone(),
            tx: self.tx.clone(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Read raw bytes without delimiter interpretation.
    ///
    /// Leftover bytes are returned immediately when there are any; otherwise
    /// one link read is awaited and whatever does not fit in `buf` is kept
    /// for the next call.
    pub fn read_raw(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.buffer.is_empty() {
            return Ok(self.buffer.serve(buf));
        }
        let unit = self.receive_unit(timeout)?;
        Ok(self.buffer.serve_unit(&unit, buf))
    }

    /// Read until a complete frame is decoded or the timeout expires.
    ///
    /// A frame longer than the configured maximum yields
    /// [`FrameError::FrameTooLong`]; the decoder has already skipped to the
    /// next delimiter when the error is returned.
    pub fn read_frame(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        self.ensure_open()?;
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                trace!(len = frame.len(), "serial frame received");
                return Ok(frame);
            }
            let unit = deadline
                .remaining()
                .and_then(|left| self.receive_unit(left))
                .map_err(|err| deadline.restamp(err))?;
            self.buffer.extend(&unit);
        }
    }

    /// Write raw bytes in link-sized units. Returns the bytes flushed, which
    /// is short of `data.len()` when a later unit fails after earlier ones
    /// went out.
    pub fn write_raw(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.ensure_open()?;
        let deadline = Deadline::after(timeout);
        let mut flushed = 0usize;
        for chunk in data.chunks(self.write_unit) {
            match self.flush_unit(chunk, &deadline) {
                Ok(n) => flushed += n,
                Err(err) => return partial_write(flushed, err),
            }
        }
        Ok(flushed)
    }

    /// Encode `payload` as one SLIP frame and flush it in link-sized units.
    /// Returns the wire bytes flushed, short of the full frame when a later
    /// unit fails.
    pub fn write_frame(&mut self, payload: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.ensure_open()?;
        if payload.len() > self.max_frame {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_frame,
            }
            .into());
        }
        let deadline = Deadline::after(timeout);
        let unit = self.write_unit;
        let mut flushed = 0usize;
        let result: Result<usize> = encode_chunked(payload, unit, |chunk| {
            let n = self.flush_unit(chunk, &deadline)?;
            flushed += n;
            Ok(n)
        });
        result.or_else(|err| partial_write(flushed, err))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }

    /// Await one link read, starting it unless an earlier one that timed out
    /// is still in flight.
    fn receive_unit(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        if !self.rx.is_in_flight() {
            let done = self.rx.begin().ok_or(TransportError::NotOpen)?;
            let max = self.link.max_read_unit();
            if let Err(err) = self.link.start_read(max, done) {
                self.rx.abandon();
                return Err(TransportError::Rejected(err.to_string()));
            }
        }

        match self.rx.wait(timeout) {
            WaitResult::Ready(Ok(unit)) if unit.is_empty() => Err(TransportError::Closed),
            WaitResult::Ready(Ok(unit)) => Ok(unit),
            WaitResult::Ready(Err(err)) => Err(TransportError::Io(err)),
            WaitResult::TimedOut => Err(TransportError::Timeout(timeout.unwrap_or_default())),
            WaitResult::Cancelled => Err(TransportError::Cancelled),
            WaitResult::Idle => Err(TransportError::NotOpen),
        }
    }

    fn flush_unit(&mut self, chunk: &[u8], deadline: &Deadline) -> Result<usize> {
        if self.tx.is_in_flight() {
            // An earlier write timed out and has to land first.
            match self.tx.wait(deadline.remaining()?) {
                WaitResult::Ready(Err(err)) => warn!(%err, "earlier serial write failed"),
                WaitResult::Ready(Ok(_)) | WaitResult::Idle => {}
                WaitResult::TimedOut => {
                    return Err(deadline.restamp(TransportError::Timeout(Duration::ZERO)))
                }
                WaitResult::Cancelled => return Err(TransportError::Cancelled),
            }
        }

        let done = self.tx.begin().ok_or(TransportError::NotOpen)?;
        if let Err(err) = self
            .link
            .start_write(Bytes::copy_from_slice(chunk), done)
        {
            self.tx.abandon();
            return Err(TransportError::Rejected(err.to_string()));
        }

        match self.tx.wait(deadline.remaining()?) {
            WaitResult::Ready(Ok(written)) => Ok(written),
            WaitResult::Ready(Err(err)) => Err(TransportError::Io(err)),
            WaitResult::TimedOut => Err(deadline.restamp(TransportError::Timeout(Duration::ZERO))),
            WaitResult::Cancelled => Err(TransportError::Cancelled),
            WaitResult::Idle => Err(TransportError::NotOpen),
        }
    }
}

/// Report bytes already on the link instead of the error that cut the write
/// short.
fn partial_write(flushed: usize, err: TransportError) -> Result<usize> {
    if flushed == 0 {
        return Err(err);
    }
    warn!(flushed, %err, "serial write cut short");
    Ok(flushed)
}

impl<L: SerialLink> Channel for SerialChannel<L> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    fn is_open(&self) -> bool {
        !self.rx.is_closed() && self.link.is_configured()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.read_raw(buf, timeout)
    }

    fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.write_raw(buf, timeout)
    }

    fn close(&mut self) {
        let was_open = !self.rx.is_closed();
        self.rx.close();
        self.tx.close();
        self.buffer.clear();
        self.link.shutdown();
        if was_open {
            debug!("serial channel closed");
        }
    }
}

impl<L: SerialLink> MessageChannel for SerialChannel<L> {
    fn recv_message(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        self.read_frame(timeout)
    }

    fn send_message(&mut self, message: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.write_frame(message, timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use boardlink_frame::{FrameDecoder, END, ESC, ESC_END};
    use bytes::BytesMut;

    use super::*;
    use crate::channel::FOREVER;

    const SHORT: Option<Duration> = Some(Duration::from_millis(20));
    const LONG: Option<Duration> = Some(Duration::from_secs(5));

    #[derive(Default)]
    struct ScriptState {
        inbound: VecDeque<Vec<u8>>,
        parked_read: Option<ReadCompletion>,
        reads_started: usize,
        writes: Vec<Vec<u8>>,
    }

    /// Test handle feeding a [`ScriptedLink`].
    #[derive(Clone, Default)]
    struct Script {
        state: Arc<Mutex<ScriptState>>,
    }

    impl Script {
        fn deliver(&self, unit: &[u8]) {
            let mut state = self.state.lock().unwrap();
            let parked = state.parked_read.take();
            match parked {
                Some(done) => {
                    drop(state);
                    done.complete(Ok(Bytes::copy_from_slice(unit)));
                }
                None => state.inbound.push_back(unit.to_vec()),
            }
        }

        fn reads_started(&self) -> usize {
            self.state.lock().unwrap().reads_started
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().writes.clone()
        }
    }

    struct ScriptedLink {
        script: Script,
        configured: bool,
        write_unit: usize,
        /// Writes at or past this index fail.
        fail_from: usize,
    }

    impl ScriptedLink {
        fn new(script: &Script) -> Self {
            Self {
                script: script.clone(),
                configured: true,
                write_unit: DEFAULT_UNIT,
                fail_from: usize::MAX,
            }
        }
    }

    impl SerialLink for ScriptedLink {
        fn is_configured(&self) -> bool {
            self.configured
        }

        fn max_write_unit(&self) -> usize {
            self.write_unit
        }

        fn start_read(&mut self, _max: usize, done: ReadCompletion) -> io::Result<()> {
            let mut state = self.script.state.lock().unwrap();
            state.reads_started += 1;
            let next = state.inbound.pop_front();
            match next {
                Some(unit) => {
                    drop(state);
                    done.complete(Ok(Bytes::from(unit)));
                }
                None => state.parked_read = Some(done),
            }
            Ok(())
        }

        fn start_write(&mut self, data: Bytes, done: WriteCompletion) -> io::Result<()> {
            let mut state = self.script.state.lock().unwrap();
            if state.writes.len() >= self.fail_from {
                drop(state);
                done.complete(Err(io::Error::other("endpoint stalled")));
                return Ok(());
            }
            state.writes.push(data.to_vec());
            drop(state);
            done.complete(Ok(data.len()));
            Ok(())
        }

        fn shutdown(&mut self) {
            self.configured = false;
        }
    }

    fn channel(script: &Script) -> SerialChannel<ScriptedLink> {
        SerialChannel::new(ScriptedLink::new(script))
    }

    #[test]
    fn partial_reads_carry_over_without_new_link_reads() {
        let script = Script::default();
        let data: Vec<u8> = (0..100).collect();
        script.deliver(&data);

        let mut ch = channel(&script);
        let mut buf = [0u8; 30];
        for start in [0u8, 30, 60] {
            assert_eq!(ch.read_raw(&mut buf, SHORT).unwrap(), 30);
            let expected: Vec<u8> = (start..start + 30).collect();
            assert_eq!(&buf[..], &expected[..]);
        }
        assert_eq!(ch.read_raw(&mut buf, SHORT).unwrap(), 10);
        assert_eq!(&buf[..10], &data[90..]);
        assert_eq!(script.reads_started(), 1);
    }

    #[test]
    fn frame_spans_several_link_reads() {
        let script = Script::default();
        script.deliver(&[END, b'h', b'e']);
        script.deliver(&[b'l', b'l', b'o', END]);

        let mut ch = channel(&script);
        assert_eq!(ch.read_frame(LONG).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn escape_split_across_reads_is_resumed() {
        let script = Script::default();
        script.deliver(&[END, b'a', ESC]);
        script.deliver(&[ESC_END, END]);

        let mut ch = channel(&script);
        assert_eq!(ch.read_frame(LONG).unwrap().as_ref(), &[b'a', END]);
    }

    #[test]
    fn oversized_frame_fails_then_next_frame_decodes() {
        let script = Script::default();
        let mut wire = vec![END];
        wire.extend_from_slice(&[7u8; 10]);
        wire.extend_from_slice(&[END, b'o', b'k', END]);
        script.deliver(&wire);

        let config = FrameConfig {
            max_frame_size: 4,
            ..FrameConfig::default()
        };
        let mut ch = SerialChannel::with_config(ScriptedLink::new(&script), config);

        let err = ch.read_frame(LONG).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::FrameTooLong { max: 4 })
        ));
        assert_eq!(ch.read_frame(LONG).unwrap().as_ref(), b"ok");
    }

    #[test]
    fn write_frame_respects_link_unit() {
        let script = Script::default();
        let mut link = ScriptedLink::new(&script);
        link.write_unit = 8;
        let mut ch = SerialChannel::new(link);

        let payload = [END; 20];
        let written = ch.write_frame(&payload, LONG).unwrap();

        let writes = script.writes();
        assert!(writes.iter().all(|w| w.len() <= 8));
        let wire: Vec<u8> = writes.concat();
        assert_eq!(written, wire.len());

        let mut buf = BytesMut::from(&wire[..]);
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), &payload);
    }

    #[test]
    fn write_raw_splits_without_framing() {
        let script = Script::default();
        let mut ch = channel(&script);

        let data = vec![0xAAu8; 150];
        assert_eq!(ch.write_raw(&data, LONG).unwrap(), 150);
        let sizes: Vec<usize> = script.writes().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 64, 22]);
    }

    #[test]
    fn failed_unit_reports_bytes_already_flushed() {
        let script = Script::default();
        let mut link = ScriptedLink::new(&script);
        link.fail_from = 2;
        let mut ch = SerialChannel::new(link);

        assert_eq!(ch.write_raw(&[0x55; 150], LONG).unwrap(), 128);
        assert_eq!(script.writes().len(), 2);
    }

    #[test]
    fn failed_frame_unit_reports_partial_wire_count() {
        let script = Script::default();
        let mut link = ScriptedLink::new(&script);
        link.write_unit = 8;
        link.fail_from = 1;
        let mut ch = SerialChannel::new(link);

        assert_eq!(ch.write_frame(&[b'x'; 20], LONG).unwrap(), 8);
    }

    #[test]
    fn first_unit_failure_is_an_error() {
        let script = Script::default();
        let mut link = ScriptedLink::new(&script);
        link.fail_from = 0;
        let mut ch = SerialChannel::new(link);

        assert!(matches!(
            ch.write_raw(b"abc", LONG),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let script = Script::default();
        let config = FrameConfig {
            max_frame_size: 2,
            ..FrameConfig::default()
        };
        let mut ch = SerialChannel::with_config(ScriptedLink::new(&script), config);
        let err = ch.write_frame(b"abc", LONG).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::PayloadTooLarge { size: 3, max: 2 })
        ));
        assert!(script.writes().is_empty());
    }

    #[test]
    fn late_completion_is_served_by_next_read() {
        let script = Script::default();
        let mut ch = channel(&script);
        let mut buf = [0u8; 8];

        let err = ch.read_raw(&mut buf, SHORT).unwrap_err();
        assert!(err.is_timeout());

        script.deliver(b"late");
        assert_eq!(ch.read_raw(&mut buf, SHORT).unwrap(), 4);
        assert_eq!(&buf[..4], b"late");
        assert_eq!(script.reads_started(), 1);
    }

    #[test]
    fn close_handle_releases_blocked_reader() {
        let script = Script::default();
        let mut ch = channel(&script);
        let handle = ch.close_handle();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.close();
        });

        let err = ch.read_frame(FOREVER).unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        closer.join().expect("closer thread should not panic");
        assert!(!ch.is_open());
    }

    #[test]
    fn close_is_idempotent_and_drops_buffered_data() {
        let script = Script::default();
        script.deliver(b"0123456789");
        let mut ch = channel(&script);
        let mut buf = [0u8; 4];
        ch.read_raw(&mut buf, SHORT).unwrap();

        ch.close();
        ch.close();
        assert!(!ch.is_open());
        assert!(matches!(
            ch.read_raw(&mut buf, SHORT),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(ch.write_raw(b"x", SHORT), Err(TransportError::NotOpen)));
    }

    #[test]
    fn unconfigured_link_fails_immediately() {
        let script = Script::default();
        let mut link = ScriptedLink::new(&script);
        link.configured = false;
        let mut ch = SerialChannel::new(link);

        assert!(matches!(ch.read_frame(FOREVER), Err(TransportError::NotOpen)));
        ch.close();
        assert_eq!(script.reads_started(), 0);
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stream_link_drives_blocking_io() {
        let inbound = Cursor::new(vec![END, b'h', b'i', END]);
        let sink = SharedSink::default();
        let link = StreamLink::new(inbound, sink.clone()).expect("workers should start");
        let mut ch = SerialChannel::new(link);

        assert_eq!(ch.read_frame(LONG).unwrap().as_ref(), b"hi");
        assert!(matches!(ch.read_frame(LONG), Err(TransportError::Closed)));

        let written = ch.write_frame(b"yo", LONG).unwrap();
        assert_eq!(written, 4);
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[END, b'y', b'o', END]);

        ch.close();
        assert!(!ch.link().is_configured());
    }

    #[cfg(unix)]
    fn silent_pipe() -> (File, File) {
        use std::os::fd::FromRawFd;

        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe should be created");
        // SAFETY: both descriptors were just created and are owned by nothing else.
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    }

    #[cfg(unix)]
    #[test]
    fn close_stops_reader_blocked_on_silent_device() {
        let (read_end, _write_end) = silent_pipe();
        let link = StreamLink::from_file(read_end).expect("workers should start");
        let mut ch = SerialChannel::new(link);
        let mut buf = [0u8; 8];

        let err = ch.read_raw(&mut buf, SHORT).unwrap_err();
        assert!(err.is_timeout());
        assert!(!ch.link().reader_stopped());

        ch.close();
        assert!(ch.link().reader_stopped());
        assert!(!ch.is_open());
    }
}
