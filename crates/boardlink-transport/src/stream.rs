use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use boardlink_frame::{encode_frame, FrameError, DEFAULT_MAX_FRAME};
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace};

use crate::channel::{Channel, ChannelKind, Deadline, MessageChannel};
use crate::context::NetContext;
use crate::error::{Result, TransportError};
use crate::net::StreamSocket;
use crate::rxbuf::RxBuffer;

/// Tuning for [`StreamChannel`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest single receive requested from the socket. Default: 1460.
    pub recv_unit: usize,
    /// Largest message accepted by [`MessageChannel::recv_message`].
    pub max_frame_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            recv_unit: 1460,
            max_frame_size: DEFAULT_MAX_FRAME,
        }
    }
}

/// TCP-like channel.
///
/// A receive that yields more than the caller asked for keeps the rest and
/// serves it on the next read. Messages travel SLIP-framed over the byte
/// stream.
pub struct StreamChannel {
    socket: Option<Box<dyn StreamSocket>>,
    peer: Option<SocketAddrV4>,
    buffer: RxBuffer,
    scratch: Vec<u8>,
    config: StreamConfig,
}

impl Default for StreamChannel {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl StreamChannel {
    /// Unconnected channel; every operation but `connect` and `close` fails
    /// with [`TransportError::NotOpen`].
    pub fn new(config: StreamConfig) -> Self {
        Self {
            socket: None,
            peer: None,
            buffer: RxBuffer::new(config.max_frame_size),
            scratch: vec![0u8; config.recv_unit.max(1)],
            config,
        }
    }

    /// Connect to `address:port`, activating the network first if nothing
    /// has yet. An existing connection is closed.
    pub fn connect(
        &mut self,
        ctx: &NetContext,
        address: Ipv4Addr,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.close();
        ctx.ensure_active()?;
        let addr = SocketAddrV4::new(address, port);
        let socket = ctx
            .stack()
            .connect(addr, timeout)
            .map_err(|source| TransportError::Connect { addr, source })?;
        info!(%addr, "stream channel connected");
        self.attach(socket, addr);
        Ok(())
    }

    /// Shorthand for [`StreamChannel::new`] followed by `connect`.
    pub fn open(
        ctx: &NetContext,
        address: Ipv4Addr,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut channel = Self::default();
        channel.connect(ctx, address, port, timeout)?;
        Ok(channel)
    }

    pub(crate) fn accepted(socket: Box<dyn StreamSocket>, peer: SocketAddrV4, config: StreamConfig) -> Self {
        let mut channel = Self::new(config);
        channel.attach(socket, peer);
        channel
    }

    fn attach(&mut self, socket: Box<dyn StreamSocket>, peer: SocketAddrV4) {
        self.socket = Some(socket);
        self.peer = Some(peer);
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    /// Bytes received but not yet read.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// One receive from the socket into the scratch unit.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        match socket.recv(&mut self.scratch, timeout) {
            Ok(0) => {
                debug!(peer = ?self.peer, "peer closed stream");
                Err(TransportError::Closed)
            }
            Ok(n) => {
                trace!(n, "stream receive");
                Ok(n)
            }
            Err(err) => Err(TransportError::from_wait(err, timeout)),
        }
    }
}

impl Channel for StreamChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Stream
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.buffer.is_empty() {
            return Ok(self.buffer.serve(buf));
        }
        let n = self.receive(timeout)?;
        Ok(self.buffer.serve_unit(&self.scratch[..n], buf))
    }

    fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        socket
            .send(buf, timeout)
            .map_err(|err| TransportError::from_wait(err, timeout))
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.shutdown();
            debug!(peer = ?self.peer, "stream channel closed");
        }
        self.peer = None;
        self.buffer.clear();
    }
}

impl MessageChannel for StreamChannel {
    fn recv_message(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }
            let n = deadline
                .remaining()
                .and_then(|left| self.receive(left))
                .map_err(|err| deadline.restamp(err))?;
            self.buffer.extend(&self.scratch[..n]);
        }
    }

    fn send_message(&mut self, message: &[u8], timeout: Option<Duration>) -> Result<usize> {
        if message.len() > self.config.max_frame_size {
            return Err(FrameError::PayloadTooLarge {
                size: message.len(),
                max: self.config.max_frame_size,
            }
            .into());
        }
        let mut wire = BytesMut::new();
        encode_frame(message, &mut wire);
        self.write(&wire, timeout)
    }
}
