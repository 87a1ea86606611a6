use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{Result, TransportError};

/// Timeout value meaning "wait forever".
pub const FOREVER: Option<Duration> = None;

/// Concrete mechanism behind a channel, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Serial,
    Stream,
    Datagram,
    Listener,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Serial => "serial",
            ChannelKind::Stream => "stream",
            ChannelKind::Datagram => "datagram",
            ChannelKind::Listener => "listener",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-level read/write surface shared by every connected channel.
///
/// A channel has one owner. At most one read and one write may be
/// outstanding; the owner's `&mut` borrow enforces that.
pub trait Channel: Send {
    fn kind(&self) -> ChannelKind;

    fn is_open(&self) -> bool;

    /// Read up to `buf.len()` bytes. Bytes left over from an earlier,
    /// larger receive are served first without touching the transport.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;

    /// Write `buf`, returning the number of bytes the transport accepted.
    ///
    /// A write that moves no bytes at all is an `Err`, never `Ok(0)`: an
    /// unopened or closed channel yields [`TransportError::NotOpen`] and a
    /// transport failure its own error. `Ok(n)` with `n < buf.len()` means
    /// the first `n` bytes went out before the transport stopped.
    fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize>;

    /// Release the transport and any buffered data. Safe to call more than
    /// once, and on a channel that never opened.
    fn close(&mut self);
}

/// Whole-message surface used by the property dispatcher.
pub trait MessageChannel: Channel {
    /// Receive the next complete message.
    fn recv_message(&mut self, timeout: Option<Duration>) -> Result<Bytes>;

    /// Send one message, returning the number of wire bytes written.
    fn send_message(&mut self, message: &[u8], timeout: Option<Duration>) -> Result<usize>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn kind(&self) -> ChannelKind {
        (**self).kind()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        (**self).write(buf, timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<C: MessageChannel + ?Sized> MessageChannel for Box<C> {
    fn recv_message(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        (**self).recv_message(timeout)
    }

    fn send_message(&mut self, message: &[u8], timeout: Option<Duration>) -> Result<usize> {
        (**self).send_message(message, timeout)
    }
}

/// Absolute end of an operation that may span several waits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    timeout: Option<Duration>,
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            at: timeout.map(|limit| Instant::now() + limit),
        }
    }

    /// Time left, or [`TransportError::Timeout`] once it has passed.
    pub(crate) fn remaining(&self) -> Result<Option<Duration>> {
        match (self.at, self.timeout) {
            (Some(at), Some(limit)) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(TransportError::Timeout(limit))
                } else {
                    Ok(Some(left))
                }
            }
            _ => Ok(None),
        }
    }

    /// Report a timeout against the whole operation rather than the slice
    /// of it that was left when the last wait started.
    pub(crate) fn restamp(&self, err: TransportError) -> TransportError {
        match (err, self.timeout) {
            (TransportError::Timeout(_), Some(limit)) => TransportError::Timeout(limit),
            (other, _) => other,
        }
    }
}
