use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use boardlink_frame::FrameError;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel was never opened, or has been closed.
    #[error("channel is not open")]
    NotOpen,

    /// No completion arrived within the timeout.
    ///
    /// The underlying operation stays in flight; its result is picked up by
    /// the next call in the same direction.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The channel was closed while the operation was waiting.
    #[error("operation cancelled by close")]
    Cancelled,

    /// The peer closed the connection.
    #[error("peer closed the channel")]
    Closed,

    /// The underlying stack refused the operation.
    #[error("rejected by the underlying stack: {0}")]
    Rejected(String),

    /// Network bring-up failed; the next open retries it.
    #[error("network activation failed: {0}")]
    Activation(io::Error),

    /// Failed to bind a local port.
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    /// Failed to connect to the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddrV4, source: io::Error },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    /// Framing fault on a message channel.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An I/O error occurred on the channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Map an I/O error from a blocking call with a timeout, folding the
    /// platform's timeout kinds into [`TransportError::Timeout`].
    pub(crate) fn from_wait(err: io::Error, timeout: Option<Duration>) -> Self {
        match (err.kind(), timeout) {
            (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(limit)) => {
                TransportError::Timeout(limit)
            }
            _ => TransportError::Io(err),
        }
    }

    /// Whether the error only means "nothing arrived in time".
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
