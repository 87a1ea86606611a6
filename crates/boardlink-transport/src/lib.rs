//! Channels between the board and its host.
//!
//! Four channel kinds share one surface ([`Channel`], [`MessageChannel`]):
//!
//! - [`SerialChannel`]: SLIP-framed, over a completion-driven [`SerialLink`]
//! - [`StreamChannel`]: TCP-like byte stream with partial-read carry-over
//! - [`DatagramChannel`]: UDP-like, one message per datagram
//! - [`ListenerChannel`]: passive TCP, yields a [`StreamChannel`] per peer
//!
//! Network channels reach the IP stack through a shared [`NetContext`],
//! which brings the interface up once, on first use, from the persisted
//! configuration.

pub mod channel;
pub mod completion;
pub mod context;
pub mod datagram;
pub mod error;
pub mod listener;
pub mod net;
mod rxbuf;
pub mod serial;
pub mod stream;

pub use channel::{Channel, ChannelKind, MessageChannel, FOREVER};
pub use completion::{Completer, CompletionSlot, WaitResult};
pub use context::{BoxedConfigStore, NetContext};
pub use datagram::{DatagramChannel, MAX_DATAGRAM};
pub use error::{Result, TransportError};
pub use listener::ListenerChannel;
pub use net::{
    DatagramSocket, InterfaceConfig, ListenerSocket, NetStack, StdNetStack, StreamSocket,
};
pub use serial::{CloseHandle, SerialChannel, SerialLink, StreamLink, DEFAULT_UNIT};
pub use stream::{StreamChannel, StreamConfig};
