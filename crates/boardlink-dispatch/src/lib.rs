//! Remote property get/set over boardlink channels.
//!
//! Requests are short text messages addressed as `/subsystem/property`.
//! A request without arguments reads the property and is answered with its
//! value; a request with arguments writes it and is answered only when the
//! write fails. Every failure, including an unknown subsystem or property,
//! comes back as an error reply on the channel that carried the request.
//!
//! ```text
//! -> /network/address
//! <- /network/address "192.168.0.200"
//! -> /network/mac "00:11:22:33:44:55"
//! <- /network/error 6 "mac is read only"
//! ```

pub mod dispatcher;
pub mod error;
pub mod message;
pub mod network;
pub mod subsystem;

pub use dispatcher::{call, reply_value, Dispatcher, ServerConfig};
pub use error::{DispatchError, ErrorCode, ParseError, PropertyError, Result};
pub use message::{Message, Value, ERROR_PROPERTY};
pub use network::{NetworkSubsystem, CONNECT_TIMEOUT, NETWORK_SUBSYSTEM};
pub use subsystem::{expect_int, expect_str, Access, Property, PropertyResult, Subsystem};
