//! Communication core for a small networked board.
//!
//! A board talks to its host over SLIP-framed serial, TCP or UDP channels
//! and exposes its settings as addressable properties. Network addressing
//! is persisted next to a checksum and falls back to factory defaults
//! whenever the stored set cannot be trusted.
//!
//! # Crate Structure
//!
//! - [`frame`]: SLIP encoding and resumable decoding
//! - [`config`]: checksum-validated persistent network configuration
//! - [`transport`]: serial, stream, datagram and listener channels
//! - [`dispatch`]: `/subsystem/property` get/set routing (behind `dispatch` feature)

/// Re-export frame types.
pub mod frame {
    pub use boardlink_frame::*;
}

/// Re-export configuration types.
pub mod config {
    pub use boardlink_config::*;
}

/// Re-export transport types.
pub mod transport {
    pub use boardlink_transport::*;
}

/// Re-export dispatch types (requires `dispatch` feature).
#[cfg(feature = "dispatch")]
pub mod dispatch {
    pub use boardlink_dispatch::*;
}
