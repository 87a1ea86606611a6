//! Checksum-validated persistent network configuration.
//!
//! The board keeps its IP address, mask and gateway in a small byte-addressed
//! store next to a checksum (the wrapping sum of the three values). The
//! stored set is trusted only when the checksum matches; otherwise the
//! factory defaults are served. Any mutation invalidates the set until it is
//! explicitly re-validated.

pub mod error;
pub mod identity;
pub mod storage;
pub mod store;

pub use error::{ConfigError, Result};
pub use identity::MacAddress;
pub use storage::{ConfigKey, FileStorage, MemoryStorage, Storage, ERASED, ERASED_CELL};
pub use store::{
    checksum, parse_address, ConfigStore, NetworkField, NetworkSnapshot, Validity,
    DEFAULT_ADDRESS, DEFAULT_GATEWAY, DEFAULT_MASK,
};
