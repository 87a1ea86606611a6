use std::fmt;

use serde::{Serialize, Serializer};

/// Vendor prefix of every board MAC address.
pub const MAC_PREFIX: [u8; 3] = [0xAC, 0xDE, 0x48];

/// Ethernet hardware address of the board.
///
/// Derived from the hardware serial number at network bring-up; never
/// persisted and never writable over the property protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build the board MAC from its serial number.
    ///
    /// The low 20 bits of the serial number fill the low bytes: the low
    /// nibble of the fourth byte (high nibble fixed at `0x5`) and the last
    /// two bytes.
    pub fn from_serial_number(serial: u32) -> Self {
        Self([
            MAC_PREFIX[0],
            MAC_PREFIX[1],
            MAC_PREFIX[2],
            0x50 | ((serial >> 12) & 0x0F) as u8,
            ((serial >> 8) & 0xFF) as u8,
            (serial & 0xFF) as u8,
        ])
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
