use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};
use crate::storage::{ConfigKey, Storage, ERASED_CELL};

/// Factory default board address.
pub const DEFAULT_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 200);
/// Factory default network mask.
pub const DEFAULT_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
/// Factory default gateway.
pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

/// Trust state of the persisted address set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    /// Not compared against the stored checksum yet.
    Unchecked,
    Invalid,
    Valid,
}

/// One of the checksummed address fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkField {
    Address,
    Mask,
    Gateway,
}

impl NetworkField {
    pub const ALL: [NetworkField; 3] = [
        NetworkField::Address,
        NetworkField::Mask,
        NetworkField::Gateway,
    ];

    /// Value served while the stored set is invalid.
    pub fn default_value(self) -> Ipv4Addr {
        match self {
            NetworkField::Address => DEFAULT_ADDRESS,
            NetworkField::Mask => DEFAULT_MASK,
            NetworkField::Gateway => DEFAULT_GATEWAY,
        }
    }

    pub fn key(self) -> ConfigKey {
        match self {
            NetworkField::Address => ConfigKey::Address,
            NetworkField::Mask => ConfigKey::Mask,
            NetworkField::Gateway => ConfigKey::Gateway,
        }
    }
}

impl fmt::Display for NetworkField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key().fmt(f)
    }
}

/// Wrapping sum of the three address values, as stored in the checksum cell.
///
/// Each address contributes its octets read as a little-endian `u32`.
pub fn checksum(address: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> u32 {
    [address, mask, gateway]
        .iter()
        .map(|addr| u32::from_le_bytes(addr.octets()))
        .fold(0u32, u32::wrapping_add)
}

/// Parse a dotted-decimal address (`a.b.c.d`).
pub fn parse_address(text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(text.to_string()))
}

/// Point-in-time view of the effective configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSnapshot {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub validity: Validity,
    pub tcpout_address: Ipv4Addr,
    pub tcpout_port: u16,
    pub tcpout_autoconnect: bool,
}

/// Persistent network configuration with lazy checksum validation.
///
/// Not built for concurrent writers; wrap it in a mutex and keep a single
/// configuration owner.
#[derive(Debug)]
pub struct ConfigStore<S> {
    storage: S,
    validity: Validity,
}

impl<S: Storage> ConfigStore<S> {
    /// Wrap a storage medium. Validity is computed on first query.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validity: Validity::Unchecked,
        }
    }

    /// Cached validity, without touching storage.
    pub fn validity(&self) -> Validity {
        self.validity
    }

    /// Whether stored values are in effect, checking the checksum on first
    /// use.
    pub fn is_valid(&mut self) -> bool {
        if self.validity == Validity::Unchecked {
            self.check();
        }
        self.validity == Validity::Valid
    }

    /// Effective value of `field`: the stored value when the set is valid,
    /// otherwise the factory default.
    ///
    /// Storage failures are indistinguishable from never-written values and
    /// also yield the default.
    pub fn get(&mut self, field: NetworkField) -> Ipv4Addr {
        if self.validity == Validity::Unchecked {
            self.check();
        }
        if self.validity == Validity::Invalid {
            return field.default_value();
        }
        match self.read_address(field.key()) {
            Ok(value) => value,
            Err(err) => {
                warn!(%field, %err, "stored value unreadable; serving default");
                field.default_value()
            }
        }
    }

    /// Persist `value` for `field` and mark the set invalid until it is
    /// re-validated.
    pub fn set(&mut self, field: NetworkField, value: Ipv4Addr) -> Result<()> {
        self.validity = Validity::Invalid;
        self.storage.write(field.key(), value.octets())?;
        debug!(%field, %value, "stored network field");
        Ok(())
    }

    /// Recompute the checksum from storage, update the cached validity and
    /// report whether the stored set is trustworthy.
    pub fn check(&mut self) -> bool {
        let valid = match self.stored_checksum_inputs() {
            Ok((sum, stored)) => sum == stored,
            Err(err) => {
                debug!(%err, "stored network config unreadable");
                false
            }
        };
        self.validity = if valid {
            Validity::Valid
        } else {
            Validity::Invalid
        };
        valid
    }

    /// `true`: checksum the currently stored fields and mark them valid.
    /// Fields never written take part as erased cells.
    /// `false`: store a zero checksum, which reverts to factory defaults.
    pub fn validate(&mut self, valid: bool) -> Result<()> {
        if !valid {
            self.validity = Validity::Invalid;
            self.storage.write(ConfigKey::Checksum, 0u32.to_le_bytes())?;
            info!("network config invalidated; factory defaults in effect");
            return Ok(());
        }

        self.validity = Validity::Invalid;
        let address = self.read_address(ConfigKey::Address)?;
        let mask = self.read_address(ConfigKey::Mask)?;
        let gateway = self.read_address(ConfigKey::Gateway)?;
        let sum = checksum(address, mask, gateway);
        self.storage.write(ConfigKey::Checksum, sum.to_le_bytes())?;
        self.validity = Validity::Valid;
        info!(%address, %mask, %gateway, "network config validated");
        Ok(())
    }

    /// Remote TCP server the board connects out to. Not checksummed.
    pub fn tcp_out_address(&self) -> Ipv4Addr {
        match self.storage.read(ConfigKey::TcpOutAddress) {
            Ok(cell) if cell != ERASED_CELL => Ipv4Addr::from(cell),
            _ => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn set_tcp_out_address(&mut self, value: Ipv4Addr) -> Result<()> {
        self.storage.write(ConfigKey::TcpOutAddress, value.octets())
    }

    /// Remote TCP port; 0 when never stored.
    pub fn tcp_out_port(&self) -> u16 {
        self.read_u32(ConfigKey::TcpOutPort)
            .ok()
            .and_then(|raw| u16::try_from(raw).ok())
            .unwrap_or(0)
    }

    pub fn set_tcp_out_port(&mut self, port: u16) -> Result<()> {
        self.storage
            .write(ConfigKey::TcpOutPort, u32::from(port).to_le_bytes())
    }

    /// Whether the board connects to the TCP-out target at start-up.
    pub fn tcp_out_autoconnect(&self) -> bool {
        matches!(self.read_u32(ConfigKey::TcpOutAutoconnect), Ok(1))
    }

    pub fn set_tcp_out_autoconnect(&mut self, enabled: bool) -> Result<()> {
        self.storage.write(
            ConfigKey::TcpOutAutoconnect,
            u32::from(enabled).to_le_bytes(),
        )
    }

    /// Effective configuration as the network stack would see it.
    pub fn snapshot(&mut self) -> NetworkSnapshot {
        NetworkSnapshot {
            address: self.get(NetworkField::Address),
            mask: self.get(NetworkField::Mask),
            gateway: self.get(NetworkField::Gateway),
            validity: self.validity,
            tcpout_address: self.tcp_out_address(),
            tcpout_port: self.tcp_out_port(),
            tcpout_autoconnect: self.tcp_out_autoconnect(),
        }
    }

    /// Borrow the storage medium.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutably borrow the storage medium.
    ///
    /// Writing checksummed cells directly leaves the cached validity stale;
    /// call [`ConfigStore::check`] afterwards.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Consume the store and return the storage medium.
    pub fn into_inner(self) -> S {
        self.storage
    }

    fn stored_checksum_inputs(&self) -> Result<(u32, u32)> {
        let address = self.read_address(ConfigKey::Address)?;
        let mask = self.read_address(ConfigKey::Mask)?;
        let gateway = self.read_address(ConfigKey::Gateway)?;
        let stored = self.read_u32(ConfigKey::Checksum)?;
        Ok((checksum(address, mask, gateway), stored))
    }

    fn read_address(&self, key: ConfigKey) -> Result<Ipv4Addr> {
        self.storage.read(key).map(Ipv4Addr::from)
    }

    fn read_u32(&self, key: ConfigKey) -> Result<u32> {
        self.storage.read(key).map(u32::from_le_bytes)
    }
}
