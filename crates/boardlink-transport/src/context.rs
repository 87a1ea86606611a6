use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use boardlink_config::{ConfigStore, MacAddress, NetworkField, Storage};
use tracing::{info, warn};

use crate::error::{Result, TransportError};
use crate::net::{InterfaceConfig, NetStack};

/// Configuration store as owned by a [`NetContext`].
pub type BoxedConfigStore = ConfigStore<Box<dyn Storage>>;

/// Process-wide network state, built once at start-up and shared by handle.
///
/// Owns the IP stack, the configuration cache and the board identity.
/// The interface is brought up lazily by the first channel that needs it.
///
/// The bring-up lock is never held together with the configuration lock.
pub struct NetContext {
    stack: Box<dyn NetStack>,
    config: Mutex<BoxedConfigStore>,
    mac: MacAddress,
    active: AtomicBool,
    bring_up: Mutex<()>,
}

impl NetContext {
    pub fn new(stack: Box<dyn NetStack>, storage: Box<dyn Storage>, serial_number: u32) -> Self {
        Self {
            stack,
            config: Mutex::new(ConfigStore::new(storage)),
            mac: MacAddress::from_serial_number(serial_number),
            active: AtomicBool::new(false),
            bring_up: Mutex::new(()),
        }
    }

    /// Bring the interface up with the stored (or factory default)
    /// addressing unless that already happened.
    ///
    /// A failed bring-up is retried by the next call.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let iface = {
            let mut config = self.config();
            InterfaceConfig {
                mac: self.mac,
                address: config.get(NetworkField::Address),
                mask: config.get(NetworkField::Mask),
                gateway: config.get(NetworkField::Gateway),
            }
        };

        let _guard = self.bring_up.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_active() {
            return Ok(());
        }
        self.stack.bring_up(&iface).map_err(|err| {
            warn!(%err, "network bring-up failed");
            TransportError::Activation(err)
        })?;
        info!(address = %iface.address, mac = %self.mac, "network active");
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Hardware address derived from the board serial number.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Lock the configuration store. Hold the guard only briefly; it is the
    /// single writer of persisted settings.
    pub fn config(&self) -> MutexGuard<'_, BoxedConfigStore> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stack(&self) -> &dyn NetStack {
        self.stack.as_ref()
    }
}

impl std::fmt::Debug for NetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetContext")
            .field("mac", &self.mac)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
