//! The `network` subsystem: interface state, persisted addressing and the
//! outbound TCP connection.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use boardlink_config::{parse_address, ConfigError, NetworkField};
use boardlink_transport::{Channel, NetContext, Result as TransportResult, StreamChannel};
use tracing::{info, warn};

use crate::error::{ErrorCode, PropertyError};
use crate::message::Value;
use crate::subsystem::{expect_int, expect_str, Property, PropertyResult, Subsystem};

pub const NETWORK_SUBSYSTEM: &str = "network";

const ACTIVE: usize = 0;
const ADDRESS: usize = 1;
const MASK: usize = 2;
const GATEWAY: usize = 3;
const VALID: usize = 4;
const MAC: usize = 5;
const TCPOUT_ADDRESS: usize = 6;
const TCPOUT_PORT: usize = 7;
const TCPOUT_CONNECT: usize = 8;
const TCPOUT_AUTOCONNECT: usize = 9;

const PROPERTIES: &[Property] = &[
    Property::read_write("active"),
    Property::read_write("address"),
    Property::read_write("mask"),
    Property::read_write("gateway"),
    Property::read_write("valid"),
    Property::read_only("mac"),
    Property::read_write("tcpout_address"),
    Property::read_write("tcpout_port"),
    Property::read_write("tcpout_connect"),
    Property::read_write("tcpout_autoconnect"),
];

/// Default limit on opening the outbound connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network settings exposed over the property protocol.
///
/// Address changes go to the persisted store and invalidate it; they take
/// effect after `valid 1` and the next bring-up.
pub struct NetworkSubsystem {
    ctx: Arc<NetContext>,
    outbound: StreamChannel,
    connect_timeout: Duration,
}

impl NetworkSubsystem {
    pub fn new(ctx: Arc<NetContext>) -> Self {
        Self {
            ctx,
            outbound: StreamChannel::default(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open the outbound connection if the stored autoconnect flag is set.
    /// Returns whether a connection was made.
    pub fn autoconnect(&mut self) -> TransportResult<bool> {
        if !self.ctx.config().tcp_out_autoconnect() {
            return Ok(false);
        }
        self.connect_outbound()?;
        Ok(true)
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_open()
    }

    fn connect_outbound(&mut self) -> TransportResult<()> {
        let (address, port) = {
            let config = self.ctx.config();
            (config.tcp_out_address(), config.tcp_out_port())
        };
        info!(%address, port, "opening outbound connection");
        self.outbound
            .connect(&self.ctx, address, port, Some(self.connect_timeout))
            .inspect_err(|err| warn!(%err, "outbound connection failed"))
    }

    fn set_field(&mut self, field: NetworkField, args: &[Value]) -> PropertyResult<()> {
        let address = expect_address(args)?;
        self.ctx.config().set(field, address).map_err(storage_failed)
    }
}

impl Subsystem for NetworkSubsystem {
    fn name(&self) -> &str {
        NETWORK_SUBSYSTEM
    }

    fn properties(&self) -> &[Property] {
        PROPERTIES
    }

    fn get(&mut self, index: usize) -> PropertyResult<Value> {
        match index {
            ACTIVE => return Ok(Value::from(self.ctx.is_active())),
            MAC => return Ok(Value::Str(self.ctx.mac().to_string())),
            TCPOUT_CONNECT => return Ok(Value::from(self.outbound.is_open())),
            _ => {}
        }

        let mut config = self.ctx.config();
        Ok(match index {
            ADDRESS => address_value(config.get(NetworkField::Address)),
            MASK => address_value(config.get(NetworkField::Mask)),
            GATEWAY => address_value(config.get(NetworkField::Gateway)),
            VALID => Value::from(config.is_valid()),
            TCPOUT_ADDRESS => address_value(config.tcp_out_address()),
            TCPOUT_PORT => Value::Int(i32::from(config.tcp_out_port())),
            TCPOUT_AUTOCONNECT => Value::from(config.tcp_out_autoconnect()),
            _ => return Err(no_such_index(index)),
        })
    }

    fn set(&mut self, index: usize, args: &[Value]) -> PropertyResult<()> {
        match index {
            ACTIVE => {
                // The interface cannot be taken down once it is up.
                if expect_int(args)? != 0 {
                    self.ctx
                        .ensure_active()
                        .map_err(|err| PropertyError::bad_data(format!("bring-up failed: {err}")))?;
                }
                Ok(())
            }
            ADDRESS => self.set_field(NetworkField::Address, args),
            MASK => self.set_field(NetworkField::Mask, args),
            GATEWAY => self.set_field(NetworkField::Gateway, args),
            VALID => {
                let valid = expect_flag(args)?;
                self.ctx.config().validate(valid).map_err(storage_failed)
            }
            TCPOUT_ADDRESS => {
                let address = expect_address(args)?;
                self.ctx
                    .config()
                    .set_tcp_out_address(address)
                    .map_err(storage_failed)
            }
            TCPOUT_PORT => {
                let port = u16::try_from(expect_int(args)?)
                    .map_err(|_| PropertyError::bad_data("Incorrect data - port must be 0-65535"))?;
                self.ctx.config().set_tcp_out_port(port).map_err(storage_failed)
            }
            TCPOUT_CONNECT => {
                if expect_flag(args)? {
                    self.connect_outbound()
                        .map_err(|err| PropertyError::bad_data(format!("connect failed: {err}")))
                } else {
                    self.outbound.close();
                    Ok(())
                }
            }
            TCPOUT_AUTOCONNECT => {
                let enabled = expect_flag(args)?;
                self.ctx
                    .config()
                    .set_tcp_out_autoconnect(enabled)
                    .map_err(storage_failed)
            }
            _ => Err(no_such_index(index)),
        }
    }
}

fn address_value(address: Ipv4Addr) -> Value {
    Value::Str(address.to_string())
}

fn expect_address(args: &[Value]) -> PropertyResult<Ipv4Addr> {
    parse_address(expect_str(args)?).map_err(|err| PropertyError::bad_data(err.to_string()))
}

/// A single int that must be 0 or 1.
fn expect_flag(args: &[Value]) -> PropertyResult<bool> {
    match expect_int(args)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(PropertyError::bad_data("Incorrect data - need 0 or 1")),
    }
}

fn storage_failed(err: ConfigError) -> PropertyError {
    warn!(%err, "config write failed");
    PropertyError::bad_data(format!("could not store value: {err}"))
}

fn no_such_index(index: usize) -> PropertyError {
    PropertyError::new(
        ErrorCode::PropertyNotFound,
        format!("no network property at index {index}"),
    )
}
