use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod config;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the property server on one channel.
    Serve(ServeArgs),
    /// Send one property message to a device.
    Send(SendArgs),
    /// Inspect or edit a stored network configuration image.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Config(command) => config::run(command, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("channel").required(true).args(["tcp", "udp", "serial"])))]
pub struct ServeArgs {
    /// Accept TCP connections on PORT (0 picks a free port).
    #[arg(long, value_name = "PORT")]
    pub tcp: Option<u16>,
    /// Answer UDP datagrams on PORT (0 picks a free port).
    #[arg(long, value_name = "PORT")]
    pub udp: Option<u16>,
    /// Serve SLIP frames on a serial device.
    #[arg(long, value_name = "PATH")]
    pub serial: Option<PathBuf>,
    /// Local address to bind network channels to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: Ipv4Addr,
    /// Storage image for the network configuration. Kept in memory when unset.
    #[arg(long, value_name = "FILE", env = "BOARDLINK_STORE")]
    pub store: Option<PathBuf>,
    /// Board serial number, decimal or 0x-prefixed hex. Seeds the MAC address.
    #[arg(long, value_name = "N", env = "BOARDLINK_SERIAL_NUMBER", default_value = "0", value_parser = parse_serial_number)]
    pub serial_number: u32,
    /// Longest wait for one request before checking for shutdown (e.g. 500ms).
    #[arg(long, default_value = "500ms")]
    pub poll_interval: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("channel").required(true).args(["tcp", "udp", "serial"])))]
pub struct SendArgs {
    /// Message text, e.g. `/network/address` or `/network/valid 1`.
    pub message: String,
    /// Device TCP endpoint (ADDR:PORT).
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<SocketAddrV4>,
    /// Device UDP endpoint (ADDR:PORT).
    #[arg(long, value_name = "ADDR")]
    pub udp: Option<SocketAddrV4>,
    /// Serial device connected to the board.
    #[arg(long, value_name = "PATH")]
    pub serial: Option<PathBuf>,
    /// Wait for one reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Connect timeout, and reply timeout when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show(StoreArgs),
    /// Store one field. Address fields stay ineffective until `validate`.
    Set(ConfigSetArgs),
    /// Checksum the stored addresses so they take effect.
    Validate(StoreArgs),
    /// Clear the checksum, reverting to factory defaults.
    Invalidate(StoreArgs),
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Storage image to operate on.
    #[arg(long, value_name = "FILE", env = "BOARDLINK_STORE")]
    pub store: PathBuf,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Field to store.
    pub field: ConfigField,
    /// New value: dotted-decimal address, port number, or 0/1.
    pub value: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigField {
    Address,
    Mask,
    Gateway,
    TcpoutAddress,
    TcpoutPort,
    TcpoutAutoconnect,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

fn parse_serial_number(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid serial number '{input}': {err}"))
}

/// Flag set by Ctrl-C; long-running commands poll it.
pub fn install_stop_handler() -> CliResult<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(stop)
}
