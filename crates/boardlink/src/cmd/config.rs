use boardlink_config::{parse_address, ConfigStore, FileStorage, NetworkField};
use tracing::info;

use crate::cmd::{ConfigCommand, ConfigField, ConfigSetArgs, StoreArgs};
use crate::exit::{config_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_snapshot, OutputFormat};

pub fn run(command: ConfigCommand, format: OutputFormat) -> CliResult<i32> {
    match command {
        ConfigCommand::Show(args) => {
            let mut store = open(&args);
            print_snapshot(&store.snapshot(), format);
        }
        ConfigCommand::Set(args) => set(args)?,
        ConfigCommand::Validate(args) => open(&args)
            .validate(true)
            .map_err(|err| config_error("validate failed", err))?,
        ConfigCommand::Invalidate(args) => open(&args)
            .validate(false)
            .map_err(|err| config_error("invalidate failed", err))?,
    }
    Ok(SUCCESS)
}

fn open(args: &StoreArgs) -> ConfigStore<FileStorage> {
    ConfigStore::new(FileStorage::new(&args.store))
}

fn set(args: ConfigSetArgs) -> CliResult<()> {
    let mut store = open(&args.store);
    let value = args.value.as_str();
    let stored = match args.field {
        ConfigField::Address => store.set(NetworkField::Address, address(value)?),
        ConfigField::Mask => store.set(NetworkField::Mask, address(value)?),
        ConfigField::Gateway => store.set(NetworkField::Gateway, address(value)?),
        ConfigField::TcpoutAddress => store.set_tcp_out_address(address(value)?),
        ConfigField::TcpoutPort => {
            let port = value
                .trim()
                .parse::<u16>()
                .map_err(|_| CliError::new(USAGE, format!("invalid port: {value}")))?;
            store.set_tcp_out_port(port)
        }
        ConfigField::TcpoutAutoconnect => match value.trim() {
            "0" => store.set_tcp_out_autoconnect(false),
            "1" => store.set_tcp_out_autoconnect(true),
            _ => return Err(CliError::new(USAGE, format!("expected 0 or 1, got {value}"))),
        },
    };
    stored.map_err(|err| config_error("write failed", err))?;
    info!(field = ?args.field, value, "stored");
    Ok(())
}

fn address(value: &str) -> CliResult<std::net::Ipv4Addr> {
    parse_address(value).map_err(|err| config_error("invalid value", err))
}
