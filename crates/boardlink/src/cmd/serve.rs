use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boardlink_config::{FileStorage, MemoryStorage, Storage};
use boardlink_dispatch::{DispatchError, Dispatcher, NetworkSubsystem, ServerConfig};
use boardlink_transport::{
    Channel, ChannelKind, DatagramChannel, ListenerChannel, NetContext, SerialChannel,
    StdNetStack, StreamLink, TransportError,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{install_stop_handler, parse_duration, ServeArgs};
use crate::exit::{dispatch_error, io_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct ServingOutput<'a> {
    kind: &'static str,
    port: Option<u16>,
    path: Option<&'a str>,
    mac: String,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let poll = parse_duration(&args.poll_interval)?;
    let storage: Box<dyn Storage> = match &args.store {
        Some(path) => Box::new(FileStorage::new(path)),
        None => Box::new(MemoryStorage::new()),
    };
    let ctx = Arc::new(NetContext::new(
        Box::new(StdNetStack::new(args.bind)),
        storage,
        args.serial_number,
    ));

    let mut network = NetworkSubsystem::new(Arc::clone(&ctx));
    match network.autoconnect() {
        Ok(true) => info!("outbound connection open"),
        Ok(false) => {}
        Err(err) => warn!(%err, "autoconnect failed; continuing without outbound connection"),
    }

    let mut dispatcher = Dispatcher::new().with_config(ServerConfig {
        recv_timeout: Some(poll),
        ..ServerConfig::default()
    });
    dispatcher
        .register(Box::new(network))
        .map_err(|err| dispatch_error("setup failed", err))?;

    let stop = install_stop_handler()?;

    if let Some(port) = args.tcp {
        let mut listener =
            ListenerChannel::listen(&ctx, port).map_err(|err| transport_error("listen failed", err))?;
        announce(ChannelKind::Listener, Some(listener.local_port()), None, &ctx, format);
        serve_connections(&mut dispatcher, &mut listener, &stop, poll)?;
        listener.close();
    } else if let Some(port) = args.udp {
        let mut channel = DatagramChannel::new(Arc::clone(&ctx));
        let port = channel
            .bind(port)
            .map_err(|err| transport_error("bind failed", err))?;
        announce(ChannelKind::Datagram, Some(port), None, &ctx, format);
        let result = dispatcher.serve(&mut channel, &stop);
        channel.close();
        result.map_err(|err| dispatch_error("serve failed", err))?;
    } else if let Some(path) = &args.serial {
        let link = StreamLink::open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        let mut channel = SerialChannel::new(link);
        announce(ChannelKind::Serial, None, path.to_str(), &ctx, format);
        let result = dispatcher.serve(&mut channel, &stop);
        channel.close();
        result.map_err(|err| dispatch_error("serve failed", err))?;
    } else {
        return Err(CliError::new(USAGE, "one of --tcp, --udp or --serial is required"));
    }

    info!("server stopped");
    Ok(SUCCESS)
}

/// Serve one TCP peer at a time until stopped. A peer hanging up or
/// failing mid-session does not stop the server.
fn serve_connections(
    dispatcher: &mut Dispatcher,
    listener: &mut ListenerChannel,
    stop: &AtomicBool,
    poll: Duration,
) -> CliResult<()> {
    while !stop.load(Ordering::SeqCst) {
        let mut channel = match listener.accept(Some(poll)) {
            Ok(channel) => channel,
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(transport_error("accept failed", err)),
        };

        match dispatcher.serve(&mut channel, stop) {
            Ok(()) => {}
            Err(DispatchError::Transport(TransportError::Closed)) => {
                info!(peer = ?channel.peer(), "peer disconnected");
            }
            Err(err) => warn!(peer = ?channel.peer(), %err, "connection dropped"),
        }
        channel.close();
    }
    Ok(())
}

/// Report where the server is reachable on stdout, so callers that asked
/// for port 0 learn the real port.
fn announce(kind: ChannelKind, port: Option<u16>, path: Option<&str>, ctx: &NetContext, format: OutputFormat) {
    let mac = ctx.mac().to_string();
    match format {
        OutputFormat::Json => {
            let out = ServingOutput {
                kind: kind.as_str(),
                port,
                path,
                mac,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        _ => {
            let target = match (port, path) {
                (Some(port), _) => format!("port {port}"),
                (None, Some(path)) => path.to_string(),
                (None, None) => "-".to_string(),
            };
            println!("serving {kind} on {target} (mac {mac})");
        }
    }
}
