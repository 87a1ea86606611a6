use std::sync::Arc;
use std::time::Duration;

use boardlink_config::MemoryStorage;
use boardlink_dispatch::{call, Message};
use boardlink_transport::{
    Channel, DatagramChannel, MessageChannel, NetContext, SerialChannel, StdNetStack,
    StreamChannel, StreamLink,
};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    dispatch_error, io_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE,
};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = Some(parse_duration(&args.timeout)?);
    let request: Message = args
        .message
        .parse()
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid message: {err}")))?;

    let mut channel = open_channel(&args, timeout)?;
    debug!(kind = %channel.kind(), %request, "sending request");

    let result = if args.wait {
        call(&mut channel, &request, timeout)
            .map(|reply| print_reply(&reply, format))
            .map_err(|err| dispatch_error("request failed", err))
    } else {
        channel
            .send_message(&request.to_bytes(), timeout)
            .map(|_| ())
            .map_err(|err| transport_error("send failed", err))
    };
    channel.close();
    result.map(|()| SUCCESS)
}

/// Host-side channel to the device. Host channels do not use the
/// persisted board configuration.
fn open_channel(
    args: &SendArgs,
    timeout: Option<Duration>,
) -> CliResult<Box<dyn MessageChannel>> {
    let host_context = || {
        Arc::new(NetContext::new(
            Box::new(StdNetStack::default()),
            Box::new(MemoryStorage::new()),
            0,
        ))
    };

    if let Some(addr) = args.tcp {
        let ctx = host_context();
        let channel = StreamChannel::open(&ctx, *addr.ip(), addr.port(), timeout)
            .map_err(|err| transport_error("connect failed", err))?;
        return Ok(Box::new(channel));
    }
    if let Some(addr) = args.udp {
        let mut channel = DatagramChannel::new(host_context());
        channel
            .connect(*addr.ip(), addr.port())
            .map_err(|err| transport_error("bind failed", err))?;
        return Ok(Box::new(channel));
    }
    if let Some(path) = &args.serial {
        let link = StreamLink::open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        return Ok(Box::new(SerialChannel::new(link)));
    }
    Err(CliError::new(USAGE, "one of --tcp, --udp or --serial is required"))
}
