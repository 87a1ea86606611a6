use std::time::Duration;

use tracing::{debug, info};

use crate::channel::ChannelKind;
use crate::context::NetContext;
use crate::error::{Result, TransportError};
use crate::net::ListenerSocket;
use crate::stream::{StreamChannel, StreamConfig};

/// Passive TCP channel handing out a [`StreamChannel`] per peer.
///
/// Accepted channels are independent: closing the listener leaves them
/// open.
pub struct ListenerChannel {
    socket: Option<Box<dyn ListenerSocket>>,
    port: u16,
    config: StreamConfig,
}

impl ListenerChannel {
    /// Listen on `port` (0 for an ephemeral port).
    pub fn listen(ctx: &NetContext, port: u16) -> Result<Self> {
        Self::with_config(ctx, port, StreamConfig::default())
    }

    /// Listen with explicit tuning for the accepted channels.
    pub fn with_config(ctx: &NetContext, port: u16, config: StreamConfig) -> Result<Self> {
        ctx.ensure_active()?;
        let socket = ctx
            .stack()
            .listen(port)
            .map_err(|source| TransportError::Bind { port, source })?;
        let port = socket.local_port().unwrap_or(port);
        info!(port, "listening");
        Ok(Self {
            socket: Some(socket),
            port,
            config,
        })
    }

    /// Block until a peer connects.
    pub fn accept(&mut self, timeout: Option<Duration>) -> Result<StreamChannel> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        let (stream, peer) = socket
            .accept(timeout)
            .map_err(|err| match TransportError::from_wait(err, timeout) {
                TransportError::Io(err) => TransportError::Accept(err),
                other => other,
            })?;
        info!(%peer, "accepted connection");
        Ok(StreamChannel::accepted(stream, peer, self.config.clone()))
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> ChannelKind {
        ChannelKind::Listener
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Stop listening. Safe to call more than once.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(port = self.port, "listener closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::thread;

    use boardlink_config::MemoryStorage;

    use super::*;
    use crate::channel::{Channel, MessageChannel};
    use crate::net::StdNetStack;

    const LONG: Option<Duration> = Some(Duration::from_secs(5));

    fn context() -> NetContext {
        NetContext::new(Box::new(StdNetStack::loopback()), Box::new(MemoryStorage::new()), 9)
    }

    #[test]
    fn accepted_channel_outlives_listener() {
        let ctx = context();
        let mut listener = ListenerChannel::listen(&ctx, 0).unwrap();
        let port = listener.local_port();
        assert_ne!(port, 0);

        let client = thread::spawn(move || {
            let ctx = context();
            let mut ch = StreamChannel::open(&ctx, Ipv4Addr::LOCALHOST, port, LONG)
                .expect("client should connect");
            ch.send_message(b"hello", LONG).expect("send should succeed");
            ch.recv_message(LONG).expect("reply should arrive")
        });

        let mut server = listener.accept(LONG).unwrap();
        assert_eq!(server.kind(), ChannelKind::Stream);
        listener.close();
        listener.close();
        assert!(!listener.is_open());

        assert_eq!(server.recv_message(LONG).unwrap().as_ref(), b"hello");
        server.send_message(b"world", LONG).unwrap();

        let reply = client.join().expect("client thread should not panic");
        assert_eq!(reply.as_ref(), b"world");
    }

    #[test]
    fn accept_timeout_and_closed_listener() {
        let ctx = context();
        let mut listener = ListenerChannel::listen(&ctx, 0).unwrap();
        let err = listener
            .accept(Some(Duration::from_millis(30)))
            .err()
            .expect("accept should time out");
        assert!(err.is_timeout());

        listener.close();
        assert!(matches!(listener.accept(LONG).err(), Some(TransportError::NotOpen)));
    }
}
