use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelKind, MessageChannel};
use crate::context::NetContext;
use crate::error::{Result, TransportError};
use crate::net::DatagramSocket;

/// Largest UDP payload that fits an Ethernet frame without fragmentation.
pub const MAX_DATAGRAM: usize = 1472;

/// UDP-like channel.
///
/// Connectionless: the peer is re-associated on every send, and a receive
/// records the sender so replies go back to it. Each message is exactly one
/// datagram.
pub struct DatagramChannel {
    ctx: Arc<NetContext>,
    socket: Option<Box<dyn DatagramSocket>>,
    local_port: Option<u16>,
    peer: Option<SocketAddrV4>,
}

impl DatagramChannel {
    /// Unbound channel. The socket is created by the first `bind`, `send`
    /// or `receive`.
    pub fn new(ctx: Arc<NetContext>) -> Self {
        Self {
            ctx,
            socket: None,
            local_port: None,
            peer: None,
        }
    }

    /// Bind to `port` (0 for an ephemeral port), replacing any earlier
    /// socket. Returns the bound port.
    pub fn bind(&mut self, port: u16) -> Result<u16> {
        self.close();
        self.ctx.ensure_active()?;
        let socket = self
            .ctx
            .stack()
            .bind_datagram(port)
            .map_err(|source| TransportError::Bind { port, source })?;
        let local = socket.local_port().unwrap_or(port);
        debug!(port = local, "datagram channel bound");
        self.socket = Some(socket);
        self.local_port = Some(local);
        Ok(local)
    }

    /// Send one datagram to `address:port`, making it the channel's peer.
    /// Binds an ephemeral port first if the channel is unbound.
    pub fn send(&mut self, address: Ipv4Addr, port: u16, buf: &[u8]) -> Result<usize> {
        if self.socket.is_none() {
            self.bind(0)?;
        }
        let peer = SocketAddrV4::new(address, port);
        self.peer = Some(peer);
        self.send_to_peer(buf, peer)
    }

    /// Make `address:port` the peer for [`Channel::write`] and
    /// [`MessageChannel::send_message`] without sending anything. Binds an
    /// ephemeral port first if the channel is unbound.
    pub fn connect(&mut self, address: Ipv4Addr, port: u16) -> Result<()> {
        if self.socket.is_none() {
            self.bind(0)?;
        }
        self.peer = Some(SocketAddrV4::new(address, port));
        Ok(())
    }

    /// Block for one datagram on `port`, binding to it first unless already
    /// bound there (port 0 accepts whatever port is bound).
    ///
    /// A datagram longer than `buf` is truncated to `buf.len()` without an
    /// error. Returns the byte count and the sender, which becomes the peer.
    pub fn receive(
        &mut self,
        port: u16,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(usize, SocketAddrV4)> {
        let rebind = match (self.local_port, port) {
            (None, _) => true,
            (Some(_), 0) => false,
            (Some(bound), wanted) => bound != wanted,
        };
        if rebind {
            self.bind(port)?;
        }
        self.receive_bound(buf, timeout)
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Where the next reply goes: the last sender or send target.
    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    fn receive_bound(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(usize, SocketAddrV4)> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        let (n, sender) = socket
            .recv_from(buf, timeout)
            .map_err(|err| TransportError::from_wait(err, timeout))?;
        trace!(n, %sender, "datagram received");
        self.peer = Some(sender);
        Ok((n, sender))
    }

    fn send_to_peer(&mut self, buf: &[u8], peer: SocketAddrV4) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        let sent = socket.send_to(buf, peer)?;
        trace!(sent, %peer, "datagram sent");
        Ok(sent)
    }
}

impl Channel for DatagramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Datagram
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.receive_bound(buf, timeout).map(|(n, _)| n)
    }

    /// Sends to the current peer.
    fn write(&mut self, buf: &[u8], _timeout: Option<Duration>) -> Result<usize> {
        if self.socket.is_none() {
            return Err(TransportError::NotOpen);
        }
        let peer = self
            .peer
            .ok_or_else(|| TransportError::Rejected("datagram channel has no peer".into()))?;
        self.send_to_peer(buf, peer)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(port = ?self.local_port, "datagram channel closed");
        }
        self.local_port = None;
        self.peer = None;
    }
}

impl MessageChannel for DatagramChannel {
    fn recv_message(&mut self, timeout: Option<Duration>) -> Result<Bytes> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _) = self.receive_bound(&mut buf, timeout)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    fn send_message(&mut self, message: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.write(message, timeout)
    }
}
