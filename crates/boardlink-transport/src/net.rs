//! Network stack surface and its `std::net` implementation.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{
    Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket,
};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use boardlink_config::MacAddress;
use tracing::{debug, info};

/// Poll interval of accept calls with a timeout.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Addressing handed to the stack at bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub mac: MacAddress,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Connected stream socket.
pub trait StreamSocket: Send {
    /// Receive into `buf`; `Ok(0)` means the peer closed the connection.
    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize>;

    fn send(&mut self, buf: &[u8], timeout: Option<Duration>) -> io::Result<usize>;

    fn peer_addr(&self) -> io::Result<SocketAddrV4>;

    fn shutdown(&mut self);
}

/// Passive stream socket.
pub trait ListenerSocket: Send {
    fn accept(&mut self, timeout: Option<Duration>) -> io::Result<(Box<dyn StreamSocket>, SocketAddrV4)>;

    fn local_port(&self) -> io::Result<u16>;
}

/// Bound datagram socket.
pub trait DatagramSocket: Send {
    fn send_to(&mut self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize>;

    /// Receive one datagram. Bytes that do not fit in `buf` are dropped.
    fn recv_from(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<(usize, SocketAddrV4)>;

    fn local_port(&self) -> io::Result<u16>;
}

/// The connect/listen/send/receive surface of the underlying IP stack.
pub trait NetStack: Send + Sync {
    /// Configure the interface. Called once, before the first socket.
    fn bring_up(&self, iface: &InterfaceConfig) -> io::Result<()>;

    fn connect(&self, addr: SocketAddrV4, timeout: Option<Duration>) -> io::Result<Box<dyn StreamSocket>>;

    fn listen(&self, port: u16) -> io::Result<Box<dyn ListenerSocket>>;

    /// Bind a datagram socket; port 0 picks an ephemeral port.
    fn bind_datagram(&self, port: u16) -> io::Result<Box<dyn DatagramSocket>>;
}

fn v4(addr: SocketAddr) -> io::Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("IPv6 peer {addr} on an IPv4 channel"),
        )),
    }
}

/// `std` rejects a zero socket timeout; round it up to the smallest one.
fn socket_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|limit| limit.max(Duration::from_millis(1)))
}

/// [`NetStack`] on the host's own IP stack.
///
/// Bring-up only records the interface settings; sockets bind to
/// `bind_address` (all interfaces by default).
#[derive(Debug)]
pub struct StdNetStack {
    bind_address: Ipv4Addr,
    interface: Mutex<Option<InterfaceConfig>>,
}

impl Default for StdNetStack {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED)
    }
}

impl StdNetStack {
    pub fn new(bind_address: Ipv4Addr) -> Self {
        Self {
            bind_address,
            interface: Mutex::new(None),
        }
    }

    /// Stack bound to the loopback interface.
    pub fn loopback() -> Self {
        Self::new(Ipv4Addr::LOCALHOST)
    }

    /// Interface settings from the last bring-up.
    pub fn interface(&self) -> Option<InterfaceConfig> {
        self.interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NetStack for StdNetStack {
    fn bring_up(&self, iface: &InterfaceConfig) -> io::Result<()> {
        info!(
            mac = %iface.mac,
            address = %iface.address,
            mask = %iface.mask,
            gateway = %iface.gateway,
            "network interface up"
        );
        *self
            .interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(iface.clone());
        Ok(())
    }

    fn connect(&self, addr: SocketAddrV4, timeout: Option<Duration>) -> io::Result<Box<dyn StreamSocket>> {
        let stream = match socket_timeout(timeout) {
            Some(limit) => TcpStream::connect_timeout(&SocketAddr::V4(addr), limit)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        debug!(%addr, "tcp connected");
        Ok(Box::new(StdStream { stream }))
    }

    fn listen(&self, port: u16) -> io::Result<Box<dyn ListenerSocket>> {
        let listener = TcpListener::bind(SocketAddrV4::new(self.bind_address, port))?;
        Ok(Box::new(StdListener { listener }))
    }

    fn bind_datagram(&self, port: u16) -> io::Result<Box<dyn DatagramSocket>> {
        let socket = UdpSocket::bind(SocketAddrV4::new(self.bind_address, port))?;
        Ok(Box::new(StdDatagram { socket }))
    }
}

struct StdStream {
    stream: TcpStream,
}

impl StreamSocket for StdStream {
    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        self.stream.set_read_timeout(socket_timeout(timeout))?;
        loop {
            match self.stream.read(buf) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn send(&mut self, buf: &[u8], timeout: Option<Duration>) -> io::Result<usize> {
        self.stream.set_write_timeout(socket_timeout(timeout))?;
        self.stream.write_all(buf)?;
        Ok(buf.len())
    }

    fn peer_addr(&self) -> io::Result<SocketAddrV4> {
        v4(self.stream.peer_addr()?)
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct StdListener {
    listener: TcpListener,
}

impl StdListener {
    fn finish(stream: TcpStream, addr: SocketAddr) -> io::Result<(Box<dyn StreamSocket>, SocketAddrV4)> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        Ok((Box::new(StdStream { stream }), v4(addr)?))
    }
}

impl ListenerSocket for StdListener {
    fn accept(&mut self, timeout: Option<Duration>) -> io::Result<(Box<dyn StreamSocket>, SocketAddrV4)> {
        let Some(limit) = timeout else {
            self.listener.set_nonblocking(false)?;
            let (stream, addr) = self.listener.accept()?;
            return Self::finish(stream, addr);
        };

        // std has no accept timeout; poll a non-blocking listener instead.
        self.listener.set_nonblocking(true)?;
        let deadline = Instant::now() + limit;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => return Self::finish(stream, addr),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::from(ErrorKind::TimedOut));
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }
}

struct StdDatagram {
    socket: UdpSocket,
}

impl DatagramSocket for StdDatagram {
    fn send_to(&mut self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(buf, peer)
    }

    fn recv_from(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<(usize, SocketAddrV4)> {
        self.socket.set_read_timeout(socket_timeout(timeout))?;
        loop {
            match self.socket.recv_from(buf) {
                Ok((n, addr)) => return Ok((n, v4(addr)?)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }
}
