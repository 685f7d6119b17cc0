use std::io;
use std::net;
use std::time;

use super::SendMode;

const SOCKET_POLLING_KEY: usize = 0;

/// Largest UDP payload that avoids fragmentation on common paths.
pub const UDP_MTU: usize = 1200;

/// Delivery guarantees offered by a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketReliability {
    /// Datagrams may be lost, duplicated or reordered (e.g. UDP)
    Unreliable,
    /// Every datagram is delivered once and in order
    Reliable,
    /// Both modes are available, selected per send
    Both,
}

/// Capabilities reported by a [`Socket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketInfo {
    pub reliability: SocketReliability,
    /// Largest datagram accepted by unreliable sends.
    pub max_unreliable_size: usize,
    /// Largest datagram accepted by reliable sends.
    pub max_reliable_size: usize,
}

impl SocketInfo {
    pub fn udp() -> Self {
        Self {
            reliability: SocketReliability::Unreliable,
            max_unreliable_size: UDP_MTU,
            max_reliable_size: UDP_MTU,
        }
    }

    /// Size of the largest datagram either mode can produce.
    pub fn max_packet_size(&self) -> usize {
        self.max_unreliable_size.max(self.max_reliable_size)
    }
}

/// A non-blocking datagram socket driven by a [`Peer`](crate::Peer).
pub trait Socket {
    fn info(&self) -> SocketInfo;

    /// Starts listening on the given address.
    fn bind(&mut self, addr: net::SocketAddr) -> io::Result<()>;

    /// Prepares to exchange datagrams with a single remote address.
    fn connect(&mut self, addr: net::SocketAddr) -> io::Result<()>;

    fn close(&mut self);

    /// Returns true if a datagram can be read by [`Socket::receive`] without blocking.
    fn poll(&mut self) -> bool;

    /// Copies the next datagram into `buffer`, returning its length and sender.
    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<(usize, net::SocketAddr)>;

    /// Sends a datagram. Failures are not reported; the protocol treats them as loss.
    fn send(&mut self, addr: &net::SocketAddr, packet: &[u8], mode: SendMode);

    /// Blocks for up to `timeout` until a datagram may be ready.
    fn wait(&mut self, timeout: Option<time::Duration>) -> io::Result<()> {
        let _ = timeout;
        Ok(())
    }

    fn local_addr(&self) -> Option<net::SocketAddr> {
        None
    }
}

struct Bound {
    // Non-blocking socket
    socket: net::UdpSocket,
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
}

/// [`Socket`] over a non-blocking UDP socket.
pub struct UdpSocket {
    bound: Option<Bound>,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
    // Datagram read by poll() and not yet handed out
    pending: Option<(usize, net::SocketAddr)>,
}

impl UdpSocket {
    pub fn new() -> Self {
        Self {
            bound: None,
            recv_buffer: vec![0; UDP_MTU].into_boxed_slice(),
            pending: None,
        }
    }

    fn open(&mut self, bind_addr: net::SocketAddr) -> io::Result<()> {
        let socket = net::UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        tracing::debug!(local_addr = ?socket.local_addr().ok(), "opened udp socket");

        self.bound = Some(Bound {
            socket,
            poller,
            poller_events: polling::Events::new(),
        });
        self.pending = None;

        Ok(())
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for UdpSocket {
    fn info(&self) -> SocketInfo {
        SocketInfo::udp()
    }

    fn bind(&mut self, addr: net::SocketAddr) -> io::Result<()> {
        self.open(addr)
    }

    fn connect(&mut self, addr: net::SocketAddr) -> io::Result<()> {
        let any: net::SocketAddr = match addr {
            net::SocketAddr::V4(_) => (net::Ipv4Addr::UNSPECIFIED, 0).into(),
            net::SocketAddr::V6(_) => (net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        self.open(any)
    }

    fn close(&mut self) {
        if let Some(bound) = self.bound.take() {
            let _ = bound.poller.delete(&bound.socket);
        }
        self.pending = None;
    }

    fn poll(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }

        let Some(bound) = self.bound.as_ref() else {
            return false;
        };

        match bound.socket.recv_from(&mut self.recv_buffer) {
            Ok(datagram) => {
                self.pending = Some(datagram);
                true
            }
            Err(err) => {
                // The only expected error is WouldBlock, indicating no datagram
                if err.kind() != io::ErrorKind::WouldBlock {
                    tracing::warn!(%err, "udp receive failed");
                }
                false
            }
        }
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<(usize, net::SocketAddr)> {
        if !self.poll() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let (len, addr) = self.pending.take().ok_or(io::ErrorKind::WouldBlock)?;
        let len = len.min(buffer.len());

        buffer[..len].copy_from_slice(&self.recv_buffer[..len]);

        Ok((len, addr))
    }

    fn send(&mut self, addr: &net::SocketAddr, packet: &[u8], _mode: SendMode) {
        if let Some(bound) = self.bound.as_ref() {
            let _ = bound.socket.send_to(packet, addr);
        }
    }

    fn wait(&mut self, timeout: Option<time::Duration>) -> io::Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        if let Some(bound) = self.bound.as_mut() {
            // Wait for a readable event (must be done prior to each wait() call)
            bound
                .poller
                .modify(&bound.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

            bound.poller_events.clear();
            bound.poller.wait(&mut bound.poller_events, timeout)?;
        } else if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }

        Ok(())
    }

    fn local_addr(&self) -> Option<net::SocketAddr> {
        self.bound.as_ref()?.socket.local_addr().ok()
    }
}
