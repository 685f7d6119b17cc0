use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time;

use super::ack_system::{NotifyCallback, NotifyToken};
use super::clock::{Clock, SystemClock};
use super::config::Config;
use super::connect_key::ConnectKey;
use super::connection::{self, Connection, ConnectionState, HostContext, RawConnection};
use super::error::{Error, Result};
use super::metrics::{Channel, Metrics};
use super::packet::{self, Command, DisconnectReason, PacketType, RejectReason};
use super::pool::BufferPool;
use super::socket::{Socket, SocketInfo};
use super::SendMode;

/// Receives every application message, on every channel, in the order it is delivered.
pub trait DataHandler {
    fn receive_message(&mut self, endpoint: SocketAddr, message: &[u8]);
}

impl<F> DataHandler for F
where
    F: FnMut(SocketAddr, &[u8]),
{
    fn receive_message(&mut self, endpoint: SocketAddr, message: &[u8]) {
        self(endpoint, message)
    }
}

/// Connection lifecycle events, returned by [`Peer::poll_event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A connection was established, in either direction.
    Connected(SocketAddr),
    /// An established connection ended.
    Disconnected(SocketAddr, DisconnectReason),
    /// An outgoing connection attempt failed.
    ConnectionFailed(SocketAddr, RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

struct PeerCore<S> {
    // Datagram transport
    socket: S,
    // Capabilities reported by the socket
    info: SocketInfo,
    // Saved configuration
    config: Config,
    // Source of millisecond timestamps
    clock: Box<dyn Clock>,
    // Sink for application messages
    handler: Box<dyn DataHandler>,
    // Datagram buffers shared by every connection
    buffer_pool: BufferPool,
    // Digest sent with, and required of, connect requests
    key: ConnectKey,
    // Queue of pending events
    events: VecDeque<Event>,
    // Connections that asked to be removed during this update
    to_remove: Vec<SocketAddr>,
    // Traffic counters, when enabled
    metrics: Option<Metrics>,
}

impl<S: Socket> PeerCore<S> {
    fn send_raw(&mut self, endpoint: &SocketAddr, packet: &[u8], mode: SendMode) {
        tracing::trace!(%endpoint, len = packet.len(), "sending packet");
        self.socket.send(endpoint, packet, mode);

        if let Some(metrics) = self.metrics.as_mut() {
            metrics.record_send(packet.len());
        }
    }

    fn send_unconnected(&mut self, endpoint: &SocketAddr, packet: &[u8]) {
        tracing::trace!(%endpoint, len = packet.len(), "sending unconnected packet");
        self.socket.send(endpoint, packet, SendMode::Unreliable);

        if let Some(metrics) = self.metrics.as_mut() {
            metrics.record_send_unconnected(packet.len());
        }
    }

    fn new_connection(&self, endpoint: SocketAddr, now_ms: u64) -> Connection {
        Connection::new(
            endpoint,
            &self.config,
            &self.info,
            self.buffer_pool.clone(),
            now_ms,
        )
    }
}

struct ConnectionContext<'a, S> {
    core: &'a mut PeerCore<S>,
    endpoint: SocketAddr,
}

impl<'a, S> ConnectionContext<'a, S> {
    fn new(core: &'a mut PeerCore<S>, endpoint: SocketAddr) -> Self {
        Self { core, endpoint }
    }
}

impl<'a, S: Socket> RawConnection for ConnectionContext<'a, S> {
    fn send_raw(&mut self, packet: &[u8], mode: SendMode) {
        self.core.send_raw(&self.endpoint, packet, mode);
    }

    fn on_resend(&mut self, len: usize) {
        if let Some(metrics) = self.core.metrics.as_mut() {
            metrics.record_resend(len);
        }
    }
}

impl<'a, S: Socket> HostContext for ConnectionContext<'a, S> {
    fn on_connected(&mut self) {
        self.core.events.push_back(Event::Connected(self.endpoint));
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.core
            .events
            .push_back(Event::Disconnected(self.endpoint, reason));
    }

    fn on_connect_failed(&mut self, reason: RejectReason) {
        self.core
            .events
            .push_back(Event::ConnectionFailed(self.endpoint, reason));
    }

    fn on_send_message(&mut self, channel: Channel, len: usize) {
        if let Some(metrics) = self.core.metrics.as_mut() {
            metrics.record_send_message(channel, len);
        }
    }

    fn on_receive(&mut self, channel: Channel, message: &[u8]) {
        if let Some(metrics) = self.core.metrics.as_mut() {
            metrics.record_receive_message(channel, message.len());
        }

        self.core.handler.receive_message(self.endpoint, message);
    }

    fn remove_self(&mut self) {
        self.core.to_remove.push(self.endpoint);
    }
}

/// Owns a socket and every connection made through it.
///
/// A peer either listens for connections ([`Peer::bind`]) or makes one ([`Peer::connect`]).
/// Nothing happens in the background: call [`Peer::update`] regularly to receive packets, resend
/// what was lost and keep connections alive.
pub struct Peer<S: Socket> {
    core: PeerCore<S>,
    // Table of connections by remote address
    connections: HashMap<SocketAddr, Connection>,
    // Always-allocated receive buffer
    receive_buffer: Box<[u8]>,
    role: Option<Role>,
}

impl<S: Socket> Peer<S> {
    /// Equivalent to calling [`Peer::with_clock`] with a [`SystemClock`].
    pub fn new<H>(socket: S, handler: H, config: Config) -> Self
    where
        H: DataHandler + 'static,
    {
        Self::with_clock(socket, handler, config, SystemClock::new())
    }

    /// Creates an inactive peer. Panics if `config` is invalid.
    pub fn with_clock<H, K>(socket: S, handler: H, config: Config, clock: K) -> Self
    where
        H: DataHandler + 'static,
        K: Clock + 'static,
    {
        config.validate();

        let info = socket.info();
        let max_packet_size = info.max_packet_size();

        let buffer_pool = BufferPool::with_buffer_size(
            max_packet_size,
            config.buffer_pool_start_size,
            config.buffer_pool_max_size,
        );

        let key = ConnectKey::new(&config.key);

        Self {
            core: PeerCore {
                socket,
                info,
                config,
                clock: Box::new(clock),
                handler: Box::new(handler),
                buffer_pool,
                key,
                events: VecDeque::new(),
                to_remove: Vec::new(),
                metrics: None,
            },
            connections: HashMap::new(),
            receive_buffer: vec![0; max_packet_size].into_boxed_slice(),
            role: None,
        }
    }

    /// Starts listening for connections on `addr`.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyActive);
        }

        self.core.socket.bind(addr)?;
        self.role = Some(Role::Server);

        tracing::info!(%addr, "listening");

        Ok(())
    }

    /// Starts connecting to the peer listening at `addr`. The outcome is reported as an
    /// [`Event::Connected`] or [`Event::ConnectionFailed`].
    pub fn connect(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.role.is_some() {
            return Err(Error::AlreadyActive);
        }

        self.core.socket.connect(addr)?;
        self.role = Some(Role::Client);

        tracing::info!(%addr, "connecting");

        let now_ms = self.core.clock.now_ms();

        let mut connection = self.core.new_connection(addr, now_ms);
        let key = self.core.key.clone();

        let ref mut ctx = ConnectionContext::new(&mut self.core, addr);
        connection.connect(&key, now_ms, ctx);

        self.connections.insert(addr, connection);

        Ok(addr)
    }

    /// Disconnects every connection, telling the remote side, and closes the socket. Every
    /// connection is destroyed immediately.
    pub fn close(&mut self) -> Result<()> {
        if self.role.is_none() {
            return Err(Error::NotActive);
        }

        let now_ms = self.core.clock.now_ms();

        for connection in self.connections.values_mut() {
            let ref mut ctx = ConnectionContext::new(&mut self.core, connection.endpoint());
            connection.disconnect(DisconnectReason::RequestedByLocalPeer, true, now_ms, ctx);
        }

        for (_, mut connection) in self.connections.drain() {
            if connection.state() != ConnectionState::Destroyed {
                connection.destroy();
            }
        }

        self.core.to_remove.clear();
        self.core.socket.close();
        self.role = None;

        tracing::info!("closed");

        Ok(())
    }

    /// Receives every datagram waiting on the socket, then updates every connection.
    pub fn update(&mut self) {
        if self.role.is_none() {
            return;
        }

        let now_ms = self.core.clock.now_ms();

        if let Some(metrics) = self.core.metrics.as_mut() {
            metrics.record_tick(self.connections.len());
        }

        self.receive_packets(now_ms);

        for connection in self.connections.values_mut() {
            let ref mut ctx = ConnectionContext::new(&mut self.core, connection.endpoint());
            connection.update(now_ms, ctx);
        }

        self.remove_connections();
    }

    /// Blocks until a datagram may be available, or `timeout` elapses.
    pub fn wait_for_packets(&mut self, timeout: time::Duration) -> Result<()> {
        self.core.socket.wait(Some(timeout))?;
        Ok(())
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.core.events.pop_front()
    }

    /// Returns a handle for sending to, or disconnecting, the given endpoint.
    pub fn connection(&mut self, endpoint: SocketAddr) -> Option<ConnectionMut<'_, S>> {
        let connection = self.connections.get_mut(&endpoint)?;

        Some(ConnectionMut {
            core: &mut self.core,
            connection,
        })
    }

    /// Disconnects the given endpoint, telling the remote side.
    pub fn disconnect(&mut self, endpoint: SocketAddr) -> Result<()> {
        self.connection(endpoint)
            .ok_or(Error::UnknownConnection(endpoint))?
            .disconnect();

        Ok(())
    }

    pub fn connection_state(&self, endpoint: SocketAddr) -> Option<ConnectionState> {
        self.connections.get(&endpoint).map(Connection::state)
    }

    /// Number of connections in the table, including disconnected ones not yet removed.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.socket.local_addr()
    }

    /// Starts recording traffic into `metrics`, replacing any previous recording.
    pub fn enable_metrics(&mut self, metrics: Metrics) {
        self.core.metrics = Some(metrics);
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.core.metrics.as_ref()
    }

    fn receive_packets(&mut self, now_ms: u64) {
        while self.core.socket.poll() {
            let (len, sender) = match self.core.socket.receive(&mut self.receive_buffer) {
                Ok(datagram) => datagram,
                Err(err) => {
                    tracing::warn!(%err, "socket receive failed");
                    break;
                }
            };

            let packet = &self.receive_buffer[..len];

            Self::handle_packet(
                &mut self.core,
                &mut self.connections,
                self.role,
                packet,
                sender,
                now_ms,
            );
        }
    }

    fn handle_packet(
        core: &mut PeerCore<S>,
        connections: &mut HashMap<SocketAddr, Connection>,
        role: Option<Role>,
        packet: &[u8],
        sender: SocketAddr,
        now_ms: u64,
    ) {
        if let Some(metrics) = core.metrics.as_mut() {
            if connections.contains_key(&sender) {
                metrics.record_receive(packet.len());
            } else {
                metrics.record_receive_unconnected(packet.len());
            }
        }

        let Some(packet_type) = packet::read_type(packet) else {
            tracing::debug!(%sender, len = packet.len(), "dropping malformed packet");
            return;
        };

        if let Some(connection) = connections.get_mut(&sender) {
            let ref mut ctx = ConnectionContext::new(core, sender);
            connection.receive_packet(packet_type, packet, now_ms, ctx);
        } else if role == Some(Role::Server) {
            Self::handle_new_endpoint(core, connections, packet, sender, now_ms);
        } else {
            tracing::debug!(%sender, "dropping packet from unknown endpoint");
        }
    }

    fn handle_new_endpoint(
        core: &mut PeerCore<S>,
        connections: &mut HashMap<SocketAddr, Connection>,
        packet: &[u8],
        sender: SocketAddr,
        now_ms: u64,
    ) {
        // Nothing is allocated for an endpoint until it sends a valid connect request
        if !connection::is_connect_request(packet) {
            tracing::debug!(%sender, "dropping packet from unknown endpoint");
            return;
        }

        if !core.key.validate(connection::connect_request_key(packet)) {
            tracing::debug!(%sender, "dropping connect request with wrong key");
            return;
        }

        if connections.len() >= core.config.max_connections {
            tracing::debug!(%sender, "rejecting connect request, server full");

            let rejection: [u8; 3] = [
                PacketType::Command.into(),
                Command::ConnectionRejected.into(),
                RejectReason::ServerFull.into(),
            ];
            core.send_unconnected(&sender, &rejection);
            return;
        }

        tracing::info!(%sender, "accepting connection");

        let mut connection = core.new_connection(sender, now_ms);

        let ref mut ctx = ConnectionContext::new(core, sender);
        connection.accept(now_ms, ctx);

        connections.insert(sender, connection);
    }

    fn remove_connections(&mut self) {
        for endpoint in self.core.to_remove.drain(..) {
            if let Some(mut connection) = self.connections.remove(&endpoint) {
                connection.destroy();

                tracing::debug!(%endpoint, "removed connection");
            }
        }
    }
}

/// A connection borrowed from its [`Peer`].
pub struct ConnectionMut<'a, S> {
    core: &'a mut PeerCore<S>,
    connection: &'a mut Connection,
}

impl<'a, S: Socket> ConnectionMut<'a, S> {
    pub fn endpoint(&self) -> SocketAddr {
        self.connection.endpoint()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Sends a message that may be lost, duplicated or reordered.
    pub fn send_unreliable(&mut self, message: &[u8]) -> Result<()> {
        let now_ms = self.core.clock.now_ms();
        let endpoint = self.connection.endpoint();

        let ref mut ctx = ConnectionContext::new(self.core, endpoint);
        self.connection.send_unreliable(message, now_ms, ctx)
    }

    /// Sends a message whose delivery is reported through the returned token.
    pub fn send_notify(&mut self, message: &[u8]) -> Result<NotifyToken> {
        let token = NotifyToken::new();

        self.send_notify_with(message, token.clone())?;

        Ok(token)
    }

    /// Sends a message whose delivery is reported to `callback`.
    pub fn send_notify_with<N>(&mut self, message: &[u8], callback: N) -> Result<()>
    where
        N: NotifyCallback + 'static,
    {
        let now_ms = self.core.clock.now_ms();
        let endpoint = self.connection.endpoint();

        let ref mut ctx = ConnectionContext::new(self.core, endpoint);
        self.connection
            .send_notify(message, Box::new(callback), now_ms, ctx)
    }

    /// Queues a message for reliable, ordered delivery.
    pub fn send_reliable(&mut self, message: &[u8]) -> Result<()> {
        let now_ms = self.core.clock.now_ms();
        let endpoint = self.connection.endpoint();

        let ref mut ctx = ConnectionContext::new(self.core, endpoint);
        self.connection.send_reliable(message, now_ms, ctx)
    }

    /// Disconnects, telling the remote side. The connection lingers in
    /// [`ConnectionState::Disconnected`] for a while before it is removed.
    pub fn disconnect(&mut self) {
        let now_ms = self.core.clock.now_ms();
        let endpoint = self.connection.endpoint();

        let ref mut ctx = ConnectionContext::new(self.core, endpoint);
        self.connection
            .disconnect(DisconnectReason::RequestedByLocalPeer, true, now_ms, ctx);
    }
}
