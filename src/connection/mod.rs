use std::net::SocketAddr;

use super::ack_system::NotifyCallback;
use super::config::Config;
use super::connect_key::{ConnectKey, KEY_SIZE};
use super::error::Error;
use super::metrics::Channel;
use super::packet::{self, Command, DisconnectReason, PacketType, RejectReason};
use super::pool::BufferPool;
use super::socket::{SocketInfo, SocketReliability};
use super::SendMode;

mod no_reliable;
mod passthrough;
mod reliable;
mod trackers;

use no_reliable::NoReliableConnection;
use passthrough::PassthroughConnection;
use reliable::ReliableConnection;
use trackers::{ConnectingTracker, DisconnectedTracker, KeepAliveTracker, TimeoutTracker};

/// Length of a connect request: command header and key digest.
pub const CONNECT_REQUEST_SIZE: usize = packet::COMMAND_HEADER_SIZE + KEY_SIZE;

pub trait RawConnection {
    // Called to send a datagram to the remote host. Every outgoing byte passes through here.
    fn send_raw(&mut self, packet: &[u8], mode: SendMode);

    // Called after a reliable packet reported lost has been sent again
    fn on_resend(&mut self, len: usize);
}

pub trait HostContext: RawConnection {
    // Called when the connection has been established
    fn on_connected(&mut self);

    // Called when an established connection has ended
    fn on_disconnected(&mut self, reason: DisconnectReason);

    // Called when a connection attempt has failed
    fn on_connect_failed(&mut self, reason: RejectReason);

    // Called for each application message accepted for sending
    fn on_send_message(&mut self, channel: Channel, len: usize);

    // Called for each application message received from the remote host
    fn on_receive(&mut self, channel: Channel, message: &[u8]);

    // Called when the connection object itself should be removed
    fn remove_self(&mut self);
}

/// Lifecycle of a connection. States only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    Disconnected,
    Removing,
    Destroyed,
}

impl ConnectionState {
    fn can_move_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match next {
            Created => false,
            Connecting => self == Created,
            Connected => matches!(self, Created | Connecting),
            Disconnected => self == Connected,
            Removing => matches!(self, Created | Connecting | Connected | Disconnected),
            Destroyed => self == Removing,
        }
    }
}

/// Returned by channel strategies when the remote sent data that corrupts a stream.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidPacket;

/// Channel implementation, chosen by what the socket already guarantees.
enum Channels {
    Reliable(ReliableConnection),
    NoReliable(NoReliableConnection),
    Passthrough(PassthroughConnection),
}

impl Channels {
    fn new(config: &Config, info: &SocketInfo, pool: BufferPool, now_ms: u64) -> Self {
        match info.reliability {
            SocketReliability::Unreliable => {
                Self::Reliable(ReliableConnection::new(config, info, pool, now_ms))
            }
            SocketReliability::Reliable => Self::NoReliable(NoReliableConnection::new(info)),
            SocketReliability::Both => {
                Self::Passthrough(PassthroughConnection::new(config, info, pool, now_ms))
            }
        }
    }

    fn send_unreliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        match self {
            Self::Reliable(c) => c.send_unreliable(message, ctx),
            Self::NoReliable(c) => c.send_unreliable(message, ctx),
            Self::Passthrough(c) => c.send_unreliable(message, ctx),
        }
    }

    fn send_notify<C: HostContext>(
        &mut self,
        message: &[u8],
        callback: Box<dyn NotifyCallback>,
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        match self {
            Self::Reliable(c) => c.send_notify(message, callback, now_ms, ctx),
            Self::NoReliable(c) => c.send_notify(message, callback, ctx),
            Self::Passthrough(c) => c.send_notify(message, callback, now_ms, ctx),
        }
    }

    fn send_reliable<C: HostContext>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        match self {
            Self::Reliable(c) => c.send_reliable(message, now_ms, ctx),
            Self::NoReliable(c) => c.send_reliable(message, ctx),
            Self::Passthrough(c) => c.send_reliable(message, ctx),
        }
    }

    fn receive<C: HostContext>(
        &mut self,
        packet_type: PacketType,
        packet: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), InvalidPacket> {
        match self {
            Self::Reliable(c) => c.receive(packet_type, packet, now_ms, ctx),
            Self::NoReliable(c) => c.receive(packet_type, packet, ctx),
            Self::Passthrough(c) => c.receive(packet_type, packet, now_ms, ctx),
        }
    }

    fn update<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        match self {
            Self::Reliable(c) => c.update(now_ms, ctx),
            Self::NoReliable(c) => c.update(ctx),
            Self::Passthrough(c) => c.update(now_ms, ctx),
        }
    }
}

/// Forwards to the host context, noting whether anything was sent.
struct SendTracking<'c, C> {
    ctx: &'c mut C,
    sent: bool,
}

impl<'c, C: HostContext> RawConnection for SendTracking<'c, C> {
    fn send_raw(&mut self, packet: &[u8], mode: SendMode) {
        self.sent = true;
        self.ctx.send_raw(packet, mode);
    }

    fn on_resend(&mut self, len: usize) {
        self.ctx.on_resend(len);
    }
}

impl<'c, C: HostContext> HostContext for SendTracking<'c, C> {
    fn on_connected(&mut self) {
        self.ctx.on_connected();
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.ctx.on_disconnected(reason);
    }

    fn on_connect_failed(&mut self, reason: RejectReason) {
        self.ctx.on_connect_failed(reason);
    }

    fn on_send_message(&mut self, channel: Channel, len: usize) {
        self.ctx.on_send_message(channel, len);
    }

    fn on_receive(&mut self, channel: Channel, message: &[u8]) {
        self.ctx.on_receive(channel, message);
    }

    fn remove_self(&mut self) {
        self.ctx.remove_self();
    }
}

/// One remote endpoint: the connection state machine and its channels.
pub struct Connection {
    endpoint: SocketAddr,
    state: ConnectionState,

    connecting: ConnectingTracker,
    timeout: TimeoutTracker,
    keep_alive: KeepAliveTracker,
    disconnected: DisconnectedTracker,

    // Sent with every connect attempt
    connect_request: Option<[u8; CONNECT_REQUEST_SIZE]>,

    channels: Channels,
}

impl Connection {
    pub fn new(
        endpoint: SocketAddr,
        config: &Config,
        info: &SocketInfo,
        pool: BufferPool,
        now_ms: u64,
    ) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Created,
            connecting: ConnectingTracker::new(
                config.connect_attempt_interval_ms,
                config.max_connect_attempts,
            ),
            timeout: TimeoutTracker::new(config.timeout_duration_ms, now_ms),
            keep_alive: KeepAliveTracker::new(config.keep_alive_interval_ms, now_ms),
            disconnected: DisconnectedTracker::new(config.disconnect_duration_ms),
            connect_request: None,
            channels: Channels::new(config, info, pool, now_ms),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_move_to(next) {
            tracing::warn!(
                endpoint = %self.endpoint,
                from = ?self.state,
                to = ?next,
                "illegal connection state transition"
            );
            debug_assert!(false, "illegal transition {:?} -> {:?}", self.state, next);
            return false;
        }

        tracing::debug!(endpoint = %self.endpoint, from = ?self.state, to = ?next, "connection state");

        self.state = next;
        true
    }

    fn tracking<C, T, F>(&mut self, now_ms: u64, ctx: &mut C, f: F) -> T
    where
        C: HostContext,
        F: FnOnce(&mut Self, &mut SendTracking<'_, C>) -> T,
    {
        let mut tracking = SendTracking { ctx, sent: false };

        let result = f(self, &mut tracking);

        if tracking.sent {
            self.keep_alive.set_send_time(now_ms);
        }

        result
    }

    /// Starts connecting to the remote endpoint, sending the first request immediately.
    pub fn connect<C: HostContext>(&mut self, key: &ConnectKey, now_ms: u64, ctx: &mut C) {
        if !self.set_state(ConnectionState::Connecting) {
            return;
        }

        let mut request = [0u8; CONNECT_REQUEST_SIZE];
        let mut writer = packet::Writer::new(&mut request);
        writer.write_u8(PacketType::Command.into());
        writer.write_u8(Command::ConnectRequest.into());
        writer.write_slice(key.digest());

        self.connect_request = Some(request);

        self.tracking(now_ms, ctx, |this, ctx| this.update_connecting(now_ms, ctx));
    }

    /// Accepts a connection requested by the remote endpoint.
    pub fn accept<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        self.tracking(now_ms, ctx, |this, ctx| {
            if this.set_state(ConnectionState::Connected) {
                this.send_command(Command::ConnectionAccepted, None, ctx);
                ctx.on_connected();
            }
        });
    }

    pub fn update<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        self.tracking(now_ms, ctx, |this, ctx| match this.state {
            ConnectionState::Connecting => this.update_connecting(now_ms, ctx),
            ConnectionState::Connected => this.update_connected(now_ms, ctx),
            ConnectionState::Disconnected => this.update_disconnected(now_ms, ctx),
            _ => (),
        });

        if self.state == ConnectionState::Connected && self.keep_alive.time_to_send(now_ms) {
            self.send_keep_alive(now_ms, ctx);
        }
    }

    fn update_connecting<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        if !self.connecting.time_to_attempt(now_ms) {
            return;
        }

        if self.connecting.max_attempts_reached() {
            self.fail_to_connect(RejectReason::Timeout, ctx);
            return;
        }

        if let Some(request) = self.connect_request {
            self.connecting.on_attempt(now_ms);

            tracing::debug!(
                endpoint = %self.endpoint,
                attempt = self.connecting.attempts(),
                "sending connect request"
            );

            ctx.send_raw(&request, SendMode::Unreliable);
        }
    }

    fn update_connected<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        if self.timeout.timed_out(now_ms) {
            self.disconnect_inner(DisconnectReason::Timeout, false, now_ms, ctx);
            return;
        }

        self.channels.update(now_ms, ctx);
    }

    fn update_disconnected<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        if self.disconnected.time_to_remove(now_ms) && self.set_state(ConnectionState::Removing) {
            ctx.remove_self();
        }
    }

    fn send_keep_alive<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        tracing::trace!(endpoint = %self.endpoint, "sending keep-alive");

        ctx.send_raw(&[u8::from(PacketType::KeepAlive)], SendMode::Unreliable);
        self.keep_alive.set_send_time(now_ms);
    }

    fn send_command<C: HostContext>(&self, command: Command, extra: Option<u8>, ctx: &mut C) {
        let command_packet = [PacketType::Command.into(), command.into(), extra.unwrap_or(0)];

        let length = packet::COMMAND_HEADER_SIZE + extra.is_some() as usize;

        ctx.send_raw(&command_packet[..length], SendMode::Unreliable);
    }

    fn fail_to_connect<C: HostContext>(&mut self, reason: RejectReason, ctx: &mut C) {
        if self.state != ConnectionState::Connecting {
            return;
        }

        tracing::info!(endpoint = %self.endpoint, ?reason, "connection failed");

        if self.set_state(ConnectionState::Removing) {
            ctx.on_connect_failed(reason);
            ctx.remove_self();
        }
    }

    /// Ends the connection. The host hears about it exactly once, however the disconnect was
    /// triggered. A connection still connecting fails with [`RejectReason::ClosedByPeer`].
    pub fn disconnect<C: HostContext>(
        &mut self,
        reason: DisconnectReason,
        notify_remote: bool,
        now_ms: u64,
        ctx: &mut C,
    ) {
        self.tracking(now_ms, ctx, |this, ctx| {
            this.disconnect_inner(reason, notify_remote, now_ms, ctx)
        });
    }

    fn disconnect_inner<C: HostContext>(
        &mut self,
        reason: DisconnectReason,
        notify_remote: bool,
        now_ms: u64,
        ctx: &mut C,
    ) {
        match self.state {
            ConnectionState::Connecting => self.fail_to_connect(RejectReason::ClosedByPeer, ctx),
            ConnectionState::Connected => {
                tracing::info!(endpoint = %self.endpoint, ?reason, "disconnected");

                if notify_remote {
                    self.send_command(Command::Disconnect, Some(reason.into()), ctx);
                }

                self.set_state(ConnectionState::Disconnected);
                self.disconnected.on_disconnect(now_ms);

                ctx.on_disconnected(reason);
            }
            _ => {
                tracing::debug!(endpoint = %self.endpoint, state = ?self.state, "ignoring disconnect");
            }
        }
    }

    /// Moves the connection to its final state, releasing nothing further to the host.
    pub fn destroy(&mut self) {
        if self.state != ConnectionState::Removing {
            self.set_state(ConnectionState::Removing);
        }

        self.set_state(ConnectionState::Destroyed);
    }

    /// Handles a packet from the remote endpoint. `packet_type` has been read and the packet
    /// checked against its minimum length.
    pub fn receive_packet<C: HostContext>(
        &mut self,
        packet_type: PacketType,
        packet: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) {
        match self.state {
            ConnectionState::Created | ConnectionState::Connecting | ConnectionState::Connected => (),
            _ => return,
        }

        tracing::trace!(endpoint = %self.endpoint, ?packet_type, len = packet.len(), "received packet");

        self.timeout.set_receive_time(now_ms);

        self.tracking(now_ms, ctx, |this, ctx| match packet_type {
            PacketType::Command => this.handle_command(packet, now_ms, ctx),
            PacketType::KeepAlive => (),
            _ => {
                // Only an accepted connection is sent data, so the accept itself was lost
                if this.state == ConnectionState::Connecting {
                    this.set_connected(ctx);
                }

                if this.state != ConnectionState::Connected {
                    tracing::debug!(
                        endpoint = %this.endpoint,
                        ?packet_type,
                        "dropping data packet before connected"
                    );
                    return;
                }

                if this.channels.receive(packet_type, packet, now_ms, ctx).is_err() {
                    tracing::debug!(endpoint = %this.endpoint, ?packet_type, "invalid packet");
                    this.disconnect_inner(DisconnectReason::InvalidPacket, true, now_ms, ctx);
                }
            }
        });
    }

    fn handle_command<C: HostContext>(&mut self, packet: &[u8], now_ms: u64, ctx: &mut C) {
        let mut reader = packet::Reader::at(packet, 1);

        let Some(command) = reader.read_u8().and_then(|c| Command::try_from(c).ok()) else {
            tracing::debug!(endpoint = %self.endpoint, "dropping unknown command");
            return;
        };

        match command {
            Command::ConnectRequest => {
                // Our accept was lost, the remote is still trying
                if self.state == ConnectionState::Connected {
                    self.send_command(Command::ConnectionAccepted, None, ctx);
                }
            }
            Command::ConnectionAccepted => match self.state {
                ConnectionState::Connecting => self.set_connected(ctx),
                ConnectionState::Connected => (),
                _ => {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        state = ?self.state,
                        "connection accepted in unexpected state"
                    );
                }
            },
            Command::ConnectionRejected => {
                let Some(reason) = reader.read_u8() else {
                    return;
                };

                let reason = RejectReason::try_from(reason).unwrap_or(RejectReason::None);

                self.fail_to_connect(reason, ctx);
            }
            Command::Disconnect => {
                let Some(reason) = reader.read_u8() else {
                    return;
                };

                if self.state == ConnectionState::Connected {
                    let reason = DisconnectReason::from_remote(reason);
                    self.disconnect_inner(reason, false, now_ms, ctx);
                }
            }
        }
    }

    fn set_connected<C: HostContext>(&mut self, ctx: &mut C) {
        tracing::info!(endpoint = %self.endpoint, "connected");

        if self.set_state(ConnectionState::Connected) {
            ctx.on_connected();
        }
    }

    /// Sends are accepted once connecting has started. Reliable batches wait for the connection
    /// to be accepted before they are flushed.
    fn check_connected(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    pub fn send_unreliable<C: HostContext>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.check_connected()?;

        self.tracking(now_ms, ctx, |this, ctx| this.channels.send_unreliable(message, ctx))
    }

    pub fn send_notify<C: HostContext>(
        &mut self,
        message: &[u8],
        callback: Box<dyn NotifyCallback>,
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.check_connected()?;

        self.tracking(now_ms, ctx, |this, ctx| {
            this.channels.send_notify(message, callback, now_ms, ctx)
        })
    }

    pub fn send_reliable<C: HostContext>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.check_connected()?;

        self.tracking(now_ms, ctx, |this, ctx| {
            this.channels.send_reliable(message, now_ms, ctx)
        })
    }
}

/// Checks a command from an unknown endpoint: a connect request long enough to carry a key.
pub fn is_connect_request(packet: &[u8]) -> bool {
    packet.len() >= CONNECT_REQUEST_SIZE
        && packet[0] == u8::from(PacketType::Command)
        && packet[1] == u8::from(Command::ConnectRequest)
}

/// Key digest of a packet that passed [`is_connect_request`].
pub fn connect_request_key(packet: &[u8]) -> &[u8] {
    &packet[packet::COMMAND_HEADER_SIZE..CONNECT_REQUEST_SIZE]
}
