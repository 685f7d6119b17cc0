use crate::ack_system::{AckSystem, NotifyCallback, ReliableReceived};
use crate::batch;
use crate::config::Config;
use crate::error::Error;
use crate::metrics::Channel;
use crate::packet::{self, PacketType};
use crate::pool::BufferPool;
use crate::socket::SocketInfo;
use crate::SendMode;

use super::{HostContext, InvalidPacket};

/// Channels for an unreliable socket: the ack system provides notify and reliable delivery, and
/// unreliable messages go out one per packet behind a single type byte.
pub struct ReliableConnection {
    ack_system: AckSystem,
    buffer_pool: BufferPool,
    max_unreliable_size: usize,
    // Reassembly buffer for fragmented messages
    fragment_buffer: Vec<u8>,
}

impl ReliableConnection {
    pub fn new(config: &Config, info: &SocketInfo, buffer_pool: BufferPool, now_ms: u64) -> Self {
        let ack_system = AckSystem::new(config, info.max_unreliable_size, buffer_pool.clone(), now_ms);

        Self {
            ack_system,
            buffer_pool,
            max_unreliable_size: info.max_unreliable_size,
            fragment_buffer: Vec::new(),
        }
    }

    pub fn send_unreliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        let max = self.max_unreliable_size - 1;

        if message.len() > max {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                max,
            });
        }

        let mut buffer = self.buffer_pool.take();
        buffer[0] = PacketType::Unreliable.into();
        buffer[1..1 + message.len()].copy_from_slice(message);

        ctx.send_raw(&buffer[..1 + message.len()], SendMode::Unreliable);
        ctx.on_send_message(Channel::Unreliable, message.len());

        Ok(())
    }

    pub fn send_notify<C: HostContext>(
        &mut self,
        message: &[u8],
        callback: Box<dyn NotifyCallback>,
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.ack_system.send_notify(message, callback, now_ms, ctx)?;
        ctx.on_send_message(Channel::Notify, message.len());

        Ok(())
    }

    pub fn send_reliable<C: HostContext>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.ack_system.send_reliable(message, now_ms, ctx)?;
        ctx.on_send_message(Channel::Reliable, message.len());

        Ok(())
    }

    pub fn receive<C: HostContext>(
        &mut self,
        packet_type: PacketType,
        packet: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), InvalidPacket> {
        if packet.len() < packet::min_size(packet_type) {
            tracing::debug!(?packet_type, len = packet.len(), "dropping short packet");
            return Ok(());
        }

        match packet_type {
            PacketType::Unreliable => ctx.on_receive(Channel::Unreliable, &packet[1..]),
            PacketType::Notify => {
                if let Some(message) = self.ack_system.receive_notify(packet, now_ms, ctx) {
                    ctx.on_receive(Channel::Notify, message);
                }
            }
            PacketType::Reliable => {
                self.ack_system.receive_reliable(packet, false, now_ms, ctx);
                self.deliver_reliable(ctx)?;
            }
            PacketType::ReliableFragment => {
                if self.ack_system.invalid_fragment(packet) {
                    return Err(InvalidPacket);
                }

                self.ack_system.receive_reliable(packet, true, now_ms, ctx);
                self.deliver_reliable(ctx)?;
            }
            PacketType::Ack => self.ack_system.receive_ack(packet, now_ms, ctx),
            PacketType::Command | PacketType::KeepAlive => (),
        }

        Ok(())
    }

    pub fn update<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        self.ack_system.update(now_ms, ctx);
    }

    fn deliver_reliable<C: HostContext>(&mut self, ctx: &mut C) -> Result<(), InvalidPacket> {
        while let Some(received) = self.ack_system.next_reliable_packet() {
            if received.is_fragment() {
                self.reassemble(received)?;
                ctx.on_receive(Channel::Reliable, &self.fragment_buffer);
            } else {
                for message in batch::Messages::new(received.payload()) {
                    ctx.on_receive(Channel::Reliable, message.map_err(|_| InvalidPacket)?);
                }
            }
        }

        Ok(())
    }

    fn reassemble(&mut self, first: ReliableReceived) -> Result<(), InvalidPacket> {
        self.fragment_buffer.clear();
        self.fragment_buffer.extend_from_slice(first.payload());

        // Fragments of one message occupy consecutive orders, indices counting down to 0
        for expected_index in (0..first.fragment_index()).rev() {
            let fragment = self.ack_system.next_fragment().ok_or(InvalidPacket)?;

            if !fragment.is_fragment() || fragment.fragment_index() != expected_index {
                return Err(InvalidPacket);
            }

            self.fragment_buffer.extend_from_slice(fragment.payload());
        }

        Ok(())
    }
}
