use crate::ack_system::{AckSystem, NotifyCallback};
use crate::batch::{Batch, Messages};
use crate::config::Config;
use crate::error::Error;
use crate::metrics::Channel;
use crate::packet::{self, PacketType};
use crate::pool::BufferPool;
use crate::socket::SocketInfo;
use crate::SendMode;

use super::{HostContext, InvalidPacket};

/// Channels for a socket offering both reliable and unreliable sends. Reliable and unreliable
/// messages are batched onto the matching socket mode; notify still runs through an ack system
/// so that losses can be reported.
pub struct PassthroughConnection {
    reliable_batch: Batch,
    unreliable_batch: Batch,
    ack_system: AckSystem,
}

impl PassthroughConnection {
    pub fn new(config: &Config, info: &SocketInfo, buffer_pool: BufferPool, now_ms: u64) -> Self {
        Self {
            reliable_batch: Batch::new(
                info.max_reliable_size,
                PacketType::Reliable,
                SendMode::Reliable,
            ),
            unreliable_batch: Batch::new(
                info.max_unreliable_size,
                PacketType::Unreliable,
                SendMode::Unreliable,
            ),
            ack_system: AckSystem::new(config, info.max_unreliable_size, buffer_pool, now_ms),
        }
    }

    fn add_to_batch<C: HostContext>(
        batch: &mut Batch,
        channel: Channel,
        message: &[u8],
        ctx: &mut C,
    ) -> Result<(), Error> {
        let max = batch.max_message_size();

        if message.len() > max {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                max,
            });
        }

        batch.add_message(message, ctx);
        ctx.on_send_message(channel, message.len());

        Ok(())
    }

    pub fn send_unreliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        Self::add_to_batch(&mut self.unreliable_batch, Channel::Unreliable, message, ctx)
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

    pub fn send_reliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        Self::add_to_batch(&mut self.reliable_batch, Channel::Reliable, message, ctx)
    }

    pub fn receive<C: HostContext>(
        &mut self,
        packet_type: PacketType,
        packet: &[u8],
        now_ms: u64,
        ctx: &mut C,
    ) -> Result<(), InvalidPacket> {
        let min_size = match packet_type {
            PacketType::Unreliable | PacketType::Reliable => packet::BATCH_HEADER_SIZE,
            _ => packet::min_size(packet_type),
        };

        if packet.len() < min_size {
            tracing::debug!(?packet_type, len = packet.len(), "dropping short packet");
            return Ok(());
        }

        match packet_type {
            PacketType::Unreliable | PacketType::Reliable => {
                let channel = if packet_type == PacketType::Reliable {
                    Channel::Reliable
                } else {
                    Channel::Unreliable
                };

                for message in Messages::new(&packet[1..]) {
                    ctx.on_receive(channel, message.map_err(|_| InvalidPacket)?);
                }
            }
            PacketType::Notify => {
                if let Some(message) = self.ack_system.receive_notify(packet, now_ms, ctx) {
                    ctx.on_receive(Channel::Notify, message);
                }
            }
            PacketType::Ack => self.ack_system.receive_ack(packet, now_ms, ctx),
            PacketType::ReliableFragment => return Err(InvalidPacket),
            PacketType::Command | PacketType::KeepAlive => (),
        }

        Ok(())
    }

    pub fn update<C: HostContext>(&mut self, now_ms: u64, ctx: &mut C) {
        self.reliable_batch.flush(ctx);
        self.unreliable_batch.flush(ctx);
        self.ack_system.update(now_ms, ctx);
    }
}
