use crate::ack_system::NotifyCallback;
use crate::batch::{Batch, Messages};
use crate::error::Error;
use crate::metrics::Channel;
use crate::packet::{self, PacketType};
use crate::socket::SocketInfo;
use crate::SendMode;

use super::{HostContext, InvalidPacket};

/// Channels for a socket that already delivers every datagram once and in order. All sends share
/// one batch, nothing is acked, and every message counts as reliable.
pub struct NoReliableConnection {
    batch: Batch,
}

impl NoReliableConnection {
    pub fn new(info: &SocketInfo) -> Self {
        Self {
            batch: Batch::new(info.max_reliable_size, PacketType::Reliable, SendMode::Reliable),
        }
    }

    fn check_size(&self, message: &[u8]) -> Result<(), Error> {
        let max = self.batch.max_message_size();

        if message.len() > max {
            Err(Error::MessageTooLarge {
                size: message.len(),
                max,
            })
        } else {
            Ok(())
        }
    }

    pub fn send_unreliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        self.send_reliable(message, ctx)
    }

    /// The socket guarantees delivery, so the callback hears about it straight away.
    pub fn send_notify<C: HostContext>(
        &mut self,
        message: &[u8],
        mut callback: Box<dyn NotifyCallback>,
        ctx: &mut C,
    ) -> Result<(), Error> {
        self.send_reliable(message, ctx)?;

        callback.on_delivered();

        Ok(())
    }

    pub fn send_reliable<C: HostContext>(&mut self, message: &[u8], ctx: &mut C) -> Result<(), Error> {
        self.check_size(message)?;

        self.batch.add_message(message, ctx);
        ctx.on_send_message(Channel::Reliable, message.len());

        Ok(())
    }

    pub fn receive<C: HostContext>(
        &mut self,
        packet_type: PacketType,
        packet: &[u8],
        ctx: &mut C,
    ) -> Result<(), InvalidPacket> {
        match packet_type {
            PacketType::Reliable => {
                if packet.len() < packet::BATCH_HEADER_SIZE {
                    tracing::debug!(len = packet.len(), "dropping short batch");
                    return Ok(());
                }

                for message in Messages::new(&packet[1..]) {
                    ctx.on_receive(Channel::Reliable, message.map_err(|_| InvalidPacket)?);
                }

                Ok(())
            }
            PacketType::Command | PacketType::KeepAlive => Ok(()),
            _ => Err(InvalidPacket),
        }
    }

    pub fn update<C: HostContext>(&mut self, ctx: &mut C) {
        self.batch.flush(ctx);
    }
}
