use std::cell::Cell;
use std::rc::Rc;

use super::batch;
use super::config::Config;
use super::connection::RawConnection;
use super::error::Error;
use super::packet::{self, PacketType};
use super::pool::{BufferPool, ByteBuffer};
use super::ring_buffer::RingBuffer;
use super::sequencer::Sequencer;
use super::SendMode;

/// Receives the outcome of a notify send. Exactly one of the two methods is called, once.
pub trait NotifyCallback {
    fn on_delivered(&mut self);
    fn on_lost(&mut self);
}

/// Outcome of a notify send as seen through a [`NotifyToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyStatus {
    Pending,
    Delivered,
    Lost,
}

/// Shared handle to the outcome of a notify send.
#[derive(Clone, Debug)]
pub struct NotifyToken {
    status: Rc<Cell<NotifyStatus>>,
}

impl NotifyToken {
    pub fn new() -> Self {
        Self {
            status: Rc::new(Cell::new(NotifyStatus::Pending)),
        }
    }

    pub fn status(&self) -> NotifyStatus {
        self.status.get()
    }
}

impl Default for NotifyToken {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyCallback for NotifyToken {
    fn on_delivered(&mut self) {
        debug_assert_eq!(self.status.get(), NotifyStatus::Pending);
        self.status.set(NotifyStatus::Delivered);
    }

    fn on_lost(&mut self) {
        debug_assert_eq!(self.status.get(), NotifyStatus::Pending);
        self.status.set(NotifyStatus::Lost);
    }
}

/// An outstanding send, one per occupied slot of the send window.
enum AckablePacket {
    Notify(Box<dyn NotifyCallback>),
    // Order of a packet held in `AckSystem::reliable_packets`
    Reliable(u16),
}

struct ReliablePacket {
    order: u16,
    buffer: ByteBuffer,
    length: usize,
    // Every wire sequence this packet has been sent with
    sequences: Vec<u16>,
}

impl ReliablePacket {
    fn last_sequence(&self) -> Option<u16> {
        self.sequences.last().copied()
    }
}

/// A reliable payload waiting in the receive window, without its reliable header.
#[derive(Debug)]
pub struct ReliableReceived {
    buffer: ByteBuffer,
    length: usize,
    is_fragment: bool,
}

impl ReliableReceived {
    pub fn is_fragment(&self) -> bool {
        self.is_fragment
    }

    /// Index of a fragment. The last fragment of a message has index 0.
    pub fn fragment_index(&self) -> u8 {
        self.buffer[0]
    }

    /// Batched messages, or fragment data.
    pub fn payload(&self) -> &[u8] {
        if self.is_fragment {
            &self.buffer[packet::FRAGMENT_INDEX_SIZE..self.length]
        } else {
            &self.buffer[..self.length]
        }
    }
}

/// Notify and reliable channels for one connection.
pub struct AckSystem {
    sent: RingBuffer<AckablePacket>,
    // Reliable packets in flight, indexed by order
    reliable_packets: Box<[Option<ReliablePacket>]>,
    reliable_order: Sequencer,
    reliable_receive: RingBuffer<ReliableReceived>,
    // Orders to resend once the current ack has been processed
    to_resend: Vec<u16>,
    next_batch: Option<ReliablePacket>,

    buffer_pool: BufferPool,
    max_packet_size: usize,
    // Acks are judged by signed distance, so the window may span at most half the sequences
    max_window_len: usize,
    max_packets_in_send_buffer: usize,
    max_fragments: usize,
    size_per_fragment: usize,
    ack_timeout_ms: u64,
    empty_ack_limit: u32,
    receives_before_empty: u32,

    // Most recent sequence received, and which of the 64 before it were received
    latest_ack_sequence: u16,
    ack_mask: u64,

    last_sent_time_ms: u64,
    last_sent_ack: u16,
    empty_ack_count: u32,
}

impl AckSystem {
    pub fn new(config: &Config, max_packet_size: usize, buffer_pool: BufferPool, now_ms: u64) -> Self {
        assert!(
            max_packet_size > packet::MIN_RELIABLE_HEADER_SIZE,
            "max packet size too small for reliable packets"
        );

        let bits = config.sequence_size;
        let sent = RingBuffer::new(bits);
        let max_window_len = sent.capacity() / 2 - 1;

        // One before 0, so that sequence 0 is the first new sequence
        let latest_ack_sequence = sent.sequencer().move_in_bounds(u64::MAX) as u16;

        let mut ack_system = Self {
            reliable_packets: (0..sent.capacity()).map(|_| None).collect(),
            sent,
            reliable_order: Sequencer::new(bits),
            reliable_receive: RingBuffer::new(bits),
            to_resend: Vec::new(),
            next_batch: None,
            buffer_pool,
            max_packet_size,
            max_window_len,
            max_packets_in_send_buffer: config.max_reliable_packets_in_send_buffer,
            max_fragments: config.max_reliable_fragments,
            size_per_fragment: max_packet_size - packet::MIN_RELIABLE_FRAGMENT_HEADER_SIZE,
            ack_timeout_ms: config.time_before_empty_ack_ms,
            empty_ack_limit: config.empty_ack_limit,
            receives_before_empty: config.receives_before_empty_ack,
            latest_ack_sequence,
            ack_mask: 0,
            last_sent_time_ms: now_ms,
            last_sent_ack: latest_ack_sequence,
            empty_ack_count: 0,
        };

        ack_system.on_send(now_ms);

        ack_system
    }

    #[cfg(test)]
    pub fn size_per_fragment(&self) -> usize {
        self.size_per_fragment
    }

    /// Largest notify payload.
    pub fn max_notify_size(&self) -> usize {
        self.max_packet_size - packet::NOTIFY_HEADER_SIZE
    }

    /// Largest reliable message that is batched rather than fragmented.
    pub fn max_batched_size(&self) -> usize {
        (self.max_packet_size - packet::MIN_RELIABLE_HEADER_SIZE).min(batch::MAX_MESSAGE_SIZE)
    }

    /// Largest reliable message accepted at all.
    pub fn max_reliable_size(&self) -> usize {
        self.max_batched_size()
            .max(self.max_fragments * self.size_per_fragment)
    }

    #[cfg(test)]
    pub fn latest_ack_sequence(&self) -> u16 {
        self.latest_ack_sequence
    }

    #[cfg(test)]
    pub fn ack_mask(&self) -> u64 {
        self.ack_mask
    }

    /// Number of occupied send window slots.
    #[cfg(test)]
    pub fn sent_count(&self) -> usize {
        self.sent.count()
    }

    /// Number of sequences that can still be sent before the oldest outstanding one is resolved.
    fn window_room(&self) -> usize {
        self.max_window_len.saturating_sub(self.sent.window_len())
    }

    fn sequencer(&self) -> &Sequencer {
        self.sent.sequencer()
    }

    fn wire_sequence(&self, value: u16) -> u16 {
        self.sequencer().move_in_bounds(value as u64) as u16
    }

    /// Flushes the pending reliable batch and sends an empty ack if one is due.
    pub fn update<R: RawConnection>(&mut self, now_ms: u64, raw: &mut R) {
        if let Some(batch) = self.next_batch.take() {
            if let Err(err) = self.ensure_send_room(1) {
                // Kept, and retried next update
                tracing::debug!(%err, "deferring reliable batch");
                self.next_batch = Some(batch);
            } else {
                self.send_new_reliable(batch, now_ms, raw);
            }
        }

        if self.should_send_empty_ack() && self.time_to_send_ack(now_ms) {
            self.send_ack(now_ms, raw);
        }
    }

    fn should_send_empty_ack(&self) -> bool {
        self.empty_ack_count < self.empty_ack_limit
    }

    fn time_to_send_ack(&self, now_ms: u64) -> bool {
        self.last_sent_time_ms + self.ack_timeout_ms < now_ms
    }

    fn check_send_empty_ack<R: RawConnection>(&mut self, now_ms: u64, raw: &mut R) {
        let distance = self
            .sequencer()
            .distance(self.latest_ack_sequence as u64, self.last_sent_ack as u64);

        if distance > self.receives_before_empty as i64 {
            self.send_ack(now_ms, raw);
        }
    }

    fn on_send(&mut self, now_ms: u64) {
        self.empty_ack_count += 1;
        self.last_sent_ack = self.latest_ack_sequence;
        self.last_sent_time_ms = now_ms;
    }

    fn send<R: RawConnection>(&mut self, packet: &[u8], now_ms: u64, raw: &mut R) {
        raw.send_raw(packet, SendMode::Unreliable);
        self.on_send(now_ms);
    }

    fn send_ack<R: RawConnection>(&mut self, now_ms: u64, raw: &mut R) {
        let ref mut buffer = [0u8; packet::ACK_HEADER_SIZE];

        let mut writer = packet::Writer::new(buffer);
        writer.write_u8(PacketType::Ack.into());
        writer.write_u16(self.latest_ack_sequence);
        writer.write_u64(self.ack_mask);

        tracing::trace!(ack = self.latest_ack_sequence, "sending empty ack");

        self.send(buffer, now_ms, raw);
    }

    fn write_sequence_header(&self, buffer: &mut [u8], sequence: u16) {
        let mut writer = packet::Writer::at(buffer, 1);
        writer.write_u16(sequence);
        writer.write_u16(self.latest_ack_sequence);
        writer.write_u64(self.ack_mask);
    }

    /// Sends `message` on the notify channel. `callback` learns whether it was delivered.
    pub fn send_notify<R: RawConnection>(
        &mut self,
        message: &[u8],
        callback: Box<dyn NotifyCallback>,
        now_ms: u64,
        raw: &mut R,
    ) -> Result<(), Error> {
        if message.len() > self.max_notify_size() {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                max: self.max_notify_size(),
            });
        }

        if self.window_room() == 0 {
            return Err(Error::SendWindowFull);
        }

        let sequence = self.sent.enqueue(AckablePacket::Notify(callback))? as u16;

        let mut buffer = self.buffer_pool.take();
        buffer[0] = PacketType::Notify.into();
        self.write_sequence_header(&mut buffer, sequence);

        let length = packet::NOTIFY_HEADER_SIZE + message.len();
        buffer[packet::NOTIFY_HEADER_SIZE..length].copy_from_slice(message);

        tracing::trace!(sequence, "sending notify");

        self.send(&buffer[..length], now_ms, raw);

        Ok(())
    }

    /// Queues `message` on the reliable channel. Small messages are batched until the next
    /// update; large ones are fragmented and sent immediately.
    pub fn send_reliable<R: RawConnection>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        raw: &mut R,
    ) -> Result<(), Error> {
        if self.window_room() == 0 {
            return Err(Error::SendWindowFull);
        }

        if message.len() > self.max_batched_size() {
            if self.max_fragments == 0 {
                return Err(Error::FragmentationDisabled {
                    size: message.len(),
                    max: self.max_batched_size(),
                });
            }

            return self.send_fragmented(message, now_ms, raw);
        }

        if let Some(batch) = self.next_batch.as_ref() {
            if batch.length + batch::batched_size(message) > self.max_packet_size {
                self.ensure_send_room(1)?;

                if let Some(batch) = self.next_batch.take() {
                    self.send_new_reliable(batch, now_ms, raw);
                }
            }
        }

        let mut batch = match self.next_batch.take() {
            Some(batch) => batch,
            None => self.create_reliable_packet(PacketType::Reliable),
        };

        batch::append_message(&mut batch.buffer, &mut batch.length, message);

        self.next_batch = Some(batch);

        Ok(())
    }

    fn send_fragmented<R: RawConnection>(
        &mut self,
        message: &[u8],
        now_ms: u64,
        raw: &mut R,
    ) -> Result<(), Error> {
        let max_size = self.max_reliable_size();

        if message.len() > max_size {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                max: max_size,
            });
        }

        let fragment_count = message.len().div_ceil(self.size_per_fragment);

        // Check for room up front so that a message is sent whole or not at all
        let batch_count = self.next_batch.is_some() as usize;
        self.ensure_send_room(fragment_count + batch_count)?;

        // The pending batch must take an order before the fragments do
        if let Some(batch) = self.next_batch.take() {
            self.send_new_reliable(batch, now_ms, raw);
        }

        for (i, data) in message.chunks(self.size_per_fragment).enumerate() {
            let fragment_index = (fragment_count - i - 1) as u8;

            let mut fragment = self.create_reliable_packet(PacketType::ReliableFragment);

            let mut writer = packet::Writer::at(&mut fragment.buffer, fragment.length);
            writer.write_u8(fragment_index);
            writer.write_slice(data);
            fragment.length = writer.offset();

            self.send_new_reliable(fragment, now_ms, raw);
        }

        tracing::trace!(size = message.len(), fragment_count, "sent fragmented message");

        Ok(())
    }

    fn create_reliable_packet(&mut self, packet_type: PacketType) -> ReliablePacket {
        let order = self.reliable_order.next() as u16;

        let mut buffer = self.buffer_pool.take();
        buffer[0] = packet_type.into();

        let mut writer = packet::Writer::at(&mut buffer, packet::SEQUENCE_HEADER_SIZE);
        writer.write_u16(order);

        ReliablePacket {
            order,
            buffer,
            length: packet::RELIABLE_HEADER_SIZE,
            sequences: Vec::with_capacity(4),
        }
    }

    fn ensure_send_room(&self, packet_count: usize) -> Result<(), Error> {
        if self.window_room() < packet_count {
            return Err(Error::SendWindowFull);
        }

        if self.sent.count() + packet_count > self.max_packets_in_send_buffer {
            return Err(Error::SendBufferLimit {
                limit: self.max_packets_in_send_buffer,
            });
        }

        Ok(())
    }

    /// Takes ownership of a packet with a freshly assigned order and sends it. Callers check for
    /// room first; should the send still fail, the packet goes out with the next resends.
    fn send_new_reliable<R: RawConnection>(
        &mut self,
        reliable: ReliablePacket,
        now_ms: u64,
        raw: &mut R,
    ) {
        let order = reliable.order;
        let slot = &mut self.reliable_packets[order as usize];

        debug_assert!(slot.is_none(), "reliable order {} still in flight", order);

        *slot = Some(reliable);

        if let Err(err) = self.send_reliable_packet(order, now_ms, raw) {
            tracing::debug!(%err, order, "reliable send deferred");
            self.to_resend.push(order);
        }
    }

    /// Sends (or resends) the in-flight reliable packet with the given order under a new wire
    /// sequence. Returns the packet length, or 0 if the packet was acked in the meantime.
    fn send_reliable_packet<R: RawConnection>(
        &mut self,
        order: u16,
        now_ms: u64,
        raw: &mut R,
    ) -> Result<usize, Error> {
        self.ensure_send_room(1)?;

        let sequence = self.sent.enqueue(AckablePacket::Reliable(order))? as u16;

        let latest_ack_sequence = self.latest_ack_sequence;
        let ack_mask = self.ack_mask;

        let Some(reliable) = self.reliable_packets[order as usize].as_mut() else {
            self.sent.remove_at(sequence as u32);
            return Ok(0);
        };

        reliable.sequences.push(sequence);

        let mut writer = packet::Writer::at(&mut reliable.buffer, 1);
        writer.write_u16(sequence);
        writer.write_u16(latest_ack_sequence);
        writer.write_u64(ack_mask);

        tracing::trace!(sequence, order, "sending reliable");

        let length = reliable.length;

        raw.send_raw(&reliable.buffer[..length], SendMode::Unreliable);
        self.on_send(now_ms);

        Ok(length)
    }

    /// Processes a notify packet. Returns its payload if it is the newest packet received so far;
    /// late and duplicate packets are acked but not delivered.
    pub fn receive_notify<'p, R: RawConnection>(
        &mut self,
        packet: &'p [u8],
        now_ms: u64,
        raw: &mut R,
    ) -> Option<&'p [u8]> {
        let mut reader = packet::Reader::at(packet, 1);

        let sequence = reader.read_u16()?;
        let ack_sequence = reader.read_u16()?;
        let ack_mask = reader.read_u64()?;

        let distance = self.process_incoming_header(sequence, ack_sequence, ack_mask, now_ms, raw);

        if distance <= 0 {
            return None;
        }

        Some(reader.remaining())
    }

    /// True if a fragment packet carries an index beyond what the local configuration allows.
    pub fn invalid_fragment(&self, packet: &[u8]) -> bool {
        match packet.get(packet::RELIABLE_HEADER_SIZE) {
            Some(&fragment_index) => fragment_index as usize >= self.max_fragments,
            None => true,
        }
    }

    /// Processes a reliable or fragment packet, storing its payload until it can be read in
    /// order. Late and duplicate packets are acked and dropped.
    pub fn receive_reliable<R: RawConnection>(
        &mut self,
        packet: &[u8],
        is_fragment: bool,
        now_ms: u64,
        raw: &mut R,
    ) {
        let mut reader = packet::Reader::at(packet, 1);

        let (Some(sequence), Some(ack_sequence), Some(ack_mask), Some(order)) = (
            reader.read_u16(),
            reader.read_u16(),
            reader.read_u64(),
            reader.read_u16(),
        ) else {
            return;
        };

        self.process_incoming_header(sequence, ack_sequence, ack_mask, now_ms, raw);

        let order = self.reliable_receive.sequencer().move_in_bounds(order as u64) as u32;

        if self.reliable_receive.distance_to_read(order) < 0 {
            tracing::trace!(order, "dropping old reliable packet");
            return;
        }

        if self.reliable_receive.exists(order) {
            tracing::trace!(order, "dropping duplicate reliable packet");
            return;
        }

        let payload = reader.remaining();

        let mut buffer = self.buffer_pool.take();
        if payload.len() > buffer.len() {
            return;
        }
        buffer[..payload.len()].copy_from_slice(payload);

        self.reliable_receive.insert_at(
            order,
            ReliableReceived {
                buffer,
                length: payload.len(),
                is_fragment,
            },
        );
    }

    /// Returns the next reliable packet in order: a batch, or the first fragment of a message
    /// whose fragments have all arrived. Remaining fragments are read with
    /// [`AckSystem::next_fragment`].
    pub fn next_reliable_packet(&mut self) -> Option<ReliableReceived> {
        let next = self.reliable_receive.peek()?;

        if next.is_fragment && !self.full_fragmented_message_ready(next.fragment_index()) {
            return None;
        }

        self.reliable_receive.try_dequeue()
    }

    fn full_fragmented_message_ready(&self, fragment_index: u8) -> bool {
        // Index 3 means 3 more fragments follow at the next orders
        let read = self.reliable_receive.read() as u64;

        (1..=fragment_index as u64).all(|i| {
            let order = self.reliable_receive.sequencer().move_in_bounds(read + i);
            self.reliable_receive.exists(order as u32)
        })
    }

    pub fn next_fragment(&mut self) -> Option<ReliableReceived> {
        self.reliable_receive.try_dequeue()
    }

    /// Processes an ack-only packet.
    pub fn receive_ack<R: RawConnection>(&mut self, packet: &[u8], now_ms: u64, raw: &mut R) {
        let mut reader = packet::Reader::at(packet, 1);

        if let (Some(ack_sequence), Some(ack_mask)) = (reader.read_u16(), reader.read_u64()) {
            self.check_sent_queue(ack_sequence, ack_mask, now_ms, raw);
        }
    }

    /// Records a received sequence and reconciles the send window against the peer's report.
    /// Returns how far `sequence` is ahead of the previous latest sequence.
    fn process_incoming_header<R: RawConnection>(
        &mut self,
        sequence: u16,
        ack_sequence: u16,
        ack_mask: u64,
        now_ms: u64,
        raw: &mut R,
    ) -> i64 {
        let sequence = self.wire_sequence(sequence);
        let distance = self
            .sequencer()
            .distance(sequence as u64, self.latest_ack_sequence as u64);

        self.set_ack_values(sequence, distance, now_ms, raw);
        self.check_sent_queue(ack_sequence, ack_mask, now_ms, raw);

        distance
    }

    fn set_ack_values<R: RawConnection>(
        &mut self,
        sequence: u16,
        distance: i64,
        now_ms: u64,
        raw: &mut R,
    ) {
        if distance > 0 {
            if distance >= packet::MASK_SIZE {
                // Everything before this sequence is out of reach of the mask
                self.ack_mask = 1;
            } else {
                self.ack_mask = (self.ack_mask << distance) | 1;
            }

            self.latest_ack_sequence = sequence;
        } else {
            let behind = -distance;

            if behind >= packet::MASK_SIZE {
                return;
            }

            self.ack_mask |= 1 << behind;
        }

        self.empty_ack_count = 0;
        self.check_send_empty_ack(now_ms, raw);
    }

    fn check_sent_queue<R: RawConnection>(
        &mut self,
        ack_sequence: u16,
        ack_mask: u64,
        now_ms: u64,
        raw: &mut R,
    ) {
        let ack_sequence = self.wire_sequence(ack_sequence);

        // Behind the window: nothing left to resolve
        if self.sent.distance_to_read(ack_sequence as u32) < 0 {
            return;
        }

        // Acks something never sent
        if self
            .sequencer()
            .distance(ack_sequence as u64, self.sent.write() as u64)
            >= 0
        {
            tracing::debug!(ack_sequence, "ignoring ack beyond send window");
            return;
        }

        self.ack_messages_in_sent_queue(ack_sequence, ack_mask);
        self.sent.move_read_to_next_non_empty();
        self.resend_messages(now_ms, raw);
    }

    fn ack_messages_in_sent_queue(&mut self, ack_sequence: u16, ack_mask: u64) {
        let start = self.sent.read() as u64;
        let window_len = self.sent.window_len() as u64;

        for i in 0..window_len {
            let sequence = self.sequencer().move_in_bounds(start + i) as u16;

            // Sent after the reported sequence, so it cannot have been acked yet
            let distance = self
                .sequencer()
                .distance(ack_sequence as u64, sequence as u64);
            if distance < 0 {
                continue;
            }

            let lost = distance >= packet::MASK_SIZE || ack_mask & (1 << distance) == 0;

            let order = match self.sent.get(sequence as u32) {
                None => continue,
                Some(AckablePacket::Notify(_)) => None,
                Some(AckablePacket::Reliable(order)) => Some(*order),
            };

            match order {
                None => {
                    if let Some(AckablePacket::Notify(mut callback)) =
                        self.sent.remove_at(sequence as u32)
                    {
                        if lost {
                            callback.on_lost();
                        } else {
                            callback.on_delivered();
                        }
                    }
                }
                Some(order) => {
                    if lost {
                        self.reliable_lost(ack_sequence, order);
                    } else {
                        self.reliable_acked(order);
                    }
                }
            }
        }
    }

    fn reliable_acked(&mut self, order: u16) {
        if let Some(reliable) = self.reliable_packets[order as usize].take() {
            for &sequence in reliable.sequences.iter() {
                self.sent.remove_at(sequence as u32);
            }

            self.to_resend.retain(|&o| o != order);

            tracing::trace!(order, sends = reliable.sequences.len(), "reliable acked");

            // Dropping the packet returns its buffer to the pool
        }
    }

    fn reliable_lost(&mut self, ack_sequence: u16, order: u16) {
        let Some(reliable) = self.reliable_packets[order as usize].as_ref() else {
            return;
        };

        let Some(last_sequence) = reliable.last_sequence() else {
            return;
        };

        // Only resend if the latest transmission could have been acked by this report
        let sent_before_report = self
            .sequencer()
            .distance(ack_sequence as u64, last_sequence as u64)
            > 0;

        if sent_before_report && !self.to_resend.contains(&order) {
            self.to_resend.push(order);
        }
    }

    fn resend_messages<R: RawConnection>(&mut self, now_ms: u64, raw: &mut R) {
        let mut to_resend = std::mem::take(&mut self.to_resend);
        let mut resent = 0;

        for &order in to_resend.iter() {
            tracing::debug!(order, "resending reliable packet");

            match self.send_reliable_packet(order, now_ms, raw) {
                Ok(length) => raw.on_resend(length),
                Err(err) => {
                    // Window is full, the rest wait for the next report
                    tracing::debug!(%err, order, "resend deferred");
                    break;
                }
            }

            resent += 1;
        }

        to_resend.drain(..resent);
        self.to_resend = to_resend;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    const MTU: usize = 100;

    #[derive(Default)]
    struct MockRawConnection {
        sent: Vec<Vec<u8>>,
        // Length of each resent packet
        resent: Vec<usize>,
    }

    impl RawConnection for MockRawConnection {
        fn send_raw(&mut self, packet: &[u8], _mode: SendMode) {
            self.sent.push(packet.to_vec());
        }

        fn on_resend(&mut self, len: usize) {
            self.resent.push(len);
        }
    }

    impl MockRawConnection {
        fn take(&mut self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.sent)
        }
    }

    struct RecordingCallback {
        outcomes: Rc<RefCell<Vec<(usize, bool)>>>,
        id: usize,
    }

    impl NotifyCallback for RecordingCallback {
        fn on_delivered(&mut self) {
            self.outcomes.borrow_mut().push((self.id, true));
        }

        fn on_lost(&mut self) {
            self.outcomes.borrow_mut().push((self.id, false));
        }
    }

    fn test_config() -> Config {
        Config {
            sequence_size: 10,
            max_reliable_packets_in_send_buffer: 511,
            ..Default::default()
        }
    }

    fn new_ack_system(config: &Config, pool: &BufferPool) -> AckSystem {
        AckSystem::new(config, MTU, pool.clone(), 0)
    }

    fn new_pool() -> BufferPool {
        BufferPool::with_buffer_size(MTU, 0, 1000)
    }

    fn packet_type(packet: &[u8]) -> PacketType {
        PacketType::try_from(packet[0]).unwrap()
    }

    fn packet_sequence(packet: &[u8]) -> u16 {
        u16::from_le_bytes([packet[1], packet[2]])
    }

    fn packet_order(packet: &[u8]) -> u16 {
        u16::from_le_bytes([packet[13], packet[14]])
    }

    fn ack_packet(ack_sequence: u16, ack_mask: u64) -> Vec<u8> {
        let mut packet: Vec<u8> = vec![PacketType::Ack.into()];
        packet.extend_from_slice(&ack_sequence.to_le_bytes());
        packet.extend_from_slice(&ack_mask.to_le_bytes());
        packet
    }

    fn deliver(packet: &[u8], receiver: &mut AckSystem, raw: &mut MockRawConnection) {
        match packet_type(packet) {
            PacketType::Reliable => receiver.receive_reliable(packet, false, 0, raw),
            PacketType::ReliableFragment => receiver.receive_reliable(packet, true, 0, raw),
            PacketType::Ack => receiver.receive_ack(packet, 0, raw),
            PacketType::Notify => {
                receiver.receive_notify(packet, 0, raw);
            }
            other => panic!("unexpected packet type {:?}", other),
        }
    }

    fn read_all(receiver: &mut AckSystem) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();

        while let Some(received) = receiver.next_reliable_packet() {
            if received.is_fragment() {
                let mut message = received.payload().to_vec();

                for _ in 0..received.fragment_index() {
                    let fragment = receiver.next_fragment().unwrap();
                    message.extend_from_slice(fragment.payload());
                }

                messages.push(message);
            } else {
                for message in batch::Messages::new(received.payload()) {
                    messages.push(message.unwrap().to_vec());
                }
            }
        }

        messages
    }

    #[test]
    fn first_sequence_is_new() {
        let config = test_config();
        let pool = new_pool();
        let ack_system = new_ack_system(&config, &pool);

        assert_eq!(ack_system.latest_ack_sequence(), 1023);
        assert_eq!(ack_system.ack_mask(), 0);
    }

    #[test]
    fn ack_mask_tracks_receipts() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        for i in 0..6 {
            sender.send_notify(&[i], Box::new(NotifyToken::new()), 0, raw).unwrap();
        }

        let packets = raw.take();

        // Receive 0, 1, 3, then 5, then the late 2
        for &i in [0, 1, 3, 5].iter() {
            assert!(receiver.receive_notify(&packets[i], 0, raw).is_some());
        }

        assert_eq!(receiver.latest_ack_sequence(), 5);
        assert_eq!(receiver.ack_mask(), 0b110101);

        // Late packets are acked but not delivered
        assert_eq!(receiver.receive_notify(&packets[2], 0, raw), None);
        assert_eq!(receiver.ack_mask(), 0b111101);

        assert_eq!(receiver.receive_notify(&packets[2], 0, raw), None);
        assert_eq!(receiver.ack_mask(), 0b111101);
    }

    #[test]
    fn ack_mask_collapses_after_large_gap() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        for i in 0..70u8 {
            sender.send_notify(&[i], Box::new(NotifyToken::new()), 0, raw).unwrap();
        }

        let packets = raw.take();

        receiver.receive_notify(&packets[0], 0, raw);
        receiver.receive_notify(&packets[69], 0, raw);

        assert_eq!(receiver.latest_ack_sequence(), 69);
        assert_eq!(receiver.ack_mask(), 1);

        // Too old to be recorded
        receiver.receive_notify(&packets[1], 0, raw);
        assert_eq!(receiver.ack_mask(), 1);

        receiver.receive_notify(&packets[10], 0, raw);
        assert_eq!(receiver.ack_mask(), 1 | 1 << 59);
    }

    fn notify_outcome_trial(initial: u16) {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        // Shift the send window so that sequences wrap during the trial
        for _ in 0..initial {
            sender.send_notify(&[], Box::new(NotifyToken::new()), 0, raw).unwrap();
            let sequence = packet_sequence(raw.sent.last().unwrap());
            sender.receive_ack(&ack_packet(sequence, 1), 0, raw);
        }
        raw.take();

        let outcomes = Rc::new(RefCell::new(Vec::new()));

        for id in 0..4 {
            let callback = RecordingCallback {
                outcomes: Rc::clone(&outcomes),
                id,
            };
            sender.send_notify(&[id as u8], Box::new(callback), 0, raw).unwrap();
        }

        let packets = raw.take();
        let first = packet_sequence(&packets[0]);

        // Peer received 0 and 2 of the 4, and 3 has not been reported yet
        let report = sender.wire_sequence(first.wrapping_add(2));
        sender.receive_ack(&ack_packet(report, 0b101), 0, raw);

        assert_eq!(*outcomes.borrow(), vec![(0, true), (1, false), (2, true)]);

        // Repeating the report must not fire anything again
        sender.receive_ack(&ack_packet(report, 0b101), 0, raw);
        assert_eq!(outcomes.borrow().len(), 3);

        let report = sender.wire_sequence(first.wrapping_add(3));
        sender.receive_ack(&ack_packet(report, 0b1011), 0, raw);

        assert_eq!(
            *outcomes.borrow(),
            vec![(0, true), (1, false), (2, true), (3, true)]
        );
        assert_eq!(sender.sent_count(), 0);

        // Notify is never retransmitted
        assert!(raw.sent.is_empty());
    }

    #[test]
    fn notify_outcome() {
        for initial in [0, 1, 100, 1020, 1023] {
            notify_outcome_trial(initial);
        }
    }

    #[test]
    fn notify_token_status() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let delivered = NotifyToken::new();
        let lost = NotifyToken::new();

        sender.send_notify(&[1], Box::new(lost.clone()), 0, raw).unwrap();
        sender.send_notify(&[2], Box::new(delivered.clone()), 0, raw).unwrap();

        assert_eq!(delivered.status(), NotifyStatus::Pending);

        sender.receive_ack(&ack_packet(1, 0b1), 0, raw);

        assert_eq!(lost.status(), NotifyStatus::Lost);
        assert_eq!(delivered.status(), NotifyStatus::Delivered);
    }

    #[test]
    fn notify_too_large() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        assert!(sender
            .send_notify(&[0; MTU - 13], Box::new(NotifyToken::new()), 0, raw)
            .is_ok());

        let result = sender.send_notify(&[0; MTU - 12], Box::new(NotifyToken::new()), 0, raw);
        assert!(matches!(
            result,
            Err(Error::MessageTooLarge { size: 88, max: 87 })
        ));
    }

    fn window_capacity_trial(sequence_size: u32) {
        let limit = (1usize << (sequence_size - 1)) - 1;

        let config = Config {
            sequence_size,
            max_reliable_packets_in_send_buffer: limit,
            ..Default::default()
        };
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let mut sent = 0usize;

        // Enough rounds for the sequences to wrap at least once
        for _ in 0..3 {
            let tokens: Vec<_> = (0..limit).map(|_| NotifyToken::new()).collect();

            for token in tokens.iter() {
                sender.send_notify(&[], Box::new(token.clone()), 0, raw).unwrap();
            }

            let rejected = NotifyToken::new();
            assert!(matches!(
                sender.send_notify(&[], Box::new(rejected.clone()), 0, raw),
                Err(Error::SendWindowFull)
            ));
            assert!(matches!(
                sender.send_reliable(&[1], 0, raw),
                Err(Error::SendWindowFull)
            ));

            // The rejected sends were never queued or sent
            assert_eq!(raw.take().len(), limit);
            assert_eq!(rejected.status(), NotifyStatus::Pending);

            // Report everything received, 64 sequences at a time
            for first in (0..limit).step_by(packet::MASK_SIZE as usize) {
                let last = (first + packet::MASK_SIZE as usize - 1).min(limit - 1);
                let report = sender.wire_sequence((sent + last) as u16);
                sender.receive_ack(&ack_packet(report, u64::MAX), 0, raw);
            }

            assert!(tokens
                .iter()
                .all(|token| token.status() == NotifyStatus::Delivered));
            assert_eq!(sender.sent_count(), 0);
            assert_eq!(sender.window_room(), limit);

            sent += limit;
        }
    }

    #[test]
    fn window_capacity_small_sequences() {
        window_capacity_trial(4);
    }

    #[test]
    fn window_capacity_default_sequences() {
        window_capacity_trial(Config::default().sequence_size);
    }

    #[test]
    fn window_is_bounded_by_oldest_outstanding_packet() {
        let config = Config {
            sequence_size: 4,
            max_reliable_packets_in_send_buffer: 7,
            ..Default::default()
        };
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[1], 0, raw).unwrap();
        sender.update(0, raw);

        for _ in 0..3 {
            sender.send_notify(&[], Box::new(NotifyToken::new()), 0, raw).unwrap();
        }

        // Notifies 1 to 3 arrived, the reliable packet at 0 did not and goes out again as 4
        sender.receive_ack(&ack_packet(3, 0b0111), 0, raw);
        assert_eq!(packet_sequence(raw.sent.last().unwrap()), 4);
        assert_eq!(sender.sent_count(), 2);

        // Sequences 0 to 4 are spanned, so only two more fit
        let tokens = [NotifyToken::new(), NotifyToken::new()];
        for token in tokens.iter() {
            sender.send_notify(&[], Box::new(token.clone()), 0, raw).unwrap();
        }
        assert!(matches!(
            sender.send_notify(&[], Box::new(NotifyToken::new()), 0, raw),
            Err(Error::SendWindowFull)
        ));
        assert_eq!(sender.sent_count(), 4);

        sender.receive_ack(&ack_packet(6, u64::MAX), 0, raw);
        assert!(tokens
            .iter()
            .all(|token| token.status() == NotifyStatus::Delivered));
        assert_eq!(sender.sent_count(), 0);
        assert!(sender.send_notify(&[], Box::new(NotifyToken::new()), 0, raw).is_ok());
    }

    #[test]
    fn send_buffer_limit() {
        let config = Config {
            max_reliable_packets_in_send_buffer: 3,
            ..test_config()
        };
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        // 4 fragments cannot fit under a limit of 3
        let large = vec![0u8; sender.size_per_fragment() * 4];
        assert!(matches!(
            sender.send_reliable(&large, 0, raw),
            Err(Error::SendBufferLimit { limit: 3 })
        ));
        assert!(raw.sent.is_empty());

        let large = vec![0u8; sender.size_per_fragment() * 3];
        assert!(sender.send_reliable(&large, 0, raw).is_ok());
        assert_eq!(raw.sent.len(), 3);
    }

    #[test]
    fn batches_until_update() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[1, 2, 3], 0, raw).unwrap();
        sender.send_reliable(&[4], 0, raw).unwrap();
        sender.send_reliable(&[], 0, raw).unwrap();
        assert!(raw.sent.is_empty());

        sender.update(0, raw);
        let packets = raw.take();
        assert_eq!(packets.len(), 1);
        assert_eq!(packet_type(&packets[0]), PacketType::Reliable);
        assert_eq!(packets[0].len(), 15 + 5 + 3 + 2);

        deliver(&packets[0], &mut receiver, raw);

        assert_eq!(read_all(&mut receiver), vec![vec![1, 2, 3], vec![4], vec![]]);
    }

    #[test]
    fn full_batch_is_sent() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        // Header 15, each message 2 + 40
        sender.send_reliable(&[1; 40], 0, raw).unwrap();
        sender.send_reliable(&[2; 40], 0, raw).unwrap();
        assert!(raw.sent.is_empty());

        sender.send_reliable(&[3; 40], 0, raw).unwrap();
        assert_eq!(raw.sent.len(), 1);
        assert_eq!(raw.sent[0].len(), 15 + 84);

        sender.update(0, raw);
        assert_eq!(raw.sent.len(), 2);
        assert_eq!(packet_order(&raw.sent[0]), 0);
        assert_eq!(packet_order(&raw.sent[1]), 1);
    }

    #[test]
    fn ack_releases_buffer() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[9; 10], 0, raw).unwrap();
        sender.update(0, raw);

        let packets = raw.take();
        let sequence = packet_sequence(&packets[0]);

        assert_eq!(pool.in_use(), 1);
        assert_eq!(sender.sent_count(), 1);

        sender.receive_ack(&ack_packet(sequence, 1), 0, raw);

        assert_eq!(pool.in_use(), 0);
        assert_eq!(sender.sent_count(), 0);

        // A later report that says it was lost cannot resurrect it
        sender.receive_ack(&ack_packet(sequence, 0), 0, raw);
        assert!(raw.sent.is_empty());
    }

    #[test]
    fn lost_reliable_resent_once_per_report() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[1], 0, raw).unwrap();
        sender.update(0, raw);
        sender.send_notify(&[2], Box::new(NotifyToken::new()), 0, raw).unwrap();

        let packets = raw.take();
        assert_eq!(packet_sequence(&packets[0]), 0);
        assert_eq!(packet_sequence(&packets[1]), 1);

        // Peer got the notify (1) but not the reliable (0)
        sender.receive_ack(&ack_packet(1, 0b1), 0, raw);

        let resent = raw.take();
        assert_eq!(resent.len(), 1);
        assert_eq!(packet_type(&resent[0]), PacketType::Reliable);
        assert_eq!(packet_sequence(&resent[0]), 2);
        assert_eq!(packet_order(&resent[0]), 0);

        // The same report again: the resend has not had a chance to be acked, so no new resend
        sender.receive_ack(&ack_packet(1, 0b1), 0, raw);
        assert!(raw.sent.is_empty());

        // Both transmissions still occupy the window
        assert_eq!(sender.sent_count(), 2);

        // Resend is lost too, reported by a later sequence
        sender.send_notify(&[3], Box::new(NotifyToken::new()), 0, raw).unwrap();
        raw.take();
        sender.receive_ack(&ack_packet(3, 0b1), 0, raw);

        let resent = raw.take();
        assert_eq!(resent.len(), 1);
        assert_eq!(packet_sequence(&resent[0]), 4);

        // Reliable header, length prefix and the one byte message, twice
        assert_eq!(raw.resent, vec![18, 18]);

        // Acking the latest transmission releases every slot it used
        sender.receive_ack(&ack_packet(4, 0b1), 0, raw);
        assert_eq!(sender.sent_count(), 0);
        assert_eq!(pool.in_use(), 0);
        assert!(raw.sent.is_empty());
    }

    #[test]
    fn old_transmission_acked() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[1], 0, raw).unwrap();
        sender.update(0, raw);
        sender.send_notify(&[2], Box::new(NotifyToken::new()), 0, raw).unwrap();
        raw.take();

        sender.receive_ack(&ack_packet(1, 0b1), 0, raw);
        assert_eq!(raw.take().len(), 1);

        // The original transmission arrived after all
        sender.receive_ack(&ack_packet(1, 0b11), 0, raw);
        assert_eq!(sender.sent_count(), 0);
        assert!(raw.sent.is_empty());
    }

    fn fragmentation_trial(fragment_count: usize, remainder: usize, arrival: &[usize]) {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let size = (fragment_count - 1) * sender.size_per_fragment() + remainder;
        let message: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();

        sender.send_reliable(&message, 0, raw).unwrap();

        let packets = raw.take();
        assert_eq!(packets.len(), fragment_count);

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet_type(packet), PacketType::ReliableFragment);
            assert_eq!(packet[15] as usize, fragment_count - 1 - i);
        }

        for (step, &i) in arrival.iter().enumerate() {
            deliver(&packets[i], &mut receiver, raw);

            if step + 1 < arrival.len() {
                assert!(read_all(&mut receiver).is_empty());
            }
        }

        assert_eq!(read_all(&mut receiver), vec![message]);
    }

    #[test]
    fn fragmentation() {
        // size_per_fragment = 100 - 16 = 84
        fragmentation_trial(2, 42, &[0, 1]);
        fragmentation_trial(2, 1, &[1, 0]);
        fragmentation_trial(3, 83, &[2, 0, 1]);
        fragmentation_trial(5, 10, &[4, 3, 2, 1, 0]);
        fragmentation_trial(5, 84, &[1, 3, 0, 4, 2]);
    }

    #[test]
    fn fragments_follow_pending_batch() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let large = vec![5u8; 150];

        sender.send_reliable(&[1], 0, raw).unwrap();
        sender.send_reliable(&large, 0, raw).unwrap();
        sender.send_reliable(&[2], 0, raw).unwrap();
        sender.update(0, raw);

        let packets = raw.take();
        let orders: Vec<u16> = packets.iter().map(|p| packet_order(p)).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert_eq!(packet_type(&packets[0]), PacketType::Reliable);
        assert_eq!(packet_type(&packets[1]), PacketType::ReliableFragment);
        assert_eq!(packet_type(&packets[2]), PacketType::ReliableFragment);
        assert_eq!(packet_type(&packets[3]), PacketType::Reliable);

        for &i in [3, 1, 2, 0].iter() {
            deliver(&packets[i], &mut receiver, raw);
        }

        assert_eq!(read_all(&mut receiver), vec![vec![1], large, vec![2]]);
    }

    #[test]
    fn fragmentation_limits() {
        let config = Config {
            max_reliable_fragments: 2,
            ..test_config()
        };
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        assert_eq!(sender.max_reliable_size(), 168);
        assert!(sender.send_reliable(&[0; 168], 0, raw).is_ok());
        assert!(matches!(
            sender.send_reliable(&[0; 169], 0, raw),
            Err(Error::MessageTooLarge { size: 169, max: 168 })
        ));

        let config = Config {
            max_reliable_fragments: 0,
            ..test_config()
        };
        let mut sender = new_ack_system(&config, &pool);

        assert!(sender.send_reliable(&[0; 83], 0, raw).is_ok());
        assert!(matches!(
            sender.send_reliable(&[0; 84], 0, raw),
            Err(Error::FragmentationDisabled { size: 84, max: 83 })
        ));
    }

    #[test]
    fn invalid_fragment_index() {
        let config = Config {
            max_reliable_fragments: 3,
            ..test_config()
        };
        let pool = new_pool();
        let receiver = new_ack_system(&config, &pool);

        let mut packet = vec![0u8; 20];
        packet[0] = PacketType::ReliableFragment.into();

        packet[15] = 2;
        assert!(!receiver.invalid_fragment(&packet));

        packet[15] = 3;
        assert!(receiver.invalid_fragment(&packet));
    }

    #[test]
    fn duplicate_and_stale_reliable_dropped() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_reliable(&[1], 0, raw).unwrap();
        sender.update(0, raw);
        sender.send_reliable(&[2], 0, raw).unwrap();
        sender.update(0, raw);

        let packets = raw.take();

        deliver(&packets[1], &mut receiver, raw);
        deliver(&packets[1], &mut receiver, raw);
        assert!(read_all(&mut receiver).is_empty());

        deliver(&packets[0], &mut receiver, raw);
        assert_eq!(read_all(&mut receiver), vec![vec![1], vec![2]]);

        deliver(&packets[0], &mut receiver, raw);
        deliver(&packets[1], &mut receiver, raw);
        assert!(read_all(&mut receiver).is_empty());

        // Only held buffers are the sender's two unacked packets
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn empty_ack_after_timeout() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        sender.send_notify(&[1], Box::new(NotifyToken::new()), 0, raw).unwrap();
        let packets = raw.take();

        receiver.receive_notify(&packets[0], 0, raw);
        assert!(raw.sent.is_empty());

        receiver.update(config.time_before_empty_ack_ms, raw);
        assert!(raw.sent.is_empty());

        receiver.update(config.time_before_empty_ack_ms + 1, raw);
        let acks = raw.take();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0], ack_packet(0, 1));
    }

    #[test]
    fn empty_acks_are_limited() {
        let config = test_config();
        let pool = new_pool();

        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let mut now = 0;
        for _ in 0..100 {
            now += config.time_before_empty_ack_ms + 1;
            receiver.update(now, raw);
        }

        // Construction counts as one send
        assert_eq!(raw.sent.len(), config.empty_ack_limit as usize - 1);
    }

    #[test]
    fn many_receives_force_ack() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let mut receiver = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        for i in 0..10u8 {
            sender.send_notify(&[i], Box::new(NotifyToken::new()), 0, raw).unwrap();
        }

        let packets = raw.take();

        // Receiving 9 new sequences puts the latest 9 ahead of the last ack sent
        for packet in packets.iter().take(8) {
            receiver.receive_notify(packet, 0, raw);
        }
        assert!(raw.sent.is_empty());

        receiver.receive_notify(&packets[8], 0, raw);

        let acks = raw.take();
        assert_eq!(acks.len(), 1);
        assert_eq!(packet_type(&acks[0]), PacketType::Ack);
    }

    #[test]
    fn ack_beyond_window_ignored() {
        let config = test_config();
        let pool = new_pool();

        let mut sender = new_ack_system(&config, &pool);
        let ref mut raw = MockRawConnection::default();

        let token = NotifyToken::new();
        sender.send_notify(&[1], Box::new(token.clone()), 0, raw).unwrap();

        sender.receive_ack(&ack_packet(5, u64::MAX), 0, raw);

        assert_eq!(token.status(), NotifyStatus::Pending);
        assert_eq!(sender.sent_count(), 1);
    }
}
