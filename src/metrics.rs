use super::sequencer::Sequencer;

/// Number of frames kept when none is given, about 17 seconds at 60 updates per second.
pub const DEFAULT_FRAME_BITS: u32 = 10;

/// Application-facing channel a message travelled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Unreliable,
    Notify,
    Reliable,
}

/// Number of events and the bytes they carried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub bytes: u64,
}

impl Counter {
    fn record(&mut self, bytes: usize) {
        self.count += 1;
        self.bytes += bytes as u64;
    }

    fn add(&mut self, other: &Counter) {
        self.count += other.count;
        self.bytes += other.bytes;
    }
}

/// Message counters, one per channel. Bytes are message payloads only, without packet headers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub unreliable: Counter,
    pub notify: Counter,
    pub reliable: Counter,
}

impl ChannelCounters {
    pub fn get(&self, channel: Channel) -> &Counter {
        match channel {
            Channel::Unreliable => &self.unreliable,
            Channel::Notify => &self.notify,
            Channel::Reliable => &self.reliable,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut Counter {
        match channel {
            Channel::Unreliable => &mut self.unreliable,
            Channel::Notify => &mut self.notify,
            Channel::Reliable => &mut self.reliable,
        }
    }

    pub fn total(&self) -> Counter {
        let mut total = self.unreliable;
        total.add(&self.notify);
        total.add(&self.reliable);
        total
    }

    fn add(&mut self, other: &ChannelCounters) {
        self.unreliable.add(&other.unreliable);
        self.notify.add(&other.notify);
        self.reliable.add(&other.reliable);
    }
}

/// Traffic seen during one peer update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// Connections in the table when the frame started
    pub connection_count: usize,

    /// Packets sent to connections, resends included
    pub send: Counter,

    /// Reliable packets sent again after being reported lost
    pub resend: Counter,

    /// Packets received from connections
    pub receive: Counter,

    /// Packets sent to endpoints without a connection, such as rejections
    pub send_unconnected: Counter,

    /// Packets received from endpoints without a connection
    pub receive_unconnected: Counter,

    /// Messages accepted for sending
    pub send_messages: ChannelCounters,

    /// Messages handed to the data handler
    pub receive_messages: ChannelCounters,
}

impl Frame {
    fn add(&mut self, other: &Frame) {
        self.connection_count = self.connection_count.max(other.connection_count);
        self.send.add(&other.send);
        self.resend.add(&other.resend);
        self.receive.add(&other.receive);
        self.send_unconnected.add(&other.send_unconnected);
        self.receive_unconnected.add(&other.receive_unconnected);
        self.send_messages.add(&other.send_messages);
        self.receive_messages.add(&other.receive_messages);
    }
}

/// Per-update traffic counters for a [`Peer`](crate::Peer), kept in a ring of `2^bits` frames.
///
/// Every [`Peer::update`](crate::Peer::update) starts a new frame. Once the ring is full the
/// oldest frame is overwritten.
#[derive(Debug)]
pub struct Metrics {
    sequencer: Sequencer,
    // None until the frame has been used once
    frames: Box<[Option<Frame>]>,
    tick: u32,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_BITS)
    }
}

impl Metrics {
    pub fn new(bits: u32) -> Self {
        assert!(
            (1..=16).contains(&bits),
            "invalid metrics size: bits must be in [1, 16], got {}",
            bits
        );

        let sequencer = Sequencer::new(bits);

        Self {
            frames: (0..1usize << bits).map(|_| None).collect(),
            // The first tick lands on frame 0
            tick: sequencer.move_in_bounds(u64::MAX) as u32,
            sequencer,
        }
    }

    /// Index of the current frame.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Starts a new frame, replacing the oldest one.
    pub fn record_tick(&mut self, connection_count: usize) {
        self.tick = self.sequencer.move_in_bounds(self.tick as u64 + 1) as u32;
        self.frames[self.tick as usize] = Some(Frame {
            connection_count,
            ..Default::default()
        });
    }

    /// The frame being recorded, if a tick has started one.
    pub fn current(&self) -> Option<&Frame> {
        self.frames[self.tick as usize].as_ref()
    }

    // Events before the first tick get a frame of their own, just ahead of the first tick's
    fn current_mut(&mut self) -> &mut Frame {
        self.frames[self.tick as usize].get_or_insert_with(Frame::default)
    }

    /// Frames in the order they were recorded, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        let len = self.frames.len() as u64;
        let start = self.tick as u64 + 1;

        (0..len)
            .map(move |i| self.sequencer.move_in_bounds(start + i) as usize)
            .filter_map(move |index| self.frames[index].as_ref())
    }

    /// Sum of every frame still in the ring. `connection_count` is the highest seen.
    pub fn totals(&self) -> Frame {
        let mut totals = Frame::default();

        for frame in self.frames() {
            totals.add(frame);
        }

        totals
    }

    pub fn record_send(&mut self, bytes: usize) {
        self.current_mut().send.record(bytes);
    }

    pub fn record_resend(&mut self, bytes: usize) {
        self.current_mut().resend.record(bytes);
    }

    pub fn record_receive(&mut self, bytes: usize) {
        self.current_mut().receive.record(bytes);
    }

    pub fn record_send_unconnected(&mut self, bytes: usize) {
        self.current_mut().send_unconnected.record(bytes);
    }

    pub fn record_receive_unconnected(&mut self, bytes: usize) {
        self.current_mut().receive_unconnected.record(bytes);
    }

    pub fn record_send_message(&mut self, channel: Channel, bytes: usize) {
        self.current_mut().send_messages.get_mut(channel).record(bytes);
    }

    pub fn record_receive_message(&mut self, channel: Channel, bytes: usize) {
        self.current_mut()
            .receive_messages
            .get_mut(channel)
            .record(bytes);
    }
}
