use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Size of the ack mask in bits.
pub const MASK_SIZE: i64 = 64;

/// Type, sequence, ack sequence, ack mask
pub const SEQUENCE_HEADER_SIZE: usize = 1 + 2 + 2 + 8;
pub const NOTIFY_HEADER_SIZE: usize = SEQUENCE_HEADER_SIZE;
/// Sequence header, reliable order
pub const RELIABLE_HEADER_SIZE: usize = SEQUENCE_HEADER_SIZE + 2;
/// Type, ack sequence, ack mask
pub const ACK_HEADER_SIZE: usize = 1 + 2 + 8;

pub const MESSAGE_LENGTH_SIZE: usize = 2;
pub const FRAGMENT_INDEX_SIZE: usize = 1;

/// Reliable header plus the length prefix of the first batched message
pub const MIN_RELIABLE_HEADER_SIZE: usize = RELIABLE_HEADER_SIZE + MESSAGE_LENGTH_SIZE;
/// Reliable header plus the fragment index
pub const MIN_RELIABLE_FRAGMENT_HEADER_SIZE: usize = RELIABLE_HEADER_SIZE + FRAGMENT_INDEX_SIZE;

/// Type and the length prefix of the first message, for array batches
pub const BATCH_HEADER_SIZE: usize = 1 + MESSAGE_LENGTH_SIZE;

pub const COMMAND_HEADER_SIZE: usize = 2;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum PacketType {
    Command = 1,
    Unreliable = 2,
    Notify = 3,
    Reliable = 4,
    Ack = 5,
    KeepAlive = 6,
    ReliableFragment = 7,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Command {
    ConnectRequest = 1,
    ConnectionAccepted = 2,
    ConnectionRejected = 3,
    Disconnect = 4,
}

/// Why a connection attempt failed.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum RejectReason {
    None = 0,
    /// The server is at its connection limit
    ServerFull = 1,
    /// No reply after every connect attempt was sent
    Timeout = 2,
    /// The local peer closed while still connecting
    ClosedByPeer = 3,
}

/// Why an established connection ended.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum DisconnectReason {
    None = 0,
    /// Nothing was received for the configured timeout
    Timeout = 1,
    /// The remote peer asked to disconnect
    RequestedByRemotePeer = 2,
    /// This side asked to disconnect
    RequestedByLocalPeer = 3,
    /// The remote peer sent data that corrupts the reliable stream
    InvalidPacket = 4,
}

impl DisconnectReason {
    /// Reason to report locally for a reason byte received from the remote peer.
    pub(crate) fn from_remote(byte: u8) -> Self {
        match Self::try_from(byte) {
            Ok(Self::RequestedByLocalPeer) => Self::RequestedByRemotePeer,
            Ok(reason) => reason,
            Err(_) => Self::None,
        }
    }
}

/// Minimum length of a packet of the given type when it carries a sequence header. Array batches
/// sent over reliable sockets are checked against [`BATCH_HEADER_SIZE`] instead.
pub(crate) fn min_size(packet_type: PacketType) -> usize {
    match packet_type {
        PacketType::Command => COMMAND_HEADER_SIZE,
        PacketType::Unreliable => 1,
        PacketType::Notify => NOTIFY_HEADER_SIZE,
        PacketType::Reliable => MIN_RELIABLE_HEADER_SIZE,
        PacketType::Ack => ACK_HEADER_SIZE,
        PacketType::KeepAlive => 1,
        PacketType::ReliableFragment => MIN_RELIABLE_FRAGMENT_HEADER_SIZE,
    }
}

/// Reads the type of a packet. Unknown types, and commands too short to name a command, give
/// `None`.
pub(crate) fn read_type(packet: &[u8]) -> Option<PacketType> {
    let packet_type = PacketType::try_from(*packet.first()?).ok()?;

    if packet_type == PacketType::Command && packet.len() < COMMAND_HEADER_SIZE {
        return None;
    }

    Some(packet_type)
}

/// Little-endian writer over a fixed buffer. Callers size the buffer for what they write.
pub(crate) struct Writer<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn at(buffer: &'a mut [u8], offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer[self.offset] = value;
        self.offset += 1;
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_slice(&value.to_le_bytes());
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.buffer[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }
}

/// Little-endian reader. Every read returns `None` once the input is exhausted.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.bytes.get(self.offset..self.offset + N)?;
        self.offset += N;
        bytes.try_into().ok()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.bytes.get(self.offset..self.offset.checked_add(len)?)?;
        self.offset += len;
        Some(bytes)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset.min(self.bytes.len())..]
    }
}
