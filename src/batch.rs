use super::connection::RawConnection;
use super::packet::{self, PacketType};
use super::SendMode;

/// Largest message a 16-bit length prefix can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Appends `message` with its 16-bit length prefix at `*length`, advancing it.
pub fn append_message(buffer: &mut [u8], length: &mut usize, message: &[u8]) {
    debug_assert!(message.len() <= MAX_MESSAGE_SIZE);

    let mut writer = packet::Writer::at(buffer, *length);
    writer.write_u16(message.len() as u16);
    writer.write_slice(message);

    *length = writer.offset();
}

/// Space taken by `message` once batched.
pub fn batched_size(message: &[u8]) -> usize {
    packet::MESSAGE_LENGTH_SIZE + message.len()
}

/// Returned when a length prefix runs past the end of a batch.
#[derive(Debug, PartialEq, Eq)]
pub struct MalformedBatch;

/// Iterates the length-prefixed messages of a batch payload.
pub struct Messages<'a> {
    reader: packet::Reader<'a>,
    failed: bool,
}

impl<'a> Messages<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            reader: packet::Reader::new(payload),
            failed: false,
        }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<&'a [u8], MalformedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining().is_empty() {
            return None;
        }

        let message = self
            .reader
            .read_u16()
            .and_then(|length| self.reader.read_slice(length as usize));

        match message {
            Some(message) => Some(Ok(message)),
            None => {
                self.failed = true;
                Some(Err(MalformedBatch))
            }
        }
    }
}

/// Packs messages into packets of `[type][len][msg][len][msg]...`, sending a packet whenever the
/// next message would not fit. Used where the socket itself provides the delivery guarantee.
pub struct Batch {
    buffer: Box<[u8]>,
    length: usize,
    mode: SendMode,
}

impl Batch {
    pub fn new(max_packet_size: usize, packet_type: PacketType, mode: SendMode) -> Self {
        assert!(max_packet_size > packet::BATCH_HEADER_SIZE);

        let mut buffer = vec![0u8; max_packet_size].into_boxed_slice();
        buffer[0] = packet_type.into();

        Self {
            buffer,
            length: 1,
            mode,
        }
    }

    /// Largest message that fits in one packet and in a length prefix.
    pub fn max_message_size(&self) -> usize {
        (self.buffer.len() - packet::BATCH_HEADER_SIZE).min(MAX_MESSAGE_SIZE)
    }

    pub fn has_data(&self) -> bool {
        self.length > 1
    }

    /// Adds a message, flushing first if it would not fit. The caller checks the message
    /// against [`Batch::max_message_size`].
    pub fn add_message<R: RawConnection>(&mut self, message: &[u8], raw: &mut R) {
        debug_assert!(message.len() <= self.max_message_size());

        if self.length + batched_size(message) > self.buffer.len() {
            self.flush(raw);
        }

        append_message(&mut self.buffer, &mut self.length, message);
    }

    pub fn flush<R: RawConnection>(&mut self, raw: &mut R) {
        if self.has_data() {
            raw.send_raw(&self.buffer[..self.length], self.mode);
            self.length = 1;
        }
    }
}
