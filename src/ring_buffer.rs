use super::error::Error;
use super::sequencer::Sequencer;

/// Largest ring size in bits. Sequences travel on the wire as 16-bit values.
pub const MAX_BITS: u32 = 16;

/// A fixed-capacity circular buffer addressed by sequence number.
///
/// Slots between the read and write cursors may be empty, which allows out-of-order insertion;
/// callers decide what contiguous occupancy means.
#[derive(Debug)]
pub struct RingBuffer<T> {
    sequencer: Sequencer,
    slots: Box<[Option<T>]>,
    read: u32,
    write: u32,
    count: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a ring with `2^bits` slots. Panics if `bits` is outside `[1, 16]`.
    pub fn new(bits: u32) -> Self {
        Self::with_initial(bits, 0)
    }

    /// Creates a ring whose read and write cursors both start at `initial`.
    pub fn with_initial(bits: u32, initial: u32) -> Self {
        assert!(
            bits <= MAX_BITS,
            "invalid ring buffer size: bits must be at most {}, got {}",
            MAX_BITS,
            bits
        );

        let sequencer = Sequencer::new(bits);
        let initial = sequencer.move_in_bounds(initial as u64) as u32;

        Self {
            slots: (0..1usize << bits).map(|_| None).collect(),
            sequencer,
            read: initial,
            write: initial,
            count: 0,
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Sequence of the oldest slot still tracked.
    pub fn read(&self) -> u32 {
        self.read
    }

    /// Sequence that the next enqueue will use.
    pub fn write(&self) -> u32 {
        self.write
    }

    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of sequences from read up to (not including) write, occupied or not.
    pub fn window_len(&self) -> usize {
        self.sequencer
            .move_in_bounds((self.write as u64).wrapping_sub(self.read as u64)) as usize
    }

    /// Number of further enqueues accepted before the ring is full.
    pub fn free_len(&self) -> usize {
        self.capacity() - 1 - self.window_len()
    }

    pub fn is_full(&self) -> bool {
        self.sequencer.distance(self.write as u64, self.read as u64) == -1
    }

    fn index(&self, sequence: u32) -> usize {
        self.sequencer.move_in_bounds(sequence as u64) as usize
    }

    fn advance(&self, sequence: u32) -> u32 {
        self.sequencer.move_in_bounds(sequence as u64 + 1) as u32
    }

    /// Stores `item` at the write cursor and returns its sequence.
    pub fn enqueue(&mut self, item: T) -> Result<u32, Error> {
        if self.is_full() {
            return Err(Error::SendWindowFull);
        }

        let sequence = self.write;
        let index = self.index(sequence);

        debug_assert!(self.slots[index].is_none());

        self.slots[index] = Some(item);
        self.count += 1;
        self.write = self.advance(sequence);

        Ok(sequence)
    }

    pub fn get(&self, sequence: u32) -> Option<&T> {
        self.slots[self.index(sequence)].as_ref()
    }

    pub fn get_mut(&mut self, sequence: u32) -> Option<&mut T> {
        let index = self.index(sequence);
        self.slots[index].as_mut()
    }

    pub fn exists(&self, sequence: u32) -> bool {
        self.get(sequence).is_some()
    }

    /// Stores `item` at an arbitrary sequence without moving either cursor. Returns the item
    /// previously held there, if any.
    pub fn insert_at(&mut self, sequence: u32, item: T) -> Option<T> {
        let index = self.index(sequence);
        let previous = self.slots[index].replace(item);

        if previous.is_none() {
            self.count += 1;
        }

        previous
    }

    pub fn remove_at(&mut self, sequence: u32) -> Option<T> {
        let index = self.index(sequence);
        let removed = self.slots[index].take();

        if removed.is_some() {
            self.count -= 1;
        }

        removed
    }

    pub fn peek(&self) -> Option<&T> {
        self.get(self.read)
    }

    /// Removes the item at the read cursor and advances past it. Returns `None` without moving
    /// if the read slot is empty.
    pub fn try_dequeue(&mut self) -> Option<T> {
        let item = self.remove_at(self.read)?;
        self.read = self.advance(self.read);
        Some(item)
    }

    /// Advances the read cursor past empty slots, stopping at the first occupied slot or at the
    /// write cursor.
    pub fn move_read_to_next_non_empty(&mut self) {
        while self.read != self.write && !self.exists(self.read) {
            self.read = self.advance(self.read);
        }
    }

    /// Signed distance of `sequence` from the read cursor. Negative values are behind the window.
    pub fn distance_to_read(&self, sequence: u32) -> i64 {
        self.sequencer.distance(sequence as u64, self.read as u64)
    }
}
