/// Cyclic sequence numbers over an N-bit space.
#[derive(Clone, Debug)]
pub struct Sequencer {
    shift: u32,
    mask: u64,
    next: u64,
}

impl Sequencer {
    /// Creates a sequencer over `bits` bits whose first sequence is 0.
    ///
    /// Panics if `bits` is outside `[1, 63]`.
    pub fn new(bits: u32) -> Self {
        Self::with_initial(bits, 0)
    }

    /// Creates a sequencer over `bits` bits whose first sequence is `initial` (wrapped into range).
    pub fn with_initial(bits: u32, initial: u64) -> Self {
        assert!(
            (1..=63).contains(&bits),
            "invalid sequencer size: bits must be in [1, 63], got {}",
            bits
        );

        let mask = (1u64 << bits) - 1;

        Self {
            shift: 64 - bits,
            mask,
            next: initial & mask,
        }
    }

    pub fn bits(&self) -> u32 {
        64 - self.shift
    }

    /// Returns the current sequence and advances, wrapping to 0 after `2^bits - 1`.
    pub fn next(&mut self) -> u64 {
        let sequence = self.next;
        self.next = (self.next + 1) & self.mask;
        sequence
    }

    /// Signed difference `from - to` in the range `[-2^(bits-1), 2^(bits-1))`.
    pub fn distance(&self, from: u64, to: u64) -> i64 {
        let from = from << self.shift;
        let to = to << self.shift;

        (from.wrapping_sub(to) as i64) >> self.shift
    }

    pub fn move_in_bounds(&self, value: u64) -> u64 {
        value & self.mask
    }
}
