//! Fixed-capacity circular token buffer
//!
//! Each slot is 16 bits wide and by convention carries one 8-bit payload
//! byte. Capacity is a power of two so wrap-around is a mask.
//!
//! `load` and `unload` are best-effort: they move as many tokens as fit (or
//! as are available) and return the count. A short transfer is not an
//! error; the caller decides whether it matters to its protocol. Buffers are
//! sized so a full buffer does not happen in practice.

use crate::critical_region;
use crate::error::LinkError;

/// One ring buffer slot
pub type Token = u16;

/// Smallest permitted requested length
pub const RING_BUFFER_MIN_LENGTH: usize = 2;

/// Largest permitted requested length (and the backing array size)
pub const RING_BUFFER_MAX_LENGTH: usize = 64;

/// Circular FIFO of tokens with head/tail/load bookkeeping
///
/// Invariants: `load <= length`, `head` and `tail` are always `< length`,
/// `load == 0` means empty and `load == length` means full.
#[derive(Clone)]
pub struct RingBuffer {
    slots: [Token; RING_BUFFER_MAX_LENGTH],
    length: usize,
    head: usize,
    tail: usize,
    load: usize,
}

/// Largest power of two not above `n` (`n >= 1`)
const fn floor_power_of_two(n: usize) -> usize {
    1 << (usize::BITS - 1 - n.leading_zeros())
}

impl RingBuffer {
    /// A zero-capacity buffer, placeholder until `reinitialise`
    pub const UNINITIALISED: Self = Self {
        slots: [0; RING_BUFFER_MAX_LENGTH],
        length: 0,
        head: 0,
        tail: 0,
        load: 0,
    };

    /// Create an empty buffer
    ///
    /// The effective capacity is the largest power of two not above
    /// `capacity` (5 gives 4, 64 gives 64).
    ///
    /// # Errors
    ///
    /// Returns `LinkError::DefinitionError` if `capacity` is outside `2..=64`.
    pub fn initialise(capacity: usize) -> Result<Self, LinkError> {
        let mut buffer = Self::UNINITIALISED;
        buffer.reinitialise(capacity)?;
        Ok(buffer)
    }

    /// Reset this buffer in place with a new capacity
    pub fn reinitialise(&mut self, capacity: usize) -> Result<(), LinkError> {
        if !(RING_BUFFER_MIN_LENGTH..=RING_BUFFER_MAX_LENGTH).contains(&capacity) {
            return Err(LinkError::DefinitionError);
        }
        self.length = floor_power_of_two(capacity);
        self.reset();
        Ok(())
    }

    /// Empty the buffer and scrub stale tokens, keeping the capacity
    pub fn reset(&mut self) {
        self.slots = [0; RING_BUFFER_MAX_LENGTH];
        self.head = 0;
        self.tail = 0;
        self.load = 0;
    }

    /// Effective capacity in tokens
    pub fn capacity(&self) -> usize {
        self.length
    }

    /// Number of tokens currently held
    ///
    /// With `guarded` the read happens inside a critical region.
    pub fn fill_state(&self, guarded: bool) -> usize {
        critical_region::run(guarded, || self.load)
    }

    /// Free slots remaining
    pub fn free_space(&self) -> usize {
        self.length - self.load
    }

    pub fn is_empty(&self) -> bool {
        self.load == 0
    }

    pub fn is_full(&self) -> bool {
        self.load == self.length
    }

    /// Oldest token without removing it
    pub fn peek(&self) -> Option<Token> {
        if self.is_empty() {
            None
        } else {
            Some(self.slots[self.tail])
        }
    }

    /// Enqueue as many of `tokens` as fit, returning the count loaded
    pub fn load(&mut self, tokens: &[Token], guarded: bool) -> usize {
        critical_region::run(guarded, || {
            let count = tokens.len().min(self.free_space());
            let mask = self.length.wrapping_sub(1);
            for &token in &tokens[..count] {
                self.slots[self.head] = token;
                self.head = (self.head + 1) & mask;
            }
            self.load += count;
            count
        })
    }

    /// Dequeue up to `requested` tokens into `dest`, returning the count moved
    ///
    /// `requested` is also capped by `dest.len()`.
    pub fn unload(&mut self, dest: &mut [Token], requested: usize, guarded: bool) -> usize {
        critical_region::run(guarded, || {
            let count = requested.min(dest.len()).min(self.load);
            let mask = self.length.wrapping_sub(1);
            for slot in &mut dest[..count] {
                *slot = self.slots[self.tail];
                self.tail = (self.tail + 1) & mask;
            }
            self.load -= count;
            count
        })
    }

    /// Enqueue bytes, one per token
    pub fn load_bytes(&mut self, bytes: &[u8], guarded: bool) -> usize {
        critical_region::run(guarded, || {
            let mut count = 0;
            for &byte in bytes {
                if self.load(&[Token::from(byte)], false) == 0 {
                    break;
                }
                count += 1;
            }
            count
        })
    }

    /// Dequeue tokens into `dest`, keeping the low byte of each
    pub fn unload_bytes(&mut self, dest: &mut [u8], guarded: bool) -> usize {
        critical_region::run(guarded, || {
            let mut token = [0; 1];
            let mut count = 0;
            while count < dest.len() && self.unload(&mut token, 1, false) == 1 {
                dest[count] = token[0] as u8;
                count += 1;
            }
            count
        })
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::UNINITIALISED
    }
}
