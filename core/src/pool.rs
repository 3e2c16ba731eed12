//! Free-list of pre-allocated ring buffers
//!
//! A pool owns `N` backing `RingBuffer`s and an indirect array of `N` slots,
//! each either empty or naming one free backing buffer. `pull` hands a buffer
//! out as a `BufferHandle` and empties its slot; `push` republishes the
//! buffer and scrubs it so the next puller never sees stale tokens.
//!
//! `BufferHandle` is neither `Copy` nor `Clone` and `push` consumes it, so
//! pushing the same buffer twice does not compile. Pool accounting can still
//! be violated by pushing a handle that came from a different pool; that is
//! detected and reported as `LinkError::DefinitionError`.
//!
//! # Example
//!
//! ```
//! use planelink_core::pool::BufferPool;
//!
//! let mut pool: BufferPool<4> = BufferPool::set_initialise(16).unwrap();
//! let handle = pool.pull(true).unwrap();
//! pool.buffer_mut(&handle).load_bytes(b"hi", true);
//! pool.push(handle, true).unwrap();
//! assert_eq!(pool.free_count(), 4);
//! ```

use crate::critical_region;
use crate::error::LinkError;
use crate::ring_buffer::RingBuffer;

/// Exclusive claim on one pooled buffer
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferHandle {
    index: u8,
}

impl BufferHandle {
    /// Backing buffer index inside its pool
    pub fn index(&self) -> usize {
        usize::from(self.index)
    }
}

/// Fixed set of `N` ring buffers managed as a free-list
pub struct BufferPool<const N: usize> {
    buffers: [RingBuffer; N],
    available: [Option<u8>; N],
    length: usize,
}

impl<const N: usize> BufferPool<N> {
    const _ASSERT: () = assert!(N <= u8::MAX as usize, "pool too large for u8 handles");

    /// Initialise all `N` buffers with `length` and mark every one free
    ///
    /// # Errors
    ///
    /// - `LinkError::NullOrMissingParameter` if `N == 0`
    /// - `LinkError::DefinitionError` if `length` is not a valid ring length
    pub fn set_initialise(length: usize) -> Result<Self, LinkError> {
        #[allow(clippy::let_unit_value)]
        let () = Self::_ASSERT;
        if N == 0 {
            return Err(LinkError::NullOrMissingParameter);
        }

        let mut buffers: [RingBuffer; N] = core::array::from_fn(|_| RingBuffer::UNINITIALISED);
        for buffer in buffers.iter_mut() {
            buffer.reinitialise(length)?;
        }

        Ok(Self {
            buffers,
            available: core::array::from_fn(|i| Some(i as u8)),
            length,
        })
    }

    /// Take a free buffer, scanning from the highest slot down
    ///
    /// Returns `None` when every buffer is in flight.
    pub fn pull(&mut self, guarded: bool) -> Option<BufferHandle> {
        let taken = critical_region::run(guarded, || {
            self.available
                .iter_mut()
                .rev()
                .find(|slot| slot.is_some())
                .and_then(Option::take)
        });

        match taken {
            Some(index) => Some(BufferHandle { index }),
            None => {
                warn!("buffer pool exhausted ({} buffers in flight)", N);
                None
            }
        }
    }

    /// Return a buffer to the free-list and scrub it
    ///
    /// # Errors
    ///
    /// - `LinkError::ParameterOutOfRange` if the handle does not index this pool
    /// - `LinkError::DefinitionError` if the buffer is already free or no slot
    ///   is empty; either means pool accounting has been violated
    pub fn push(&mut self, handle: BufferHandle, guarded: bool) -> Result<(), LinkError> {
        let index = handle.index;
        if usize::from(index) >= N {
            return Err(LinkError::ParameterOutOfRange);
        }

        let length = self.length;
        let result = critical_region::run(guarded, || {
            if self.available.contains(&Some(index)) {
                return Err(LinkError::DefinitionError);
            }
            let slot = self
                .available
                .iter_mut()
                .find(|slot| slot.is_none())
                .ok_or(LinkError::DefinitionError)?;
            *slot = Some(index);
            self.buffers[usize::from(index)].reinitialise(length)
        });

        if result.is_err() {
            error!("buffer pool accounting violated pushing buffer {}", index);
        }
        result
    }

    /// Read access to a held buffer
    pub fn buffer(&self, handle: &BufferHandle) -> &RingBuffer {
        &self.buffers[handle.index()]
    }

    /// Write access to a held buffer
    pub fn buffer_mut(&mut self, handle: &BufferHandle) -> &mut RingBuffer {
        &mut self.buffers[handle.index()]
    }

    /// Buffers currently free
    pub fn free_count(&self) -> usize {
        self.available.iter().filter(|slot| slot.is_some()).count()
    }

    /// Total buffers in the pool
    pub const fn size(&self) -> usize {
        N
    }

    /// Requested length each buffer is (re)initialised with
    pub fn buffer_length(&self) -> usize {
        self.length
    }
}
