//! Bounded circular frame queue shared by the decode and render threads.
//!
//! # Why a ring and not a channel? (for beginners)
//!
//! A video stream is only interesting *now*.  If the renderer falls behind,
//! showing it a backlog of stale frames makes the display lag further.  The
//! ring therefore never blocks the producer: when it is full, the oldest
//! unread frame is dropped to make room.  The consumer never blocks either;
//! `pop` on an empty ring simply returns `None` and the caller backs off.
//!
//! # Cursor invariant
//!
//! The ring keeps two cursors into a fixed array of `capacity` slots:
//!
//! ```text
//!   next_read == next_write            → empty
//!   (next_write + 1) % cap == next_read → full (capacity − 1 unread frames)
//! ```
//!
//! One slot is always left unused so "full" and "empty" never look the same.
//! The number of unread frames is therefore always `< capacity`.
//!
//! Both operations take the single mutex only for the slot move and cursor
//! update; no decoding or I/O ever happens under the lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Slot count used when no capacity is configured.
pub const DEFAULT_FRAME_RING_CAPACITY: usize = 30;

/// Errors raised while allocating a ring.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameRingError {
    /// A ring needs at least two slots to hold one frame.
    #[error("frame ring capacity must be at least 2, got {0}")]
    CapacityTooSmall(usize),

    /// The slot array could not be allocated.
    #[error("failed to allocate {0} frame slots")]
    AllocationFailed(usize),
}

struct RingState<T> {
    slots: Vec<Option<T>>,
    next_read: usize,
    next_write: usize,
    evicted: u64,
}

/// Fixed-capacity, mutex-guarded circular buffer where newest data wins.
///
/// Allocated once and reused across reconnects; slots are overwritten in place.
pub struct FrameRing<T> {
    state: Mutex<RingState<T>>,
    capacity: usize,
}

impl<T> FrameRing<T> {
    /// Allocates a ring with `capacity` slots (at most `capacity - 1` unread frames).
    ///
    /// # Errors
    ///
    /// Returns [`FrameRingError::CapacityTooSmall`] for fewer than two slots and
    /// [`FrameRingError::AllocationFailed`] if the slot array cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self, FrameRingError> {
        if capacity < 2 {
            return Err(FrameRingError::CapacityTooSmall(capacity));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| FrameRingError::AllocationFailed(capacity))?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            state: Mutex::new(RingState {
                slots,
                next_read: 0,
                next_write: 0,
                evicted: 0,
            }),
            capacity,
        })
    }

    /// Stores `frame`, evicting the oldest unread frame if the ring is full.
    ///
    /// Never blocks on the consumer.  Returns `true` when a frame was evicted.
    pub fn push(&self, frame: T) -> bool {
        let mut state = self.lock();
        let write = state.next_write;
        state.slots[write] = Some(frame);

        let advanced = (write + 1) % self.capacity;
        let mut evicted = false;
        if advanced == state.next_read {
            state.next_read = (state.next_read + 1) % self.capacity;
            state.evicted += 1;
            evicted = true;
        }
        state.next_write = advanced;
        evicted
    }

    /// Removes and returns the oldest unread frame, or `None` when empty.
    ///
    /// Never blocks waiting for a producer.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        if state.next_read == state.next_write {
            return None;
        }
        let read = state.next_read;
        let frame = state.slots[read].take();
        state.next_read = (read + 1) % self.capacity;
        frame
    }

    /// Number of frames available to `pop`.
    pub fn len(&self) -> usize {
        let state = self.lock();
        (state.next_write + self.capacity - state.next_read) % self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count; at most `capacity() - 1` frames are ever unread.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unread frames dropped by `push` since the ring was created.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Discards all unread frames, e.g. before a new stream starts.
    pub fn clear(&self) {
        let mut state = self.lock();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.next_read = 0;
        state.next_write = 0;
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        // A panic while holding the lock cannot leave the cursors half-updated,
        // so a poisoned ring is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ring_is_empty() {
        let ring: FrameRing<u32> = FrameRing::with_capacity(4).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn test_capacity_below_two_is_rejected() {
        assert_eq!(
            FrameRing::<u8>::with_capacity(1).err(),
            Some(FrameRingError::CapacityTooSmall(1))
        );
    }

    #[test]
    fn test_push_then_pop_is_fifo() {
        // Arrange
        let ring = FrameRing::with_capacity(4).unwrap();

        // Act
        ring.push(1);
        ring.push(2);

        // Assert
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_ring_holds_capacity_minus_one() {
        // Arrange
        let ring = FrameRing::with_capacity(4).unwrap();

        // Act – three pushes fill a 4-slot ring without eviction
        let evictions: Vec<bool> = (0..3).map(|i| ring.push(i)).collect();

        // Assert
        assert_eq!(evictions, vec![false, false, false]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_push_on_full_ring_evicts_oldest() {
        // Arrange
        let ring = FrameRing::with_capacity(4).unwrap();
        for i in 0..3 {
            ring.push(i);
        }

        // Act
        let evicted = ring.push(3);

        // Assert
        assert!(evicted);
        assert_eq!(ring.evicted(), 1);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn test_interleaved_push_pop_wraps_cursors() {
        let ring = FrameRing::with_capacity(3).unwrap();
        for round in 0..10 {
            ring.push(round);
            assert_eq!(ring.pop(), Some(round));
        }
        assert!(ring.is_empty());
        assert_eq!(ring.evicted(), 0);
    }

    #[test]
    fn test_clear_discards_unread_frames() {
        let ring = FrameRing::with_capacity(5).unwrap();
        ring.push("a");
        ring.push("b");

        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
        ring.push("c");
        assert_eq!(ring.pop(), Some("c"));
    }
}
