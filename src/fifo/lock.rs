//! Semaphore locks guarding object FIFO slots.
//!
//! Every object FIFO uses two counting locks, the same way the AIE2 tile
//! lock banks are programmed for an objectfifo:
//!
//! - **Producer lock**: counts free slots, starts at `depth`
//! - **Consumer lock**: counts filled slots, starts at 0
//!
//! # Semaphore Model (AM025)
//!
//! - Acquire: waits until `value >= n`, then subtracts `n`
//! - Release: adds `n`, saturating at the lock ceiling
//!
//! A failed acquire leaves the value untouched; the requester stalls and
//! retries on a later cycle.

/// Result of a lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// Operation succeeded
    Success,
    /// Operation failed - not enough value to subtract
    WouldUnderflow,
    /// Release saturated at the ceiling
    WouldOverflow,
}

/// Counting semaphore with a fixed ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lock {
    /// Current semaphore count
    pub value: u32,
    /// Ceiling (the FIFO depth)
    pub max_value: u32,
    /// Set when a release would exceed `max_value`
    pub overflow: bool,
}

impl Lock {
    /// Create a lock with an initial value, clamped to `max_value`.
    #[inline]
    pub fn new(value: u32, max_value: u32) -> Self {
        Self {
            value: value.min(max_value),
            max_value,
            overflow: false,
        }
    }

    /// Acquire `count` units if available.
    ///
    /// Returns `LockResult::WouldUnderflow` without changing the value if the
    /// lock holds fewer than `count` units.
    #[inline]
    pub fn acquire_with_value(&mut self, count: u32) -> LockResult {
        if self.value < count {
            return LockResult::WouldUnderflow;
        }
        self.value -= count;
        LockResult::Success
    }

    /// Release `count` units, saturating at the ceiling.
    #[inline]
    pub fn release_with_value(&mut self, count: u32) -> LockResult {
        let new_value = self.value.saturating_add(count);
        if new_value > self.max_value {
            self.overflow = true;
            self.value = self.max_value;
            return LockResult::WouldOverflow;
        }
        self.value = new_value;
        LockResult::Success
    }
}
