//! Bounded object FIFOs of row buffers.
//!
//! An object FIFO is a ring of `depth` equally sized slots shared by two
//! endpoints:
//!
//! ```text
//!              producer lock (free slots)
//!   ┌──────────┐      ┌────┬────┬────┬────┐      ┌──────────┐
//!   │ Producer ├─────►│ s0 │ s1 │ s2 │ s3 ├─────►│ Consumer │
//!   └──────────┘      └────┴────┴────┴────┘      └──────────┘
//!              consumer lock (filled slots)
//! ```
//!
//! Each endpoint acquires slots in ring order and releases them in the same
//! order. Releasing on the producer side publishes the rows to the consumer;
//! releasing on the consumer side returns the slots to the free pool.
//!
//! # Stalls vs. protocol violations
//!
//! Asking for more rows than the opposite side has made available is a
//! *stall*: [`ObjectFifo::acquire`] returns [`Acquire::Stalled`] and the
//! caller retries on a later cycle. Holding more rows than the FIFO depth,
//! releasing rows that are not held, or releasing out of order are
//! bookkeeping bugs and come back as [`FifoError`].
//!
//! # Example
//!
//! ```
//! use xdna_upscale::fifo::{Acquire, ObjectFifo, Role};
//!
//! let mut fifo: ObjectFifo<u8> = ObjectFifo::new("in", 2, 4);
//!
//! let Acquire::Granted(slots) = fifo.acquire(Role::Producer, 1).unwrap() else {
//!     panic!("free slot expected");
//! };
//! fifo.row_mut(slots[0]).copy_from_slice(&[1, 2, 3, 4]);
//! fifo.release(Role::Producer, 1).unwrap();
//!
//! let Acquire::Granted(rows) = fifo.acquire(Role::Consumer, 1).unwrap() else {
//!     panic!("filled slot expected");
//! };
//! assert_eq!(fifo.row(rows[0]), &[1, 2, 3, 4]);
//! ```

pub mod lock;
pub mod stats;

pub use lock::{Lock, LockResult};
pub use stats::{EndpointStats, FifoStats};

use smallvec::SmallVec;
use std::collections::VecDeque;
use thiserror::Error;

/// Which side of a FIFO an operation is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Fills slots (host fill, or the worker writing output rows)
    Producer,
    /// Reads slots (the worker reading input rows, or host drain)
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// Handle to one acquired slot.
///
/// `seq` is the position of the element in the stream that passed through
/// the FIFO (0 for the first row ever produced). It is the identity of the
/// row: the nth consumer acquire always yields `seq == n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle {
    /// Slot index in the ring
    pub slot: usize,
    /// Stream sequence number
    pub seq: u64,
}

/// Handles returned by a single acquire.
pub type Handles = SmallVec<[RowHandle; 8]>;

/// Outcome of an acquire request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// All requested slots were granted, oldest first
    Granted(Handles),
    /// Not enough slots available yet; nothing was acquired
    Stalled,
}

/// Object FIFO protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FifoError {
    #[error("{fifo}: {role} acquired zero rows")]
    ZeroAcquire { fifo: String, role: Role },

    #[error("{fifo}: {role} would hold {requested} + {held} rows, depth is {depth}")]
    ExceedsDepth {
        fifo: String,
        role: Role,
        held: usize,
        requested: usize,
        depth: usize,
    },

    #[error("{fifo}: {role} released {requested} rows but holds {held}")]
    ReleaseExceedsHeld {
        fifo: String,
        role: Role,
        held: usize,
        requested: usize,
    },

    #[error("{fifo}: {role} released row #{got} while row #{expected} is older")]
    OutOfOrderRelease {
        fifo: String,
        role: Role,
        expected: u64,
        got: u64,
    },

    #[error("{fifo}: {role} reads row #{seq}, which it does not hold")]
    RowNotHeld { fifo: String, role: Role, seq: u64 },
}

/// Ring cursor and holdings of one endpoint.
#[derive(Debug, Default)]
struct Endpoint {
    held: VecDeque<RowHandle>,
    next_slot: usize,
    next_seq: u64,
    stats: EndpointStats,
}

/// A bounded FIFO of fixed-length row buffers.
#[derive(Debug)]
pub struct ObjectFifo<T> {
    name: String,
    depth: usize,
    row_len: usize,
    slots: Vec<Vec<T>>,
    producer_lock: Lock,
    consumer_lock: Lock,
    producer: Endpoint,
    consumer: Endpoint,
}

impl<T: Copy + Default> ObjectFifo<T> {
    /// Create a FIFO of `depth` slots, each `row_len` elements long.
    pub fn new(name: impl Into<String>, depth: usize, row_len: usize) -> Self {
        let depth_u32 = depth as u32;
        Self {
            name: name.into(),
            depth,
            row_len,
            slots: vec![vec![T::default(); row_len]; depth],
            producer_lock: Lock::new(depth_u32, depth_u32),
            consumer_lock: Lock::new(0, depth_u32),
            producer: Endpoint::default(),
            consumer: Endpoint::default(),
        }
    }

    /// FIFO name (used in logs and errors).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Elements per slot.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Producer => &self.producer,
            Role::Consumer => &self.consumer,
        }
    }

    /// Rows currently held by `role`.
    pub fn held(&self, role: Role) -> usize {
        self.endpoint(role).held.len()
    }

    /// Rows `role` could acquire right now without stalling.
    pub fn available(&self, role: Role) -> usize {
        match role {
            Role::Producer => self.producer_lock.value as usize,
            Role::Consumer => self.consumer_lock.value as usize,
        }
    }

    /// Acquire `count` slots for `role`.
    pub fn acquire(&mut self, role: Role, count: usize) -> Result<Acquire, FifoError> {
        if count == 0 {
            return Err(FifoError::ZeroAcquire {
                fifo: self.name.clone(),
                role,
            });
        }

        let depth = self.depth;
        let (lock, endpoint) = match role {
            Role::Producer => (&mut self.producer_lock, &mut self.producer),
            Role::Consumer => (&mut self.consumer_lock, &mut self.consumer),
        };

        let held = endpoint.held.len();
        if held + count > depth {
            return Err(FifoError::ExceedsDepth {
                fifo: self.name.clone(),
                role,
                held,
                requested: count,
                depth,
            });
        }

        if lock.acquire_with_value(count as u32) != LockResult::Success {
            endpoint.stats.record_stall();
            return Ok(Acquire::Stalled);
        }

        let mut handles = Handles::new();
        for _ in 0..count {
            let handle = RowHandle {
                slot: endpoint.next_slot,
                seq: endpoint.next_seq,
            };
            endpoint.next_slot = (endpoint.next_slot + 1) % depth;
            endpoint.next_seq += 1;
            endpoint.held.push_back(handle);
            handles.push(handle);
        }
        endpoint.stats.record_acquire(count, endpoint.held.len());

        log::trace!(
            "{}: {} acquired {:?}",
            self.name,
            role,
            handles.iter().map(|h| h.seq).collect::<Vec<_>>()
        );
        Ok(Acquire::Granted(handles))
    }

    /// Release the oldest `count` rows held by `role`.
    pub fn release(&mut self, role: Role, count: usize) -> Result<Handles, FifoError> {
        let held = self.held(role);
        if count > held {
            return Err(FifoError::ReleaseExceedsHeld {
                fifo: self.name.clone(),
                role,
                held,
                requested: count,
            });
        }

        let endpoint = match role {
            Role::Producer => &mut self.producer,
            Role::Consumer => &mut self.consumer,
        };
        let released: Handles = endpoint.held.drain(..count).collect();
        endpoint.stats.record_release(count);
        self.hand_over(role, count);

        log::trace!(
            "{}: {} released {:?}",
            self.name,
            role,
            released.iter().map(|h| h.seq).collect::<Vec<_>>()
        );
        Ok(released)
    }

    /// Release exactly `handle`, which must be the oldest row held by `role`.
    pub fn release_handle(&mut self, role: Role, handle: RowHandle) -> Result<(), FifoError> {
        let oldest = self.endpoint(role).held.front().copied();
        match oldest {
            None => Err(FifoError::ReleaseExceedsHeld {
                fifo: self.name.clone(),
                role,
                held: 0,
                requested: 1,
            }),
            Some(oldest) if oldest != handle => Err(FifoError::OutOfOrderRelease {
                fifo: self.name.clone(),
                role,
                expected: oldest.seq,
                got: handle.seq,
            }),
            Some(_) => self.release(role, 1).map(|_| ()),
        }
    }

    /// Publish released slots to the opposite side.
    fn hand_over(&mut self, role: Role, count: usize) {
        let lock = match role {
            Role::Producer => &mut self.consumer_lock,
            Role::Consumer => &mut self.producer_lock,
        };
        // Endpoint bookkeeping bounds holdings by depth, so this cannot saturate.
        let result = lock.release_with_value(count as u32);
        debug_assert_eq!(result, LockResult::Success);
    }

    /// Read access to an acquired slot.
    pub fn row(&self, handle: RowHandle) -> &[T] {
        &self.slots[handle.slot]
    }

    /// Write access to an acquired slot.
    pub fn row_mut(&mut self, handle: RowHandle) -> &mut [T] {
        &mut self.slots[handle.slot]
    }

    /// Statistics for both endpoints.
    pub fn stats(&self) -> FifoStats {
        FifoStats {
            producer: self.producer.stats,
            consumer: self.consumer.stats,
        }
    }

    /// Current stall run of `role` (cycles since its last successful acquire).
    pub fn current_stall(&self, role: Role) -> u64 {
        self.endpoint(role).stats.current_stall()
    }

    /// Return to the freshly constructed state. Slot contents are kept.
    pub fn reset(&mut self) {
        let depth = self.depth as u32;
        self.producer_lock = Lock::new(depth, depth);
        self.consumer_lock = Lock::new(0, depth);
        self.producer = Endpoint::default();
        self.consumer = Endpoint::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(result: Result<Acquire, FifoError>) -> Handles {
        match result.unwrap() {
            Acquire::Granted(h) => h,
            Acquire::Stalled => panic!("unexpected stall"),
        }
    }

    fn push_row(fifo: &mut ObjectFifo<u8>, value: u8) {
        let h = granted(fifo.acquire(Role::Producer, 1));
        fifo.row_mut(h[0]).fill(value);
        fifo.release(Role::Producer, 1).unwrap();
    }

    #[test]
    fn test_consumer_stalls_on_empty() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 3, 2);
        assert_eq!(fifo.acquire(Role::Consumer, 1).unwrap(), Acquire::Stalled);
        assert_eq!(fifo.held(Role::Consumer), 0);
        assert_eq!(fifo.current_stall(Role::Consumer), 1);
    }

    #[test]
    fn test_producer_stalls_when_full() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 2, 2);
        push_row(&mut fifo, 1);
        push_row(&mut fifo, 2);
        assert_eq!(fifo.acquire(Role::Producer, 1).unwrap(), Acquire::Stalled);

        granted(fifo.acquire(Role::Consumer, 1));
        fifo.release(Role::Consumer, 1).unwrap();
        assert_eq!(fifo.available(Role::Producer), 1);
        push_row(&mut fifo, 3);
    }

    #[test]
    fn test_fifo_identity_round_trip() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 3, 1);
        let mut produced = Vec::new();
        let mut consumed = Vec::new();

        for value in 0..10u8 {
            let h = granted(fifo.acquire(Role::Producer, 1));
            produced.push(h[0].seq);
            fifo.row_mut(h[0])[0] = value;
            fifo.release(Role::Producer, 1).unwrap();

            let c = granted(fifo.acquire(Role::Consumer, 1));
            consumed.push(c[0].seq);
            assert_eq!(c[0].slot, h[0].slot);
            assert_eq!(fifo.row(c[0])[0], value);
            fifo.release(Role::Consumer, 1).unwrap();
        }

        assert_eq!(produced, consumed);
        assert_eq!(consumed, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_acquire_multiple_in_ring_order() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 4, 1);
        for v in 0..4 {
            push_row(&mut fifo, v);
        }
        let rows = granted(fifo.acquire(Role::Consumer, 3));
        let slots: Vec<usize> = rows.iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        let values: Vec<u8> = rows.iter().map(|h| fifo.row(*h)[0]).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_exceeds_depth_is_error() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 2, 1);
        granted(fifo.acquire(Role::Producer, 2));
        let err = fifo.acquire(Role::Producer, 1).unwrap_err();
        assert!(matches!(err, FifoError::ExceedsDepth { held: 2, requested: 1, depth: 2, .. }));
    }

    #[test]
    fn test_release_more_than_held() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 2, 1);
        granted(fifo.acquire(Role::Producer, 1));
        let err = fifo.release(Role::Producer, 2).unwrap_err();
        assert!(matches!(err, FifoError::ReleaseExceedsHeld { held: 1, requested: 2, .. }));
    }

    #[test]
    fn test_release_handle_out_of_order() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 3, 1);
        let h = granted(fifo.acquire(Role::Producer, 3));

        let err = fifo.release_handle(Role::Producer, h[2]).unwrap_err();
        assert!(matches!(err, FifoError::OutOfOrderRelease { expected: 0, got: 2, .. }));

        fifo.release_handle(Role::Producer, h[0]).unwrap();
        fifo.release_handle(Role::Producer, h[1]).unwrap();
        assert_eq!(fifo.held(Role::Producer), 1);
    }

    #[test]
    fn test_zero_acquire_is_error() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 2, 1);
        assert!(matches!(
            fifo.acquire(Role::Consumer, 0),
            Err(FifoError::ZeroAcquire { .. })
        ));
    }

    #[test]
    fn test_stats_and_reset() {
        let mut fifo: ObjectFifo<u8> = ObjectFifo::new("f", 3, 1);
        push_row(&mut fifo, 7);
        push_row(&mut fifo, 8);
        granted(fifo.acquire(Role::Consumer, 2));
        fifo.release(Role::Consumer, 2).unwrap();

        let stats = fifo.stats();
        assert_eq!(stats.producer.acquires, 2);
        assert_eq!(stats.producer.releases, 2);
        assert_eq!(stats.consumer.acquires, 2);
        assert_eq!(stats.consumer.peak_outstanding, 2);
        assert_eq!(stats.in_flight(), 0);

        fifo.reset();
        assert_eq!(fifo.stats(), FifoStats::default());
        assert_eq!(fifo.available(Role::Producer), 3);
        assert_eq!(fifo.available(Role::Consumer), 0);
    }
}
