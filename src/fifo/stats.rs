//! Per-endpoint acquire/release statistics.
//!
//! Counts are in rows, not calls: `acquire(3)` adds 3 to `acquires`.
//! Stall bookkeeping follows the lock contention model: a failed acquire
//! records one stall cycle, the next successful acquire folds the
//! consecutive stall run into the totals.

/// Statistics for one FIFO endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Rows acquired
    pub acquires: u64,
    /// Rows released
    pub releases: u64,
    /// Total cycles spent stalled on acquire
    pub stall_cycles: u64,
    /// Number of acquires that had to wait
    pub stall_count: u64,
    /// Longest consecutive stall observed
    pub max_stall: u64,
    /// Peak number of rows held at once
    pub peak_outstanding: usize,
    /// Current consecutive stall cycles (reset on success)
    current_stall: u64,
}

impl EndpointStats {
    /// Record a successful acquire of `rows` rows with `outstanding` now held.
    pub fn record_acquire(&mut self, rows: usize, outstanding: usize) {
        self.acquires += rows as u64;
        let stall = self.current_stall;
        self.stall_cycles += stall;
        if stall > 0 {
            self.stall_count += 1;
            self.max_stall = self.max_stall.max(stall);
        }
        self.current_stall = 0;
        self.peak_outstanding = self.peak_outstanding.max(outstanding);
    }

    /// Record a failed acquire attempt.
    pub fn record_stall(&mut self) {
        self.current_stall += 1;
    }

    /// Record `rows` released rows.
    pub fn record_release(&mut self, rows: usize) {
        self.releases += rows as u64;
    }

    /// Current consecutive stall cycles.
    pub fn current_stall(&self) -> u64 {
        self.current_stall
    }
}

/// Statistics for both endpoints of a FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStats {
    pub producer: EndpointStats,
    pub consumer: EndpointStats,
}

impl FifoStats {
    /// Rows that entered the queue but have not left the consumer side yet.
    pub fn in_flight(&self) -> u64 {
        self.producer.releases.saturating_sub(self.consumer.releases)
    }
}
