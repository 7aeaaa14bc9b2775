//! Scheduling trace.
//!
//! Rows are identified by their FIFO sequence number, so for the input
//! queue a row's id is its row index in the image.

use super::Phase;
use smallvec::SmallVec;

/// Row ids touched by one event.
pub type RowIds = SmallVec<[u64; 8]>;

/// Queue an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Input,
    Output,
    Coefficients,
}

/// One scheduling event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Acquire {
        queue: QueueKind,
        rows: RowIds,
    },
    Release {
        queue: QueueKind,
        rows: RowIds,
    },
    Compute {
        output_row: usize,
        multiplier_index: usize,
        phase: Phase,
        window: RowIds,
        coefficient_row: Option<u64>,
    },
}

/// Ordered record of scheduler events.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Total rows acquired on `queue`.
    pub fn acquired_rows(&self, queue: QueueKind) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                TraceEvent::Acquire { queue: q, rows } if *q == queue => rows.len(),
                _ => 0,
            })
            .sum()
    }

    /// Total rows released on `queue`.
    pub fn released_rows(&self, queue: QueueKind) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                TraceEvent::Release { queue: q, rows } if *q == queue => rows.len(),
                _ => 0,
            })
            .sum()
    }

    /// Window of every compute call, in call order.
    pub fn windows(&self) -> Vec<Vec<u64>> {
        self.compute_calls().map(|(_, _, w)| w.to_vec()).collect()
    }

    /// `(output_row, phase, window)` of every compute call.
    pub fn compute_calls(&self) -> impl Iterator<Item = (usize, Phase, &RowIds)> + '_ {
        self.events.iter().filter_map(|e| match e {
            TraceEvent::Compute {
                output_row,
                phase,
                window,
                ..
            } => Some((*output_row, *phase, window)),
            _ => None,
        })
    }

    /// Number of input acquire calls (not rows).
    pub fn input_acquire_calls(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Acquire { queue: QueueKind::Input, .. }))
            .count()
    }
}
