//! Host fill/drain transfer state machine.
//!
//! A transfer moves whole rows between a host buffer and one endpoint of an
//! object FIFO, one row per step.
//!
//! # Transfer Lifecycle
//!
//! ```text
//! ┌─────────┐  slot    ┌───────────────┐  slot     ┌──────────┐
//! │ Created ├──busy───►│WaitingForLock ├──granted─►│  Active  │
//! └────┬────┘          └───────────────┘           └────┬─────┘
//!      │                                                │ all rows moved
//!      └──────────────── granted ──────────────►        ▼
//!                                                ┌──────────┐
//!                                                │ Complete │
//!                                                └──────────┘
//! ```
//!
//! - **MM2S (fill)**: host row -> producer slot of the FIFO
//! - **S2MM (drain)**: consumer slot of the FIFO -> host row

use super::{HostBuffer, HostBufferError};
use crate::fifo::{Acquire, FifoError, ObjectFifo, Role};
use thiserror::Error;

/// Direction of a host transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Memory to stream: host buffer into a FIFO (fill)
    MM2S,
    /// Stream to memory: FIFO into a host buffer (drain)
    S2MM,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::MM2S => write!(f, "MM2S"),
            TransferDirection::S2MM => write!(f, "S2MM"),
        }
    }
}

/// Transfer state in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not started
    Created,
    /// Waiting for a FIFO slot
    WaitingForLock,
    /// At least one row moved
    Active,
    /// All rows moved
    Complete,
}

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    Moved,
    Stalled,
    Complete,
}

/// Transfer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error(transparent)]
    Fifo(#[from] FifoError),

    #[error("{0}")]
    Host(#[from] HostBufferError),
}

/// A row-by-row transfer between host memory and a FIFO.
#[derive(Debug, Clone)]
pub struct Transfer {
    name: String,
    direction: TransferDirection,
    row_len: usize,
    total_rows: usize,
    rows_done: usize,
    state: TransferState,
}

impl Transfer {
    /// Fill a FIFO with `total_rows` rows of `row_len` elements.
    pub fn fill(name: impl Into<String>, total_rows: usize, row_len: usize) -> Self {
        Self::new(name, TransferDirection::MM2S, total_rows, row_len)
    }

    /// Drain `total_rows` rows of `row_len` elements out of a FIFO.
    pub fn drain(name: impl Into<String>, total_rows: usize, row_len: usize) -> Self {
        Self::new(name, TransferDirection::S2MM, total_rows, row_len)
    }

    fn new(
        name: impl Into<String>,
        direction: TransferDirection,
        total_rows: usize,
        row_len: usize,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            row_len,
            total_rows,
            rows_done: 0,
            state: if total_rows == 0 {
                TransferState::Complete
            } else {
                TransferState::Created
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn rows_done(&self) -> usize {
        self.rows_done
    }

    pub fn is_complete(&self) -> bool {
        self.state == TransferState::Complete
    }

    fn advance(&mut self) -> TransferStep {
        self.rows_done += 1;
        if self.rows_done == self.total_rows {
            log::debug!("{} {}: complete after {} rows", self.direction, self.name, self.rows_done);
            self.state = TransferState::Complete;
        } else {
            self.state = TransferState::Active;
        }
        TransferStep::Moved
    }

    /// Move one host row into the FIFO's producer side.
    pub fn step_fill<T: Copy + Default>(
        &mut self,
        host: &HostBuffer<T>,
        fifo: &mut ObjectFifo<T>,
    ) -> Result<TransferStep, TransferError> {
        debug_assert_eq!(self.direction, TransferDirection::MM2S);
        if self.is_complete() {
            return Ok(TransferStep::Complete);
        }

        let slot = match fifo.acquire(Role::Producer, 1)? {
            Acquire::Stalled => {
                self.state = TransferState::WaitingForLock;
                return Ok(TransferStep::Stalled);
            }
            Acquire::Granted(handles) => handles[0],
        };

        let row = host.read_row(self.rows_done, self.row_len)?;
        let n = row.len().min(fifo.row_len());
        fifo.row_mut(slot)[..n].copy_from_slice(&row[..n]);
        fifo.release(Role::Producer, 1)?;
        Ok(self.advance())
    }

    /// Move one row from the FIFO's consumer side into host memory.
    pub fn step_drain<T: Copy + Default>(
        &mut self,
        fifo: &mut ObjectFifo<T>,
        host: &mut HostBuffer<T>,
    ) -> Result<TransferStep, TransferError> {
        debug_assert_eq!(self.direction, TransferDirection::S2MM);
        if self.is_complete() {
            return Ok(TransferStep::Complete);
        }

        let slot = match fifo.acquire(Role::Consumer, 1)? {
            Acquire::Stalled => {
                self.state = TransferState::WaitingForLock;
                return Ok(TransferStep::Stalled);
            }
            Acquire::Granted(handles) => handles[0],
        };

        let n = self.row_len.min(fifo.row_len());
        host.write_row(self.rows_done, &fifo.row(slot)[..n])?;
        fifo.release(Role::Consumer, 1)?;
        Ok(self.advance())
    }
}
