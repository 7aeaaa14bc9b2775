//! Sliding-window row scheduler.
//!
//! The worker body of every pipeline: pull input rows from the input FIFO,
//! keep a window of `K` rows in flight, call the kernel once per output
//! multiplier index, and hand each output row to the output FIFO.
//!
//! # Phases
//!
//! For an image of `H` rows and a window with `before` rows above and
//! `after` rows below the centre:
//!
//! | Phase | Output rows | Input acquires | Input releases |
//! |-------|-------------|----------------|----------------|
//! | `Priming(s)` | `s < before` | `after + 1` at s = 0, then 1 | 0 |
//! | `SteadyState` | `before ..= H - after - 1` | 1 | 1 |
//! | `Shrinking(s)` | last `after` rows | 0 | 1 (none on the final row) |
//! | `Drain` | - | 0 | everything still held |
//!
//! Every image row is acquired exactly once and released exactly once.
//! Border positions reuse the handle of the edge row; they never trigger
//! an extra acquire.
//!
//! # Stepping
//!
//! [`SlidingWindowScheduler::step`] performs one sub-stage (gather, one
//! kernel call, or retire) and returns. If an acquire cannot be satisfied
//! it returns [`StepOutcome::Stalled`] and the next call retries the same
//! sub-stage, which is how the worker waits on host fill and drain.

pub mod trace;

pub use trace::{QueueKind, RowIds, Trace, TraceEvent};

use crate::fifo::{Acquire, FifoError, Handles, ObjectFifo, Role, RowHandle};
use crate::kernel::{ComputeKernel, KernelCall};
use crate::window::{BorderMode, WindowShape};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Position of the window relative to the image edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Window still reaches above row 0 (stage index from the top)
    Priming(usize),
    /// Window fully inside the image
    SteadyState,
    /// Window reaches below row `H - 1` (stage index from the first such row)
    Shrinking(usize),
    /// All output rows produced; held rows are about to be returned
    Drain,
    /// Nothing left to do
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Priming(s) => write!(f, "priming[{}]", s),
            Phase::SteadyState => write!(f, "steady"),
            Phase::Shrinking(s) => write!(f, "shrinking[{}]", s),
            Phase::Drain => write!(f, "drain"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Static parameters of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Image height `H`
    pub height: usize,
    /// Window geometry
    pub window: WindowShape,
    /// Edge handling
    pub border: BorderMode,
    /// Kernel calls (output rows) per window
    pub output_multiplier: usize,
    /// Output width passed to the kernel
    pub out_width: usize,
}

/// Why a step could not make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Waiting for input rows up to and including `row`
    InputRows { row: usize },
    /// Waiting for a free output slot
    OutputSlot { output_row: usize },
    /// Waiting for the coefficient rows to be loaded
    Coefficients { rows: usize },
}

impl std::fmt::Display for StallReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallReason::InputRows { row } => write!(f, "waiting for input row {}", row),
            StallReason::OutputSlot { output_row } => {
                write!(f, "waiting for an output slot for row {}", output_row)
            }
            StallReason::Coefficients { rows } => {
                write!(f, "waiting for {} coefficient rows", rows)
            }
        }
    }
}

/// Result of one scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Progress,
    Stalled(StallReason),
    Done,
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Input rows acquired
    pub input_acquires: usize,
    /// Input rows released
    pub input_releases: usize,
    /// Output rows written (one per kernel call)
    pub output_rows: usize,
    /// Largest number of input rows held at once
    pub peak_held: usize,
    /// Steps that stalled
    pub stalls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStage {
    Gather,
    Compute(usize),
    Retire,
}

/// Resumable sliding-window worker.
#[derive(Debug)]
pub struct SlidingWindowScheduler {
    config: SchedulerConfig,
    phase: Phase,
    output_row: usize,
    stage: RowStage,
    /// Input rows held, oldest first (`held[i].seq` is the row index)
    held: VecDeque<RowHandle>,
    /// Coefficient rows, held from first step to drain
    coefficients: Option<Handles>,
    stats: SchedulerStats,
    trace: Option<Trace>,
}

impl SlidingWindowScheduler {
    /// Create a scheduler for one pass.
    ///
    /// # Panics
    ///
    /// Panics if `config.height` is below the window size or the output
    /// multiplier is zero. `Pipeline::assemble` rejects both with a
    /// `ConfigError` before a scheduler is built.
    pub fn new(config: SchedulerConfig) -> Self {
        assert!(
            config.height >= config.window.size,
            "height {} is below the {}-row window",
            config.height,
            config.window.size
        );
        assert!(config.output_multiplier > 0, "output multiplier must be at least 1");
        Self {
            config,
            phase: Self::phase_for(&config, 0),
            output_row: 0,
            stage: RowStage::Gather,
            held: VecDeque::with_capacity(config.window.size),
            coefficients: None,
            stats: SchedulerStats::default(),
            trace: None,
        }
    }

    /// Enable event tracing.
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(Trace::new());
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Index of the output row being produced.
    pub fn output_row(&self) -> usize {
        self.output_row
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Input rows currently held.
    pub fn held_rows(&self) -> impl Iterator<Item = u64> + '_ {
        self.held.iter().map(|h| h.seq)
    }

    /// Rewind for another pass over fresh FIFOs. Keeps tracing on if it was on.
    pub fn reset(&mut self) {
        self.phase = Self::phase_for(&self.config, 0);
        self.output_row = 0;
        self.stage = RowStage::Gather;
        self.held.clear();
        self.coefficients = None;
        self.stats = SchedulerStats::default();
        if let Some(trace) = self.trace.as_mut() {
            trace.clear();
        }
    }

    fn phase_for(config: &SchedulerConfig, output_row: usize) -> Phase {
        let shape = config.window;
        let shrink_start = config.height - shape.after;
        if output_row < shape.before {
            Phase::Priming(output_row)
        } else if output_row >= shrink_start {
            Phase::Shrinking(output_row - shrink_start)
        } else {
            Phase::SteadyState
        }
    }

    fn record(&mut self, event: TraceEvent) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(event);
        }
    }

    /// Advance by one sub-stage.
    ///
    /// `coefficients` must be the same FIFO (or `None`) on every call of a
    /// pass. All of its slots are acquired on the first step and held until
    /// the drain.
    pub fn step<T, C, K>(
        &mut self,
        input: &mut ObjectFifo<T>,
        output: &mut ObjectFifo<T>,
        mut coefficients: Option<&mut ObjectFifo<C>>,
        kernel: &mut K,
    ) -> Result<StepOutcome, FifoError>
    where
        T: Copy + Default,
        C: Copy + Default,
        K: ComputeKernel<T, C> + ?Sized,
    {
        match self.phase {
            Phase::Done => return Ok(StepOutcome::Done),
            Phase::Drain => {
                self.drain(input, coefficients)?;
                return Ok(StepOutcome::Progress);
            }
            _ => {}
        }

        if self.coefficients.is_none() {
            if let Some(fifo) = coefficients.as_deref_mut() {
                let rows = fifo.depth();
                match fifo.acquire(Role::Consumer, rows)? {
                    Acquire::Stalled => return Ok(self.stall(StallReason::Coefficients { rows })),
                    Acquire::Granted(handles) => {
                        log::debug!("{}: loaded {} coefficient rows", kernel.symbol(), rows);
                        self.record(TraceEvent::Acquire {
                            queue: QueueKind::Coefficients,
                            rows: handles.iter().map(|h| h.seq).collect(),
                        });
                        self.coefficients = Some(handles);
                        return Ok(StepOutcome::Progress);
                    }
                }
            }
        }

        let outcome = match self.stage {
            RowStage::Gather => self.gather(input)?,
            RowStage::Compute(index) => {
                self.compute(index, input, output, coefficients.as_deref(), kernel)?
            }
            RowStage::Retire => self.retire(input)?,
        };
        Ok(outcome)
    }

    fn stall(&mut self, reason: StallReason) -> StepOutcome {
        self.stats.stalls += 1;
        StepOutcome::Stalled(reason)
    }

    /// Acquire input rows until the bottom of the current window is held.
    fn gather<T: Copy + Default>(
        &mut self,
        input: &mut ObjectFifo<T>,
    ) -> Result<StepOutcome, FifoError> {
        let height = self.config.height;
        let target = self.config.window.last_row(self.output_row, height);
        let acquired = self.stats.input_acquires;

        if target >= acquired {
            let count = target + 1 - acquired;
            match input.acquire(Role::Consumer, count)? {
                Acquire::Stalled => return Ok(self.stall(StallReason::InputRows { row: target })),
                Acquire::Granted(handles) => {
                    for (i, handle) in handles.iter().enumerate() {
                        debug_assert_eq!(handle.seq as usize, acquired + i);
                        self.held.push_back(*handle);
                    }
                    self.stats.input_acquires += count;
                    self.stats.peak_held = self.stats.peak_held.max(self.held.len());
                    self.record(TraceEvent::Acquire {
                        queue: QueueKind::Input,
                        rows: handles.iter().map(|h| h.seq).collect(),
                    });
                }
            }
        }

        self.stage = RowStage::Compute(0);
        Ok(StepOutcome::Progress)
    }

    /// Handles for each window position around the current output row.
    fn window_handles(&self, fifo: &str) -> Result<SmallVec<[RowHandle; 8]>, FifoError> {
        let rows = self
            .config
            .window
            .rows(self.output_row, self.config.height, self.config.border);
        let first = self.held.front().map_or(0, |h| h.seq as usize);

        rows.iter()
            .map(|&row| {
                row.checked_sub(first)
                    .and_then(|i| self.held.get(i))
                    .copied()
                    .ok_or_else(|| FifoError::RowNotHeld {
                        fifo: fifo.to_string(),
                        role: Role::Consumer,
                        seq: row as u64,
                    })
            })
            .collect()
    }

    /// One kernel call for multiplier index `index`.
    fn compute<T, C, K>(
        &mut self,
        index: usize,
        input: &ObjectFifo<T>,
        output: &mut ObjectFifo<T>,
        coefficients: Option<&ObjectFifo<C>>,
        kernel: &mut K,
    ) -> Result<StepOutcome, FifoError>
    where
        T: Copy + Default,
        C: Copy + Default,
        K: ComputeKernel<T, C> + ?Sized,
    {
        let window = self.window_handles(input.name())?;

        let out_handle = match output.acquire(Role::Producer, 1)? {
            Acquire::Stalled => {
                return Ok(self.stall(StallReason::OutputSlot {
                    output_row: self.stats.output_rows,
                }))
            }
            Acquire::Granted(handles) => handles[0],
        };

        let coefficient = match (&self.coefficients, coefficients) {
            (Some(handles), Some(fifo)) if !handles.is_empty() => {
                let handle = handles[index % handles.len()];
                Some((handle.seq, fifo.row(handle)))
            }
            _ => None,
        };
        let coefficient_rows = self.coefficients.as_ref().map_or(0, |h| h.len());

        let rows: SmallVec<[&[T]; 8]> = window.iter().map(|h| input.row(*h)).collect();
        kernel.compute(KernelCall {
            rows: &rows[..],
            coefficients: coefficient.map(|(_, row)| row),
            coefficient_rows,
            out: output.row_mut(out_handle),
            out_width: self.config.out_width,
        });
        output.release(Role::Producer, 1)?;

        log::trace!(
            "{}: output row {} (window around row {}, multiplier {}) in {}",
            kernel.symbol(),
            self.stats.output_rows,
            self.output_row,
            index,
            self.phase
        );

        self.stats.output_rows += 1;
        if self.trace.is_some() {
            self.record(TraceEvent::Acquire {
                queue: QueueKind::Output,
                rows: SmallVec::from_slice(&[out_handle.seq]),
            });
            self.record(TraceEvent::Compute {
                output_row: self.output_row,
                multiplier_index: index,
                phase: self.phase,
                window: window.iter().map(|h| h.seq).collect(),
                coefficient_row: coefficient.map(|(seq, _)| seq),
            });
            self.record(TraceEvent::Release {
                queue: QueueKind::Output,
                rows: SmallVec::from_slice(&[out_handle.seq]),
            });
        }

        self.stage = if index + 1 < self.config.output_multiplier {
            RowStage::Compute(index + 1)
        } else {
            RowStage::Retire
        };
        Ok(StepOutcome::Progress)
    }

    /// Release rows the next window no longer reads and move to the next row.
    fn retire<T: Copy + Default>(
        &mut self,
        input: &mut ObjectFifo<T>,
    ) -> Result<StepOutcome, FifoError> {
        let next = self.output_row + 1;

        if next < self.config.height {
            let keep_from = self.config.window.first_row(next);
            let mut released = RowIds::new();
            while let Some(&oldest) = self.held.front() {
                if oldest.seq as usize >= keep_from {
                    break;
                }
                input.release_handle(Role::Consumer, oldest)?;
                self.held.pop_front();
                released.push(oldest.seq);
            }
            self.stats.input_releases += released.len();
            if !released.is_empty() {
                self.record(TraceEvent::Release {
                    queue: QueueKind::Input,
                    rows: released,
                });
            }
        }

        self.output_row = next;
        self.stage = RowStage::Gather;

        let phase = if next == self.config.height {
            Phase::Drain
        } else {
            Self::phase_for(&self.config, next)
        };
        if phase != self.phase {
            log::debug!("window scheduler: {} -> {} at row {}", self.phase, phase, next);
        }
        self.phase = phase;
        Ok(StepOutcome::Progress)
    }

    /// Return every held row and the coefficient rows. Runs once per pass.
    fn drain<T, C>(
        &mut self,
        input: &mut ObjectFifo<T>,
        coefficients: Option<&mut ObjectFifo<C>>,
    ) -> Result<(), FifoError>
    where
        T: Copy + Default,
        C: Copy + Default,
    {
        let mut released = RowIds::new();
        while let Some(oldest) = self.held.pop_front() {
            input.release_handle(Role::Consumer, oldest)?;
            released.push(oldest.seq);
        }
        self.stats.input_releases += released.len();
        if !released.is_empty() {
            self.record(TraceEvent::Release {
                queue: QueueKind::Input,
                rows: released,
            });
        }

        if let (Some(handles), Some(fifo)) = (self.coefficients.take(), coefficients) {
            fifo.release(Role::Consumer, handles.len())?;
            self.record(TraceEvent::Release {
                queue: QueueKind::Coefficients,
                rows: handles.iter().map(|h| h.seq).collect(),
            });
        }

        log::debug!(
            "window scheduler: drained, {} rows in / {} rows out",
            self.stats.input_acquires,
            self.stats.output_rows
        );
        self.phase = Phase::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FnKernel;

    /// Fill the input FIFO with as many rows as fit, each row filled with its index.
    fn feed(fifo: &mut ObjectFifo<u8>, next_row: &mut usize, height: usize) {
        while *next_row < height {
            match fifo.acquire(Role::Producer, 1).unwrap() {
                Acquire::Stalled => break,
                Acquire::Granted(h) => {
                    fifo.row_mut(h[0]).fill(*next_row as u8);
                    fifo.release(Role::Producer, 1).unwrap();
                    *next_row += 1;
                }
            }
        }
    }

    /// Empty the output FIFO, returning the first sample of each row.
    fn empty(fifo: &mut ObjectFifo<u8>, out: &mut Vec<u8>) {
        while let Acquire::Granted(h) = fifo.acquire(Role::Consumer, 1).unwrap() {
            out.push(fifo.row(h[0])[0]);
            fifo.release(Role::Consumer, 1).unwrap();
        }
    }

    fn config(height: usize, k: usize, multiplier: usize) -> SchedulerConfig {
        SchedulerConfig {
            height,
            window: WindowShape::for_kernel(k),
            border: BorderMode::Replicate,
            output_multiplier: multiplier,
            out_width: 2,
        }
    }

    /// Run one pass with a kernel that writes the window centre row index.
    fn run(cfg: SchedulerConfig, input_depth: usize) -> (SlidingWindowScheduler, Vec<u8>) {
        let mut input: ObjectFifo<u8> = ObjectFifo::new("in", input_depth, 2);
        let mut output: ObjectFifo<u8> = ObjectFifo::new("out", 2, 2);
        let k = cfg.window.size;
        let before = cfg.window.before;
        let mut kernel = FnKernel::new("centre", k, move |call: KernelCall<'_, u8, i16>| {
            let centre = call.rows[before][0];
            call.out[..call.out_width].fill(centre);
        });

        let mut sched = SlidingWindowScheduler::new(cfg).with_trace();
        let mut next_row = 0;
        let mut produced = Vec::new();
        for _ in 0..10_000 {
            feed(&mut input, &mut next_row, cfg.height);
            let outcome = sched
                .step::<u8, i16, _>(&mut input, &mut output, None, &mut kernel)
                .unwrap();
            empty(&mut output, &mut produced);
            if outcome == StepOutcome::Done {
                break;
            }
        }
        assert!(sched.is_done());
        (sched, produced)
    }

    #[test]
    #[should_panic(expected = "below the 5-row window")]
    fn test_new_rejects_short_image() {
        SlidingWindowScheduler::new(config(3, 5, 1));
    }

    #[test]
    fn test_new_accepts_image_of_window_height() {
        let sched = SlidingWindowScheduler::new(config(5, 5, 1));
        assert_eq!(sched.phase(), Phase::Priming(0));
    }

    #[test]
    fn test_h6_k3_window_sequence() {
        let (sched, produced) = run(config(6, 3, 1), 3);
        let trace = sched.trace().unwrap();

        assert_eq!(
            trace.windows(),
            vec![
                vec![0, 0, 1],
                vec![0, 1, 2],
                vec![1, 2, 3],
                vec![2, 3, 4],
                vec![3, 4, 5],
                vec![4, 5, 5],
            ]
        );
        assert_eq!(trace.acquired_rows(QueueKind::Input), 6);
        assert_eq!(trace.released_rows(QueueKind::Input), 6);
        assert_eq!(produced, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_h5_k5_phases() {
        let (sched, _) = run(config(5, 5, 1), 5);
        let trace = sched.trace().unwrap();

        let calls: Vec<(usize, Phase, usize)> = trace
            .compute_calls()
            .map(|(row, phase, window)| {
                let mut distinct = window.to_vec();
                distinct.dedup();
                (row, phase, distinct.len())
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                (0, Phase::Priming(0), 3),
                (1, Phase::Priming(1), 4),
                (2, Phase::SteadyState, 5),
                (3, Phase::Shrinking(0), 4),
                (4, Phase::Shrinking(1), 3),
            ]
        );
        assert_eq!(trace.acquired_rows(QueueKind::Input), 5);
        assert_eq!(trace.released_rows(QueueKind::Input), 5);
    }

    #[test]
    fn test_acquire_release_counts_for_all_odd_k() {
        for k in [3, 5, 7, 9] {
            for h in k..k + 6 {
                let (sched, produced) = run(config(h, k, 1), k);
                let stats = sched.stats();
                assert_eq!(stats.input_acquires, h, "acquires h={} k={}", h, k);
                assert_eq!(stats.input_releases, h, "releases h={} k={}", h, k);
                assert_eq!(stats.output_rows, h);
                assert!(stats.peak_held <= k);
                assert_eq!(produced, (0..h as u8).collect::<Vec<_>>());

                let steady = sched
                    .trace()
                    .unwrap()
                    .compute_calls()
                    .filter(|(_, p, _)| *p == Phase::SteadyState)
                    .count();
                assert_eq!(steady, h - (k - 1));
            }
        }
    }

    #[test]
    fn test_each_steady_row_acquires_and_releases_one() {
        let (sched, _) = run(config(8, 3, 1), 3);
        let events = sched.trace().unwrap().events();

        // First input acquire primes two rows, every later one takes a single row.
        let acquires: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Acquire { queue: QueueKind::Input, rows } => Some(rows.len()),
                _ => None,
            })
            .collect();
        assert_eq!(acquires, vec![2, 1, 1, 1, 1, 1, 1]);

        let releases: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Release { queue: QueueKind::Input, rows } => Some(rows.len()),
                _ => None,
            })
            .collect();
        // Six retire releases, then the drain returns the last two rows.
        assert_eq!(releases, vec![1, 1, 1, 1, 1, 1, 2]);
    }

    #[test]
    fn test_output_multiplier_reuses_window() {
        let (sched, produced) = run(config(4, 3, 2), 3);
        let trace = sched.trace().unwrap();
        assert_eq!(sched.stats().output_rows, 8);
        assert_eq!(produced, vec![0, 0, 1, 1, 2, 2, 3, 3]);

        let windows = trace.windows();
        for pair in windows.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
        assert_eq!(trace.acquired_rows(QueueKind::Input), 4);
    }

    #[test]
    fn test_single_row_window() {
        let (sched, produced) = run(config(3, 1, 2), 1);
        assert_eq!(produced, vec![0, 0, 1, 1, 2, 2]);
        assert!(sched
            .trace()
            .unwrap()
            .compute_calls()
            .all(|(_, p, _)| p == Phase::SteadyState));
    }

    #[test]
    fn test_even_window_reads_extra_row_below() {
        let (sched, _) = run(config(5, 4, 1), 4);
        let trace = sched.trace().unwrap();
        assert_eq!(
            trace.windows(),
            vec![
                vec![0, 0, 1, 2],
                vec![0, 1, 2, 3],
                vec![1, 2, 3, 4],
                vec![2, 3, 4, 4],
                vec![3, 4, 4, 4],
            ]
        );
        assert_eq!(sched.stats().input_releases, 5);
    }

    #[test]
    fn test_mirror_border_windows() {
        let mut cfg = config(5, 3, 1);
        cfg.border = BorderMode::Mirror;
        let (sched, _) = run(cfg, 3);
        let windows = sched.trace().unwrap().windows();
        assert_eq!(windows[0], vec![1, 0, 1]);
        assert_eq!(windows[4], vec![3, 4, 3]);
    }

    #[test]
    fn test_stalls_until_rows_arrive() {
        let cfg = config(4, 3, 1);
        let mut input: ObjectFifo<u8> = ObjectFifo::new("in", 3, 2);
        let mut output: ObjectFifo<u8> = ObjectFifo::new("out", 1, 2);
        let mut kernel = FnKernel::new("nop", 3, |_: KernelCall<'_, u8, i16>| {});
        let mut sched = SlidingWindowScheduler::new(cfg);

        let outcome = sched
            .step::<u8, i16, _>(&mut input, &mut output, None, &mut kernel)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Stalled(StallReason::InputRows { row: 1 }));
        assert_eq!(sched.stats().stalls, 1);
        assert_eq!(sched.phase(), Phase::Priming(0));

        let mut next = 0;
        feed(&mut input, &mut next, 2);
        let outcome = sched
            .step::<u8, i16, _>(&mut input, &mut output, None, &mut kernel)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Progress);
        assert_eq!(sched.held_rows().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_output_slot_stall() {
        let cfg = config(3, 1, 1);
        let mut input: ObjectFifo<u8> = ObjectFifo::new("in", 1, 2);
        let mut output: ObjectFifo<u8> = ObjectFifo::new("out", 1, 2);
        let mut kernel = FnKernel::new("nop", 1, |_: KernelCall<'_, u8, i16>| {});
        let mut sched = SlidingWindowScheduler::new(cfg);
        let mut next = 0;

        // Publish a row nobody drains, so the only output slot stays full.
        let Acquire::Granted(_) = output.acquire(Role::Producer, 1).unwrap() else {
            panic!("output slot expected");
        };
        output.release(Role::Producer, 1).unwrap();
        feed(&mut input, &mut next, 3);
        sched.step::<u8, i16, _>(&mut input, &mut output, None, &mut kernel).unwrap();
        let outcome = sched
            .step::<u8, i16, _>(&mut input, &mut output, None, &mut kernel)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Stalled(StallReason::OutputSlot { output_row: 0 }));
    }

    #[test]
    fn test_coefficients_held_for_whole_pass() {
        let cfg = config(3, 1, 2);
        let mut input: ObjectFifo<u8> = ObjectFifo::new("in", 1, 2);
        let mut output: ObjectFifo<u8> = ObjectFifo::new("out", 2, 2);
        let mut coeffs: ObjectFifo<i16> = ObjectFifo::new("coeff", 2, 1);
        for value in [10i16, 20] {
            let Acquire::Granted(h) = coeffs.acquire(Role::Producer, 1).unwrap() else {
                panic!("coefficient slot expected");
            };
            coeffs.row_mut(h[0])[0] = value;
            coeffs.release(Role::Producer, 1).unwrap();
        }

        let mut kernel = FnKernel::new("coeff", 1, |call: KernelCall<'_, u8, i16>| {
            assert_eq!(call.coefficient_rows, 2);
            let c = call.coefficients.expect("coefficient row")[0];
            call.out[0] = call.rows[0][0] * 100 + c as u8;
        });
        let mut sched = SlidingWindowScheduler::new(cfg).with_trace();
        let mut next = 0;
        let mut produced = Vec::new();

        while !sched.is_done() {
            feed(&mut input, &mut next, 3);
            sched
                .step(&mut input, &mut output, Some(&mut coeffs), &mut kernel)
                .unwrap();
            empty(&mut output, &mut produced);
        }

        assert_eq!(produced, vec![10, 20, 110, 120, 210, 220]);
        assert_eq!(coeffs.held(Role::Consumer), 0);
        let trace = sched.trace().unwrap();
        assert_eq!(trace.acquired_rows(QueueKind::Coefficients), 2);
        assert_eq!(trace.released_rows(QueueKind::Coefficients), 2);
    }

    #[test]
    fn test_reset_allows_second_pass() {
        let (mut sched, _) = run(config(4, 3, 1), 3);
        sched.reset();
        assert_eq!(sched.phase(), Phase::Priming(0));
        assert_eq!(sched.stats(), SchedulerStats::default());
        assert!(sched.trace().unwrap().events().is_empty());
    }
}
