//! Runtime sequence and cycle-stepped execution.
//!
//! The host side issues a short sequence: start the worker, fill the input
//! queue, fill the coefficient queue once, drain the output queue and wait
//! for it. Execution is cooperative: every cycle steps each active fill,
//! the worker, then the drain, once.
//!
//! A cycle in which nobody moves can never be followed by one that does, so
//! it ends the run with a diagnosis:
//!
//! - [`PipelineError::Underrun`]: the input fill finished short of `H` rows
//!   and the worker is waiting for more
//! - [`PipelineError::Deadlock`]: anything else, with every party's stall

use super::{ConfigError, Pipeline, PipelineError, TileId};
use crate::config::Config;
use crate::fifo::{FifoStats, ObjectFifo};
use crate::host::{HostBuffer, Transfer, TransferStep};
use crate::kernel::ComputeKernel;
use crate::scheduler::{SchedulerStats, SlidingWindowScheduler, StallReason, StepOutcome, Trace};

/// One host-side command of the runtime sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOp {
    /// Start the worker on its tile
    StartWorker,
    /// Stream the first `rows` image rows into the input queue
    FillInput { rows: usize },
    /// Load every coefficient row once
    FillCoefficients,
    /// Collect output rows; with `wait` the run ends only once all arrived
    DrainOutput { wait: bool },
}

/// Runtime execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// Sequence not issued yet
    Ready,
    Running,
    /// Worker done and waited-on drains complete
    Complete,
    /// Stopped on an error
    Failed,
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        RuntimeStatus::Ready
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeStatus::Ready => "Ready",
            RuntimeStatus::Running => "Running",
            RuntimeStatus::Complete => "Complete",
            RuntimeStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Watchdog: give up after this many cycles
    pub max_cycles: u64,
    /// Record a scheduler trace
    pub trace: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_cycles: Config::DEFAULT_MAX_CYCLES,
            trace: false,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_cycles: config.max_cycles(),
            trace: config.trace(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: String,
    pub cycles: u64,
    /// Contents of the output host buffer
    pub output: Vec<u8>,
    pub input_rows: usize,
    pub output_rows: usize,
    pub scheduler: SchedulerStats,
    pub input_queue: FifoStats,
    pub output_queue: FifoStats,
    pub coefficient_queue: Option<FifoStats>,
    pub trace: Option<Trace>,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pipeline: {}", self.pipeline)?;
        writeln!(f, "Cycles: {}", self.cycles)?;
        writeln!(f, "Rows: {} in, {} out", self.input_rows, self.output_rows)?;
        writeln!(
            f,
            "Worker: {} acquired, {} released, peak {} held, {} stalls",
            self.scheduler.input_acquires,
            self.scheduler.input_releases,
            self.scheduler.peak_held,
            self.scheduler.stalls
        )?;
        let queues = [
            ("of_in", Some(&self.input_queue)),
            ("of_out", Some(&self.output_queue)),
            ("of_coeffs", self.coefficient_queue.as_ref()),
        ];
        for (name, stats) in queues {
            let Some(stats) = stats else { continue };
            writeln!(
                f,
                "  {:<10} producer {:>4} rows / {:>4} stall cycles, consumer {:>4} rows / {:>4} stall cycles",
                name,
                stats.producer.acquires,
                stats.producer.stall_cycles,
                stats.consumer.acquires,
                stats.consumer.stall_cycles
            )?;
        }
        Ok(())
    }
}

/// Host buffers, queues and the worker of one run.
#[derive(Debug)]
pub struct Runtime {
    name: String,
    status: RuntimeStatus,
    cycle: u64,
    options: RunOptions,
    sequence: Vec<RuntimeOp>,
    worker_tile: TileId,
    worker_started: bool,
    scheduler: SlidingWindowScheduler,
    height: usize,
    width: usize,
    out_width: usize,
    output_rows: usize,
    coefficient_rows: usize,
    coefficient_len: usize,

    of_in: ObjectFifo<u8>,
    of_out: ObjectFifo<u8>,
    of_coeffs: Option<ObjectFifo<i16>>,

    input: HostBuffer<u8>,
    output: HostBuffer<u8>,
    coefficients: Option<HostBuffer<i16>>,

    fill: Option<Transfer>,
    coefficient_fill: Option<Transfer>,
    drain: Option<Transfer>,
    drain_wait: bool,
}

fn check_len(buffer: &str, expected: usize, actual: usize) -> Result<(), ConfigError> {
    if expected != actual {
        return Err(ConfigError::HostBufferSize {
            buffer: buffer.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl Runtime {
    /// Build queues and host buffers for `pipeline` with the default sequence.
    pub fn new(
        pipeline: &Pipeline,
        input: Vec<u8>,
        coefficients: Option<Vec<i16>>,
        options: RunOptions,
    ) -> Result<Self, ConfigError> {
        let decl = pipeline.decl();
        let depths = pipeline.depths();
        let binding = &decl.kernel;

        check_len("input", decl.input_len(), input.len())?;
        let coefficients = match coefficients {
            Some(values) => {
                check_len("coefficients", decl.coefficient_len(), values.len())?;
                (binding.coefficient_rows > 0).then(|| HostBuffer::input("coefficients", values))
            }
            None => {
                check_len("coefficients", decl.coefficient_len(), 0)?;
                None
            }
        };

        let mut scheduler = SlidingWindowScheduler::new(pipeline.scheduler_config());
        if options.trace {
            scheduler = scheduler.with_trace();
        }

        let mut sequence = vec![RuntimeOp::StartWorker, RuntimeOp::FillInput { rows: decl.height }];
        if coefficients.is_some() {
            sequence.push(RuntimeOp::FillCoefficients);
        }
        sequence.push(RuntimeOp::DrainOutput { wait: true });

        Ok(Self {
            name: decl.name.clone(),
            status: RuntimeStatus::Ready,
            cycle: 0,
            options,
            sequence,
            worker_tile: pipeline.placement().worker,
            worker_started: false,
            scheduler,
            height: decl.height,
            width: decl.width,
            out_width: binding.out_width,
            output_rows: decl.output_rows(),
            coefficient_rows: binding.coefficient_rows,
            coefficient_len: binding.coefficient_len,
            of_in: ObjectFifo::new("of_in", depths.input, decl.width),
            of_out: ObjectFifo::new("of_out", depths.output, binding.out_width),
            of_coeffs: coefficients
                .as_ref()
                .map(|_| {
                    ObjectFifo::new("of_coeffs", depths.coefficients, binding.coefficient_len)
                }),
            input: HostBuffer::input("input", input),
            output: HostBuffer::output("output", decl.output_len()),
            coefficients,
            fill: None,
            coefficient_fill: None,
            drain: None,
            drain_wait: false,
        })
    }

    /// Replace the runtime sequence. Only takes effect before the first step.
    pub fn with_sequence(mut self, sequence: Vec<RuntimeOp>) -> Self {
        if self.status == RuntimeStatus::Ready {
            self.sequence = sequence;
        } else {
            log::warn!("{}: sequence replaced after start, ignored", self.name);
        }
        self
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn sequence(&self) -> &[RuntimeOp] {
        &self.sequence
    }

    pub fn scheduler(&self) -> &SlidingWindowScheduler {
        &self.scheduler
    }

    pub fn input_queue(&self) -> &ObjectFifo<u8> {
        &self.of_in
    }

    pub fn output_queue(&self) -> &ObjectFifo<u8> {
        &self.of_out
    }

    pub fn coefficient_queue(&self) -> Option<&ObjectFifo<i16>> {
        self.of_coeffs.as_ref()
    }

    /// Output host buffer as written so far.
    pub fn output(&self) -> &[u8] {
        self.output.as_slice()
    }

    /// Issue the runtime sequence.
    fn start(&mut self) {
        for op in self.sequence.clone() {
            match op {
                RuntimeOp::StartWorker => self.worker_started = true,
                RuntimeOp::FillInput { rows } => {
                    let rows = rows.min(self.input.rows(self.width));
                    self.fill = Some(Transfer::fill("input", rows, self.width));
                }
                RuntimeOp::FillCoefficients => {
                    if self.coefficients.is_some() {
                        self.coefficient_fill = Some(Transfer::fill(
                            "coefficients",
                            self.coefficient_rows,
                            self.coefficient_len,
                        ));
                    } else {
                        log::warn!("{}: no coefficient buffer to fill", self.name);
                    }
                }
                RuntimeOp::DrainOutput { wait } => {
                    self.drain = Some(Transfer::drain("output", self.output_rows, self.out_width));
                    self.drain_wait = wait;
                }
            }
        }
        log::info!(
            "{}: started worker {} with sequence {:?}",
            self.name,
            self.worker_tile,
            self.sequence
        );
        self.status = RuntimeStatus::Running;
    }

    fn is_finished(&self) -> bool {
        let drained = match &self.drain {
            Some(drain) => !self.drain_wait || drain.is_complete(),
            None => true,
        };
        self.scheduler.is_done() && drained
    }

    /// Run one cycle.
    ///
    /// A failed runtime stays failed: every later call returns
    /// [`PipelineError::Halted`] without touching the queues.
    pub fn step<K: ComputeKernel<u8> + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<RuntimeStatus, PipelineError> {
        match self.status {
            RuntimeStatus::Complete => return Ok(self.status),
            RuntimeStatus::Failed => return Err(PipelineError::Halted { cycle: self.cycle }),
            RuntimeStatus::Ready => self.start(),
            RuntimeStatus::Running => {}
        }

        match self.cycle_once(kernel) {
            Ok(status) => Ok(status),
            Err(e) => {
                log::debug!("{}: failed at cycle {}: {}", self.name, self.cycle, e);
                self.status = RuntimeStatus::Failed;
                Err(e)
            }
        }
    }

    fn cycle_once<K: ComputeKernel<u8> + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<RuntimeStatus, PipelineError> {
        self.cycle += 1;
        let mut progressed = false;
        let mut waiting = Vec::new();
        let mut worker_stall = None;

        if let Some(fill) = self.fill.as_mut() {
            match fill.step_fill(&self.input, &mut self.of_in)? {
                TransferStep::Moved => progressed = true,
                TransferStep::Stalled => {
                    waiting.push(format!("input fill: {} full", self.of_in.name()))
                }
                TransferStep::Complete => {}
            }
        }

        if let (Some(fill), Some(host), Some(fifo)) = (
            self.coefficient_fill.as_mut(),
            self.coefficients.as_ref(),
            self.of_coeffs.as_mut(),
        ) {
            match fill.step_fill(host, fifo)? {
                TransferStep::Moved => progressed = true,
                TransferStep::Stalled => {
                    waiting.push(format!("coefficient fill: {} full", fifo.name()))
                }
                TransferStep::Complete => {}
            }
        }

        if self.worker_started && !self.scheduler.is_done() {
            match self
                .scheduler
                .step(&mut self.of_in, &mut self.of_out, self.of_coeffs.as_mut(), kernel)?
            {
                StepOutcome::Progress => progressed = true,
                StepOutcome::Stalled(reason) => {
                    waiting.push(format!("worker {}: {}", self.worker_tile, reason));
                    worker_stall = Some(reason);
                }
                StepOutcome::Done => {}
            }
        } else if !self.worker_started {
            waiting.push("worker not started".to_string());
        }

        if let Some(drain) = self.drain.as_mut() {
            match drain.step_drain(&mut self.of_out, &mut self.output)? {
                TransferStep::Moved => progressed = true,
                TransferStep::Stalled => {
                    waiting.push(format!("output drain: {} empty", self.of_out.name()))
                }
                TransferStep::Complete => {}
            }
        }

        if self.is_finished() {
            self.status = RuntimeStatus::Complete;
            log::info!(
                "{}: complete after {} cycles, {} output rows",
                self.name,
                self.cycle,
                self.scheduler.stats().output_rows
            );
            return Ok(self.status);
        }

        if !progressed {
            return Err(self.diagnose(worker_stall, waiting));
        }
        Ok(self.status)
    }

    fn diagnose(&self, worker_stall: Option<StallReason>, waiting: Vec<String>) -> PipelineError {
        if let Some(StallReason::InputRows { .. }) = worker_stall {
            let supplied = self.fill.as_ref().map_or(0, |f| f.rows_done());
            let fill_finished = self.fill.as_ref().map_or(true, |f| f.is_complete());
            if fill_finished && supplied < self.height {
                return PipelineError::Underrun {
                    expected: self.height,
                    supplied,
                };
            }
        }
        PipelineError::Deadlock {
            cycle: self.cycle,
            waiting,
        }
    }

    /// Step until complete, failed, or the cycle limit.
    pub fn run<K: ComputeKernel<u8> + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<RunReport, PipelineError> {
        while self.cycle < self.options.max_cycles {
            if self.step(kernel)? == RuntimeStatus::Complete {
                return Ok(self.report());
            }
        }
        self.status = RuntimeStatus::Failed;
        Err(PipelineError::CycleLimit {
            limit: self.options.max_cycles,
            output_row: self.scheduler.output_row(),
        })
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> RunReport {
        RunReport {
            pipeline: self.name.clone(),
            cycles: self.cycle,
            output: self.output.as_slice().to_vec(),
            input_rows: self.fill.as_ref().map_or(0, |f| f.rows_done()),
            output_rows: self.drain.as_ref().map_or(0, |d| d.rows_done()),
            scheduler: self.scheduler.stats(),
            input_queue: self.of_in.stats(),
            output_queue: self.of_out.stats(),
            coefficient_queue: self.of_coeffs.as_ref().map(|f| f.stats()),
            trace: self.scheduler.trace().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{FnKernel, KernelCall, Passthrough};
    use crate::pipeline::{presets, KernelBinding, PipelineDecl, QueueDepths};
    use crate::window::BorderMode;

    fn decl(height: usize, k: usize, multiplier: usize) -> PipelineDecl {
        PipelineDecl {
            name: "rt".to_string(),
            width: 4,
            height,
            border: BorderMode::Replicate,
            worker_tile: None,
            kernel: KernelBinding {
                symbol: "centre".to_string(),
                window_rows: k,
                out_width: 4,
                output_multiplier: multiplier,
                coefficient_rows: 0,
                coefficient_len: 0,
            },
            depths: QueueDepths::default(),
        }
    }

    /// Rows filled with their own index.
    fn rows(height: usize) -> Vec<u8> {
        (0..height).flat_map(|y| [y as u8; 4]).collect()
    }

    fn centre_kernel(k: usize) -> impl ComputeKernel<u8> {
        let before = (k - 1) / 2;
        FnKernel::new("centre", k, move |call: KernelCall<'_, u8, i16>| {
            call.out[..call.out_width].copy_from_slice(&call.rows[before][..call.out_width]);
        })
    }

    #[test]
    fn test_default_sequence() {
        let pipeline = Pipeline::assemble(decl(4, 3, 1)).unwrap();
        let rt = Runtime::new(&pipeline, rows(4), None, RunOptions::default()).unwrap();
        assert_eq!(
            rt.sequence(),
            &[
                RuntimeOp::StartWorker,
                RuntimeOp::FillInput { rows: 4 },
                RuntimeOp::DrainOutput { wait: true }
            ]
        );
        assert_eq!(rt.status(), RuntimeStatus::Ready);
    }

    #[test]
    fn test_runs_to_completion() {
        let pipeline = Pipeline::assemble(decl(6, 3, 2)).unwrap();
        let mut rt = Runtime::new(&pipeline, rows(6), None, RunOptions::default()).unwrap();
        let mut kernel = centre_kernel(3);
        let report = rt.run(&mut kernel).unwrap();

        assert_eq!(rt.status(), RuntimeStatus::Complete);
        assert_eq!(report.input_rows, 6);
        assert_eq!(report.output_rows, 12);
        let firsts: Vec<u8> = report.output.chunks(4).map(|r| r[0]).collect();
        assert_eq!(firsts, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
        assert!(report.input_queue.consumer.peak_outstanding <= 3);
        assert_eq!(report.input_queue.in_flight(), 0);
        assert_eq!(report.output_queue.in_flight(), 0);

        // Further steps are no-ops.
        assert_eq!(rt.step(&mut kernel).unwrap(), RuntimeStatus::Complete);
    }

    #[test]
    fn test_rejects_wrong_buffer_sizes() {
        let pipeline = Pipeline::assemble(decl(4, 3, 1)).unwrap();
        let err = Runtime::new(&pipeline, vec![0; 15], None, RunOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::HostBufferSize {
                buffer: "input".to_string(),
                expected: 16,
                actual: 15
            }
        );

        let pipeline = Pipeline::assemble(presets::coefficient_matrix()).unwrap();
        let input = vec![0; pipeline.decl().input_len()];
        assert!(matches!(
            Runtime::new(&pipeline, input, None, RunOptions::default()),
            Err(ConfigError::HostBufferSize { .. })
        ));
    }

    #[test]
    fn test_short_fill_is_underrun() {
        let pipeline = Pipeline::assemble(decl(6, 3, 1)).unwrap();
        let mut rt = Runtime::new(&pipeline, rows(6), None, RunOptions::default())
            .unwrap()
            .with_sequence(vec![
                RuntimeOp::StartWorker,
                RuntimeOp::FillInput { rows: 4 },
                RuntimeOp::DrainOutput { wait: true },
            ]);
        let err = rt.run(&mut centre_kernel(3)).unwrap_err();
        assert!(matches!(err, PipelineError::Underrun { expected: 6, supplied: 4 }));
        assert_eq!(rt.status(), RuntimeStatus::Failed);
        // Rows whose window was complete were still delivered.
        assert_eq!(rt.output()[0], 0);
    }

    #[test]
    fn test_failed_runtime_stays_failed() {
        let pipeline = Pipeline::assemble(decl(6, 3, 1)).unwrap();
        let mut rt = Runtime::new(&pipeline, rows(6), None, RunOptions::default())
            .unwrap()
            .with_sequence(vec![
                RuntimeOp::StartWorker,
                RuntimeOp::FillInput { rows: 4 },
                RuntimeOp::DrainOutput { wait: true },
            ]);
        let mut kernel = centre_kernel(3);
        assert!(matches!(rt.run(&mut kernel), Err(PipelineError::Underrun { .. })));
        let cycle = rt.cycle();

        assert!(matches!(
            rt.run(&mut kernel),
            Err(PipelineError::Halted { cycle: c }) if c == cycle
        ));
        assert!(matches!(rt.step(&mut kernel), Err(PipelineError::Halted { .. })));
        assert_eq!(rt.cycle(), cycle);
        assert_eq!(rt.status(), RuntimeStatus::Failed);
    }

    #[test]
    fn test_missing_drain_deadlocks() {
        let pipeline = Pipeline::assemble(decl(6, 3, 1)).unwrap();
        let mut rt = Runtime::new(&pipeline, rows(6), None, RunOptions::default())
            .unwrap()
            .with_sequence(vec![RuntimeOp::StartWorker, RuntimeOp::FillInput { rows: 6 }]);
        match rt.run(&mut centre_kernel(3)) {
            Err(PipelineError::Deadlock { waiting, .. }) => {
                assert!(waiting.iter().any(|w| w.contains("output slot")), "{:?}", waiting);
            }
            other => panic!("expected deadlock, got {:?}", other.map(|r| r.cycles)),
        }
    }

    #[test]
    fn test_worker_never_started_deadlocks() {
        let pipeline = Pipeline::assemble(decl(4, 1, 1)).unwrap();
        let mut rt = Runtime::new(&pipeline, rows(4), None, RunOptions::default())
            .unwrap()
            .with_sequence(vec![RuntimeOp::FillInput { rows: 4 }]);
        let err = rt.run(&mut Passthrough).unwrap_err();
        assert!(err.to_string().contains("worker not started"), "{}", err);
    }

    #[test]
    fn test_cycle_limit() {
        let pipeline = Pipeline::assemble(decl(6, 3, 1)).unwrap();
        let options = RunOptions {
            max_cycles: 5,
            trace: false,
        };
        let mut rt = Runtime::new(&pipeline, rows(6), None, options).unwrap();
        let err = rt.run(&mut centre_kernel(3)).unwrap_err();
        assert!(matches!(err, PipelineError::CycleLimit { limit: 5, .. }));
        assert_eq!(rt.cycle(), 5);
    }

    #[test]
    fn test_report_display() {
        let pipeline = Pipeline::assemble(presets::passthrough()).unwrap();
        let input = presets::gradient(32, 16);
        let report = pipeline
            .run(&mut Passthrough, input.clone(), None, RunOptions::default())
            .unwrap();
        assert_eq!(report.output, input);
        let text = report.to_string();
        assert!(text.starts_with("Pipeline: passthrough\n"));
        assert!(text.contains("Rows: 16 in, 16 out"));
        assert!(text.contains("of_in"));
        assert!(!text.contains("of_coeffs"));
    }
}
