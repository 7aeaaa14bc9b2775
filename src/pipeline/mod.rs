//! Pipeline assembly.
//!
//! A pipeline is one compute stage fed by a host fill and drained back to
//! the host:
//!
//! ```text
//!  shim (c,0)          worker (c,2)                   shim (c,0)
//!  fill ──► of_in ──► sliding window ──► kernel ──► of_out ──► drain
//!  fill ──► of_coeffs ──────────────────────┘
//! ```
//!
//! [`PipelineDecl`] is the declaration surface (loadable from TOML).
//! [`Pipeline::assemble`] validates it, places the worker and resolves queue
//! depths. [`Pipeline::run`] builds a [`Runtime`] over host buffers and steps
//! it to completion.
//!
//! # Declaration Format
//!
//! ```toml
//! name = "tent3x3"
//! width = 32
//! height = 16
//! border = "replicate"
//!
//! [kernel]
//! symbol = "conv2d3k"
//! window_rows = 3
//! out_width = 64
//! output_multiplier = 2
//!
//! [depths]
//! input = 3
//! output = 2
//! ```

pub mod placer;
pub mod presets;
pub mod runtime;

pub use placer::{Placement, Placer, SequentialPlacer, TileId, TileKind};
pub use runtime::{RunOptions, RunReport, Runtime, RuntimeOp, RuntimeStatus};

use crate::fifo::FifoError;
use crate::host::{HostBufferError, TransferError};
use crate::kernel::{CoefficientMatrix, ComputeKernel};
use crate::scheduler::SchedulerConfig;
use crate::window::{BorderMode, WindowShape};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Shim DMA word size. Every row moved by DMA must be a whole number of words.
pub const DMA_WORD_BYTES: usize = 4;

/// Output queue depth used when the declaration leaves it open.
pub const DEFAULT_OUTPUT_DEPTH: usize = 2;

fn default_multiplier() -> usize {
    1
}

/// Kernel symbol and the shape of its calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelBinding {
    /// Linked kernel symbol, e.g. `conv2d4k`
    pub symbol: String,
    /// Rows per call (`K`)
    pub window_rows: usize,
    /// Samples per output row
    pub out_width: usize,
    /// Output rows per input row
    #[serde(default = "default_multiplier")]
    pub output_multiplier: usize,
    /// Coefficient rows loaded once per run (0 for none)
    #[serde(default)]
    pub coefficient_rows: usize,
    /// `i16` values per coefficient row
    #[serde(default)]
    pub coefficient_len: usize,
}

/// Queue depths. Zero means "smallest valid depth".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDepths {
    pub input: usize,
    pub output: usize,
    pub coefficients: usize,
}

/// Declaration of a single-stage streaming pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDecl {
    pub name: String,
    /// Input image width in samples
    pub width: usize,
    /// Input image height in rows
    pub height: usize,
    #[serde(default)]
    pub border: BorderMode,
    /// Explicit worker tile `[col, row]`; placed by the placer when absent
    #[serde(default)]
    pub worker_tile: Option<[u8; 2]>,
    pub kernel: KernelBinding,
    #[serde(default)]
    pub depths: QueueDepths,
}

impl PipelineDecl {
    /// Parse a declaration from TOML text.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid pipeline declaration")
    }

    /// Load a declaration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Samples in the input host buffer.
    pub fn input_len(&self) -> usize {
        self.width * self.height
    }

    /// Rows the drain collects.
    pub fn output_rows(&self) -> usize {
        self.height * self.kernel.output_multiplier
    }

    /// Samples in the output host buffer.
    pub fn output_len(&self) -> usize {
        self.output_rows() * self.kernel.out_width
    }

    /// Values in the coefficient host buffer.
    pub fn coefficient_len(&self) -> usize {
        self.kernel.coefficient_rows * self.kernel.coefficient_len
    }
}

/// Declaration rejected at assembly. No row has moved when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("image {width}x{height} with output width {out_width} has an empty dimension")]
    EmptyImage {
        width: usize,
        height: usize,
        out_width: usize,
    },

    #[error("{queue} row of {bytes} bytes is not a multiple of the 4-byte DMA word")]
    UnalignedRow { queue: &'static str, bytes: usize },

    #[error("kernel must read at least one row")]
    ZeroWindow,

    #[error("output multiplier must be at least 1")]
    ZeroMultiplier,

    #[error("height {height} is smaller than the {window}-row window")]
    HeightBelowWindow { height: usize, window: usize },

    #[error("input depth {depth} cannot hold the {window}-row window")]
    InputDepthBelowWindow { depth: usize, window: usize },

    #[error("output depth {depth} is below the output multiplier {multiplier}")]
    OutputDepthBelowMultiplier { depth: usize, multiplier: usize },

    #[error("coefficient depth {depth} does not match {rows} coefficient rows")]
    CoefficientDepthMismatch { depth: usize, rows: usize },

    #[error("{rows} coefficient rows declared without a row length")]
    MissingCoefficientLen { rows: usize },

    #[error("'{symbol}' needs {needed} coefficients per row, declaration gives {len}")]
    CoefficientRowTooShort {
        symbol: String,
        len: usize,
        needed: usize,
    },

    #[error("mirror border needs an odd window, got {window} rows")]
    MirrorNeedsOddWindow { window: usize },

    #[error("host buffer '{buffer}' has {actual} elements, declaration needs {expected}")]
    HostBufferSize {
        buffer: String,
        expected: usize,
        actual: usize,
    },

    #[error("kernel '{symbol}' reads {kernel} rows, declaration says {declared}")]
    WindowMismatch {
        symbol: String,
        declared: usize,
        kernel: usize,
    },

    #[error("no reference kernel named '{symbol}'")]
    UnknownKernel { symbol: String },

    #[error("tile {tile} is not a compute tile")]
    NotComputeTile { tile: TileId },

    #[error("tile {tile} is outside the {cols}x{rows} array")]
    TileOutOfRange { tile: TileId, cols: u8, rows: u8 },
}

/// Failure while running an assembled pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("queue protocol: {0}")]
    Fifo(#[from] FifoError),

    #[error("host buffer: {0}")]
    Host(#[from] HostBufferError),

    #[error("input underrun: worker needs {expected} rows, fill supplied {supplied}")]
    Underrun { expected: usize, supplied: usize },

    #[error("deadlock at cycle {cycle}: {}", .waiting.join("; "))]
    Deadlock { cycle: u64, waiting: Vec<String> },

    #[error("cycle limit {limit} reached at output row {output_row}")]
    CycleLimit { limit: u64, output_row: usize },

    #[error("runtime already failed at cycle {cycle}")]
    Halted { cycle: u64 },
}

impl From<TransferError> for PipelineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Fifo(e) => PipelineError::Fifo(e),
            TransferError::Host(e) => PipelineError::Host(e),
        }
    }
}

/// A validated, placed pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    decl: PipelineDecl,
    depths: QueueDepths,
    window: WindowShape,
    placement: Placement,
}

impl Pipeline {
    /// Validate `decl` and place it with the [`SequentialPlacer`].
    pub fn assemble(decl: PipelineDecl) -> Result<Self, ConfigError> {
        Self::assemble_with(decl, &SequentialPlacer::default())
    }

    /// Validate `decl` and place it with `placer`.
    pub fn assemble_with<P: Placer + ?Sized>(
        decl: PipelineDecl,
        placer: &P,
    ) -> Result<Self, ConfigError> {
        let depths = validate(&decl)?;
        let placement = placer.place(&decl)?;
        let window = WindowShape::for_kernel(decl.kernel.window_rows);

        log::debug!(
            "assembled '{}': {}x{} K={} x{} depths in={} out={} coeff={} worker {}",
            decl.name,
            decl.width,
            decl.height,
            window.size,
            decl.kernel.output_multiplier,
            depths.input,
            depths.output,
            depths.coefficients,
            placement.worker
        );

        Ok(Self {
            decl,
            depths,
            window,
            placement,
        })
    }

    pub fn decl(&self) -> &PipelineDecl {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Depths after resolving defaults.
    pub fn depths(&self) -> QueueDepths {
        self.depths
    }

    pub fn window(&self) -> WindowShape {
        self.window
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            height: self.decl.height,
            window: self.window,
            border: self.decl.border,
            output_multiplier: self.decl.kernel.output_multiplier,
            out_width: self.decl.kernel.out_width,
        }
    }

    /// Check a kernel against the declared binding.
    pub fn check_kernel<K: ComputeKernel<u8> + ?Sized>(
        &self,
        kernel: &K,
    ) -> Result<(), ConfigError> {
        if kernel.window_rows() != self.decl.kernel.window_rows {
            return Err(ConfigError::WindowMismatch {
                symbol: kernel.symbol().to_string(),
                declared: self.decl.kernel.window_rows,
                kernel: kernel.window_rows(),
            });
        }
        if kernel.symbol() != self.decl.kernel.symbol {
            log::warn!(
                "'{}': running kernel '{}' for declared symbol '{}'",
                self.decl.name,
                kernel.symbol(),
                self.decl.kernel.symbol
            );
        }
        Ok(())
    }

    /// Run the default sequence over `input` (and `coefficients`) to completion.
    pub fn run<K: ComputeKernel<u8> + ?Sized>(
        &self,
        kernel: &mut K,
        input: Vec<u8>,
        coefficients: Option<Vec<i16>>,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        self.check_kernel(kernel)?;
        let mut runtime = Runtime::new(self, input, coefficients, options)?;
        runtime.run(kernel)
    }
}

fn check_row(queue: &'static str, bytes: usize) -> Result<(), ConfigError> {
    if bytes % DMA_WORD_BYTES != 0 {
        return Err(ConfigError::UnalignedRow { queue, bytes });
    }
    Ok(())
}

/// Validate a declaration and resolve open depths.
fn validate(decl: &PipelineDecl) -> Result<QueueDepths, ConfigError> {
    let kernel = &decl.kernel;

    if decl.width == 0 || decl.height == 0 || kernel.out_width == 0 {
        return Err(ConfigError::EmptyImage {
            width: decl.width,
            height: decl.height,
            out_width: kernel.out_width,
        });
    }
    check_row("input", decl.width * std::mem::size_of::<u8>())?;
    check_row("output", kernel.out_width * std::mem::size_of::<u8>())?;

    if kernel.window_rows == 0 {
        return Err(ConfigError::ZeroWindow);
    }
    if kernel.output_multiplier == 0 {
        return Err(ConfigError::ZeroMultiplier);
    }
    if decl.height < kernel.window_rows {
        return Err(ConfigError::HeightBelowWindow {
            height: decl.height,
            window: kernel.window_rows,
        });
    }
    if decl.border == BorderMode::Mirror && kernel.window_rows % 2 == 0 {
        return Err(ConfigError::MirrorNeedsOddWindow {
            window: kernel.window_rows,
        });
    }

    let mut depths = decl.depths;
    if depths.input == 0 {
        depths.input = kernel.window_rows;
    }
    if depths.output == 0 {
        depths.output = kernel.output_multiplier.max(DEFAULT_OUTPUT_DEPTH);
    }
    if depths.coefficients == 0 {
        depths.coefficients = kernel.coefficient_rows;
    }

    if depths.input < kernel.window_rows {
        return Err(ConfigError::InputDepthBelowWindow {
            depth: depths.input,
            window: kernel.window_rows,
        });
    }
    if depths.output < kernel.output_multiplier {
        return Err(ConfigError::OutputDepthBelowMultiplier {
            depth: depths.output,
            multiplier: kernel.output_multiplier,
        });
    }
    if depths.coefficients != kernel.coefficient_rows {
        return Err(ConfigError::CoefficientDepthMismatch {
            depth: depths.coefficients,
            rows: kernel.coefficient_rows,
        });
    }
    if kernel.coefficient_rows > 0 {
        if kernel.coefficient_len == 0 {
            return Err(ConfigError::MissingCoefficientLen {
                rows: kernel.coefficient_rows,
            });
        }
        check_row("coefficient", kernel.coefficient_len * std::mem::size_of::<i16>())?;
        if kernel.symbol == "conv2d4k" {
            let needed = CoefficientMatrix::row_len(kernel.coefficient_rows);
            if kernel.coefficient_len < needed {
                return Err(ConfigError::CoefficientRowTooShort {
                    symbol: kernel.symbol.clone(),
                    len: kernel.coefficient_len,
                    needed,
                });
            }
        }
    }

    Ok(depths)
}
