//! Built-in pipeline declarations and their CPU kernels.

use super::{ConfigError, KernelBinding, PipelineDecl, QueueDepths};
use crate::kernel::{
    BoxFilter, CoefficientMatrix, ComputeKernel, NearestNeighbor, Passthrough, TentUpscale,
};
use crate::window::BorderMode;
use std::path::Path;

/// Names accepted by [`by_name`].
pub const PRESET_NAMES: [&str; 5] = ["passthrough", "nearest2x", "tent3x3", "conv2d4k", "box5x5"];

const WIDTH: usize = 32;
const HEIGHT: usize = 16;

fn binding(
    symbol: &str,
    window_rows: usize,
    out_width: usize,
    output_multiplier: usize,
) -> KernelBinding {
    KernelBinding {
        symbol: symbol.to_string(),
        window_rows,
        out_width,
        output_multiplier,
        coefficient_rows: 0,
        coefficient_len: 0,
    }
}

fn decl(name: &str, width: usize, kernel: KernelBinding) -> PipelineDecl {
    PipelineDecl {
        name: name.to_string(),
        width,
        height: HEIGHT,
        border: BorderMode::Replicate,
        worker_tile: None,
        kernel,
        depths: QueueDepths::default(),
    }
}

/// One row in, the same row out.
pub fn passthrough() -> PipelineDecl {
    decl("passthrough", WIDTH, binding("passthrough", 1, WIDTH, 1))
}

/// 2× nearest-neighbour up-scaling.
pub fn nearest2x() -> PipelineDecl {
    decl("nearest2x", WIDTH, binding("nearest_neighbor", 1, 2 * WIDTH, 2))
}

/// 3×3 tent filter with 2× up-scaling.
pub fn tent3x3() -> PipelineDecl {
    let mut d = decl("tent3x3", WIDTH, binding("conv2d3k", 3, 2 * WIDTH, 2));
    d.depths.input = 4;
    d
}

/// 4-row coefficient-matrix convolution with 2× bilinear weights.
pub fn coefficient_matrix() -> PipelineDecl {
    let mut kernel = binding("conv2d4k", 4, 2 * WIDTH, 2);
    kernel.coefficient_rows = 2;
    kernel.coefficient_len = 16 * 2;
    decl("conv2d4k", WIDTH, kernel)
}

/// 5×5 box blur, no scaling.
pub fn box5x5() -> PipelineDecl {
    let mut d = decl("box5x5", WIDTH, binding("box2d", 5, WIDTH, 1));
    d.border = BorderMode::Mirror;
    d
}

/// Built-in preset by name.
pub fn by_name(name: &str) -> Option<PipelineDecl> {
    match name {
        "passthrough" => Some(passthrough()),
        "nearest2x" => Some(nearest2x()),
        "tent3x3" => Some(tent3x3()),
        "conv2d4k" => Some(coefficient_matrix()),
        "box5x5" => Some(box5x5()),
        _ => None,
    }
}

/// Resolve a preset name, looking in `preset_dir` for `<name>.toml` before
/// the built-ins.
pub fn resolve(name: &str, preset_dir: &Path) -> anyhow::Result<PipelineDecl> {
    let path = preset_dir.join(format!("{}.toml", name));
    if path.exists() {
        log::info!("Using preset file {}", path.display());
        return PipelineDecl::from_file(&path);
    }
    by_name(name).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown preset '{}' (built-in: {})",
            name,
            PRESET_NAMES.join(", ")
        )
    })
}

/// CPU reference kernel for a declared binding.
pub fn reference_kernel(decl: &PipelineDecl) -> Result<Box<dyn ComputeKernel<u8>>, ConfigError> {
    let binding = &decl.kernel;
    let scale = (binding.out_width / decl.width.max(1)).max(1);
    let kernel: Box<dyn ComputeKernel<u8>> = match binding.symbol.as_str() {
        "passthrough" => Box::new(Passthrough),
        "nearest_neighbor" => Box::new(NearestNeighbor { factor: scale }),
        "conv2d3k" => Box::new(TentUpscale { scale }),
        "conv2d4k" => Box::new(CoefficientMatrix),
        "box2d" => Box::new(BoxFilter {
            size: binding.window_rows,
            scale,
        }),
        _ => {
            return Err(ConfigError::UnknownKernel {
                symbol: binding.symbol.clone(),
            })
        }
    };
    Ok(kernel)
}

/// Coefficient buffer the reference kernels expect, if the binding has one.
pub fn reference_coefficients(decl: &PipelineDecl) -> Option<Vec<i16>> {
    let binding = &decl.kernel;
    if binding.coefficient_rows == 0 {
        return None;
    }
    let rows = match binding.symbol.as_str() {
        "conv2d4k" => CoefficientMatrix::bilinear(binding.coefficient_rows),
        _ => vec![vec![1; binding.coefficient_len]; binding.coefficient_rows],
    };
    // Each row keeps its own slot of `coefficient_len` values
    let flat: Vec<i16> = rows
        .into_iter()
        .flat_map(|mut row| {
            row.resize(binding.coefficient_len, 0);
            row
        })
        .collect();
    debug_assert_eq!(flat.len(), decl.coefficient_len());
    Some(flat)
}

/// Diagonal gradient test image.
pub fn gradient(width: usize, height: usize) -> Vec<u8> {
    let span = (width + height).saturating_sub(2).max(1);
    (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) * 255 / span) as u8))
        .collect()
}
