//! Scalar CPU reference kernels.
//!
//! These mirror the scalar builds of the core kernels so pipelines can run
//! end to end without hardware. Samples are `u8`, coefficients `i16`.
//! Horizontal neighbours outside the input row are clamped to the edge.

use super::{ComputeKernel, KernelCall};

#[inline]
fn clamp_col(x: isize, width: usize) -> usize {
    x.clamp(0, width as isize - 1) as usize
}

/// Copies the single input row.
#[derive(Debug, Clone, Default)]
pub struct Passthrough;

impl ComputeKernel<u8> for Passthrough {
    fn symbol(&self) -> &str {
        "passthrough"
    }

    fn window_rows(&self) -> usize {
        1
    }

    fn compute(&mut self, call: KernelCall<'_, u8, i16>) {
        let n = call.out_width.min(call.rows[0].len());
        call.out[..n].copy_from_slice(&call.rows[0][..n]);
    }
}

/// Nearest-neighbour horizontal up-scaling, `out[x] = in[x / factor]`.
///
/// Vertical scaling comes from the output multiplier: the worker calls the
/// kernel `factor` times over the same row.
#[derive(Debug, Clone)]
pub struct NearestNeighbor {
    pub factor: usize,
}

impl ComputeKernel<u8> for NearestNeighbor {
    fn symbol(&self) -> &str {
        "nearest_neighbor"
    }

    fn window_rows(&self) -> usize {
        1
    }

    fn compute(&mut self, call: KernelCall<'_, u8, i16>) {
        let row = call.rows[0];
        for x in 0..call.out_width {
            call.out[x] = row[(x / self.factor).min(row.len() - 1)];
        }
    }
}

/// 3×3 tent filter `[1 2 1] ⊗ [1 2 1] / 16` with horizontal up-scaling.
#[derive(Debug, Clone)]
pub struct TentUpscale {
    pub scale: usize,
}

impl TentUpscale {
    const TAPS: [u32; 3] = [1, 2, 1];
}

impl ComputeKernel<u8> for TentUpscale {
    fn symbol(&self) -> &str {
        "conv2d3k"
    }

    fn window_rows(&self) -> usize {
        3
    }

    fn compute(&mut self, call: KernelCall<'_, u8, i16>) {
        let in_w = call.rows[0].len();
        for out_x in 0..call.out_width {
            let in_x = (out_x / self.scale) as isize;
            let mut sum = 0u32;
            for (n, row) in call.rows.iter().enumerate() {
                for m in 0..3 {
                    let x = clamp_col(in_x + m as isize - 1, in_w);
                    sum += row[x] as u32 * Self::TAPS[n] * Self::TAPS[m];
                }
            }
            call.out[out_x] = (sum / 16) as u8;
        }
    }
}

/// Normalised `K×K` mean with horizontal up-scaling.
#[derive(Debug, Clone)]
pub struct BoxFilter {
    pub size: usize,
    pub scale: usize,
}

impl ComputeKernel<u8> for BoxFilter {
    fn symbol(&self) -> &str {
        "box2d"
    }

    fn window_rows(&self) -> usize {
        self.size
    }

    fn compute(&mut self, call: KernelCall<'_, u8, i16>) {
        let in_w = call.rows[0].len();
        let before = (self.size as isize - 1) / 2;
        let area = (self.size * self.size) as u32;
        for out_x in 0..call.out_width {
            let in_x = (out_x / self.scale) as isize;
            let sum: u32 = call
                .rows
                .iter()
                .flat_map(|row| {
                    (0..self.size as isize)
                        .map(move |m| row[clamp_col(in_x + m - before, in_w)] as u32)
                })
                .sum();
            call.out[out_x] = ((sum + area / 2) / area) as u8;
        }
    }
}

/// 4×4 convolution driven by a coefficient matrix row.
///
/// The coefficient row holds one 4×4 tap block per horizontal phase,
/// laid out as `16 * phase + 4 * row_tap + col_tap`. The number of
/// coefficient rows is the scale factor in both directions: the worker
/// passes row `m` for vertical phase `m`.
#[derive(Debug, Clone, Default)]
pub struct CoefficientMatrix;

impl CoefficientMatrix {
    /// Fixed-point one for generated weights.
    pub const ONE: i32 = 64;

    /// Coefficients one row needs to cover `scale` output phases.
    pub const fn row_len(scale: usize) -> usize {
        16 * scale
    }

    /// Bilinear coefficient rows for an integer `scale`.
    ///
    /// Output phase `p` samples the input at offset `(p + 0.5) / scale - 0.5`
    /// from the centre pixel, which lands between taps -1..0 or 0..+1.
    pub fn bilinear(scale: usize) -> Vec<Vec<i16>> {
        let taps = |phase: usize| -> [i32; 4] {
            let offset = (phase as f64 + 0.5) / scale as f64 - 0.5;
            let frac = (offset.abs() * Self::ONE as f64).round() as i32;
            if offset < 0.0 {
                [frac, Self::ONE - frac, 0, 0]
            } else {
                [0, Self::ONE - frac, frac, 0]
            }
        };

        (0..scale)
            .map(|row_phase| {
                let vertical = taps(row_phase);
                let mut row = vec![0i16; Self::row_len(scale)];
                for col_phase in 0..scale {
                    let horizontal = taps(col_phase);
                    for n in 0..4 {
                        for m in 0..4 {
                            // Products stay within i16 once divided back by ONE.
                            row[16 * col_phase + 4 * n + m] =
                                (vertical[n] * horizontal[m] / Self::ONE) as i16;
                        }
                    }
                }
                row
            })
            .collect()
    }
}

impl ComputeKernel<u8> for CoefficientMatrix {
    fn symbol(&self) -> &str {
        "conv2d4k"
    }

    fn window_rows(&self) -> usize {
        4
    }

    fn compute(&mut self, call: KernelCall<'_, u8, i16>) {
        let Some(coeffs) = call.coefficients else {
            log::warn!("conv2d4k called without coefficients");
            call.out[..call.out_width].fill(0);
            return;
        };
        let scale = call.coefficient_rows.max(1);
        let in_w = call.rows[0].len();

        for out_x in 0..call.out_width {
            let in_x = (out_x / scale) as isize;
            let phase = out_x % scale;

            let mut pixel = 0i32;
            let mut acc = 0i32;
            for (n, row) in call.rows.iter().enumerate().take(4) {
                for m in 0..4 {
                    let w = coeffs[16 * phase + 4 * n + m] as i32;
                    acc += w;
                    pixel += row[clamp_col(in_x + m as isize - 1, in_w)] as i32 * w;
                }
            }

            call.out[out_x] = if acc == 0 { 0 } else { (pixel / acc).clamp(0, 255) as u8 };
        }
    }
}
