//! Compute-stage binding.
//!
//! The worker treats the per-pixel kernel as an opaque function with a fixed
//! positional signature, the same shape as the `extern "C"` kernels linked
//! into the core ELF:
//!
//! ```text
//! void conv2d4k(uint8_t *in_row_0, ..., uint8_t *in_row_3,
//!               int16_t *c_mtx_row, int32_t num_c_mtx_row,
//!               uint8_t *out_row, int32_t out_w);
//! ```
//!
//! [`ComputeKernel`] is that contract. Any backend (the CPU references in
//! [`reference`], a recorded mock, a real core) satisfies it without the
//! scheduler knowing the difference.

pub mod reference;

pub use reference::{BoxFilter, CoefficientMatrix, NearestNeighbor, Passthrough, TentUpscale};

/// Arguments of one kernel invocation.
#[derive(Debug)]
pub struct KernelCall<'a, T, C> {
    /// `K` input rows, top to bottom. Border positions alias the same row.
    pub rows: &'a [&'a [T]],
    /// Coefficient row selected for this invocation, if the pipeline has any
    pub coefficients: Option<&'a [C]>,
    /// Number of coefficient rows loaded for the run
    pub coefficient_rows: usize,
    /// Output row, written in place
    pub out: &'a mut [T],
    /// Valid output width
    pub out_width: usize,
}

/// A kernel the worker can call over a row window.
pub trait ComputeKernel<T, C = i16> {
    /// Symbol name the kernel is linked under.
    fn symbol(&self) -> &str;

    /// Number of input rows per call (`K`).
    fn window_rows(&self) -> usize;

    /// Compute one output row.
    fn compute(&mut self, call: KernelCall<'_, T, C>);
}

/// Kernel backed by a closure.
pub struct FnKernel<F> {
    symbol: String,
    window_rows: usize,
    f: F,
}

impl<F> FnKernel<F> {
    pub fn new(symbol: impl Into<String>, window_rows: usize, f: F) -> Self {
        Self {
            symbol: symbol.into(),
            window_rows,
            f,
        }
    }
}

impl<T, C, F> ComputeKernel<T, C> for FnKernel<F>
where
    F: FnMut(KernelCall<'_, T, C>),
{
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn window_rows(&self) -> usize {
        self.window_rows
    }

    fn compute(&mut self, call: KernelCall<'_, T, C>) {
        (self.f)(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_kernel_forwards() {
        let mut kernel = FnKernel::new("sum_rows", 2, |call: KernelCall<'_, u8, i16>| {
            for x in 0..call.out_width {
                call.out[x] = call.rows.iter().map(|r| r[x]).sum();
            }
        });
        assert_eq!(ComputeKernel::<u8, i16>::symbol(&kernel), "sum_rows");

        let a = [1u8, 2];
        let b = [10u8, 20];
        let rows: [&[u8]; 2] = [&a, &b];
        let mut out = [0u8; 2];
        ComputeKernel::<u8, i16>::compute(
            &mut kernel,
            KernelCall {
                rows: &rows,
                coefficients: None,
                coefficient_rows: 0,
                out: &mut out[..],
                out_width: 2,
            },
        );
        assert_eq!(out, [11, 22]);
    }
}
