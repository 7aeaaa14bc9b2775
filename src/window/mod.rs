//! Sliding row windows.
//!
//! A window of `K` rows around output row `o` covers the logical rows
//! `o - before ..= o + after`, with `before = (K - 1) / 2` and
//! `after = K - 1 - before`. Odd kernels are centred; even kernels read one
//! extra row below the centre (a 4-row kernel reads rows -1, 0, +1, +2).
//!
//! ```text
//!   K = 5, H = 6, replicate border
//!
//!   o = 0   [r0 r0 r0 r1 r2]   priming stage 0
//!   o = 1   [r0 r0 r1 r2 r3]   priming stage 1
//!   o = 2   [r0 r1 r2 r3 r4]   steady
//!   o = 3   [r1 r2 r3 r4 r5]   steady
//!   o = 4   [r2 r3 r4 r5 r5]   shrinking stage 0
//!   o = 5   [r3 r4 r5 r5 r5]   shrinking stage 1
//! ```

pub mod border;

pub use border::{mirror, supply, BorderMode};

use smallvec::SmallVec;

/// Logical row indices of one window, top to bottom.
pub type WindowRows = SmallVec<[usize; 8]>;

/// Geometry of a `K`-row window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShape {
    /// Number of rows (`K`)
    pub size: usize,
    /// Rows above the centre
    pub before: usize,
    /// Rows below the centre
    pub after: usize,
}

impl WindowShape {
    /// Shape for a kernel reading `size` rows. `size` must be at least 1.
    pub fn for_kernel(size: usize) -> Self {
        debug_assert!(size > 0);
        let before = size.saturating_sub(1) / 2;
        Self {
            size,
            before,
            after: size.saturating_sub(1) - before,
        }
    }

    /// Whether the window is centred on the output row.
    pub fn is_symmetric(&self) -> bool {
        self.before == self.after
    }

    /// Output rows whose window reaches above row 0.
    pub fn priming_stages(&self) -> usize {
        self.before
    }

    /// Output rows whose window reaches below row `H - 1`.
    pub fn shrinking_stages(&self) -> usize {
        self.after
    }

    /// Output rows with a fully in-range window, `H - (K - 1)`.
    pub fn steady_rows(&self, height: usize) -> usize {
        height.saturating_sub(self.size - 1)
    }

    /// Last real row the window around `center` reads.
    pub fn last_row(&self, center: usize, height: usize) -> usize {
        (center + self.after).min(height - 1)
    }

    /// First real row the window around `center` reads.
    pub fn first_row(&self, center: usize) -> usize {
        center.saturating_sub(self.before)
    }

    /// Real rows backing each window position around `center`.
    pub fn rows(&self, center: usize, height: usize, border: BorderMode) -> WindowRows {
        let top = center as isize - self.before as isize;
        (0..self.size as isize)
            .map(|offset| border.resolve(top + offset, height))
            .collect()
    }
}
