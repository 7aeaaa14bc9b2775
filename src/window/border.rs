//! Border row suppliers.
//!
//! Map a logical row index, possibly outside `[0, height)`, to the real row
//! whose buffer stands in for it. No data is copied: the scheduler hands
//! the same slot to every window position that maps to the same row.

use serde::{Deserialize, Serialize};

/// How out-of-range rows are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderMode {
    /// Repeat the first/last row
    #[default]
    Replicate,
    /// Reflect about the first/last row (`-1 -> 1`, `H -> H-2`)
    Mirror,
}

impl BorderMode {
    /// Resolve `row_index` against an image of `height` rows.
    #[inline]
    pub fn resolve(self, row_index: isize, height: usize) -> usize {
        match self {
            BorderMode::Replicate => supply(row_index, height),
            BorderMode::Mirror => mirror(row_index, height),
        }
    }
}

impl std::fmt::Display for BorderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BorderMode::Replicate => write!(f, "replicate"),
            BorderMode::Mirror => write!(f, "mirror"),
        }
    }
}

/// Clamp `row_index` to `[0, height - 1]`.
#[inline]
pub fn supply(row_index: isize, height: usize) -> usize {
    debug_assert!(height > 0);
    let last = height as isize - 1;
    row_index.clamp(0, last) as usize
}

/// Reflect `row_index` about the edge rows, without repeating the edge.
#[inline]
pub fn mirror(row_index: isize, height: usize) -> usize {
    debug_assert!(height > 0);
    let last = height as isize - 1;
    let reflected = if row_index < 0 {
        -row_index
    } else if row_index > last {
        2 * last - row_index
    } else {
        row_index
    };
    // Reflections further than the image height fall back to clamping.
    reflected.clamp(0, last) as usize
}
