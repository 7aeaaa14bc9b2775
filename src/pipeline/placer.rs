//! Tile placement.
//!
//! Rows of an NPU column: row 0 is the shim (host DMA), row 1 the memory
//! tile, rows 2 and up are compute tiles.

use super::{ConfigError, PipelineDecl};

/// Tile identifier (column, row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub col: u8,
    pub row: u8,
}

impl TileId {
    #[inline]
    pub const fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }

    /// Kind of tile at this row.
    pub fn kind(&self) -> TileKind {
        match self.row {
            0 => TileKind::Shim,
            1 => TileKind::MemTile,
            _ => TileKind::Compute,
        }
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Shim,
    MemTile,
    Compute,
}

/// Where each party of a pipeline lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Compute tile running the window scheduler and kernel
    pub worker: TileId,
    /// Shim carrying the input fill
    pub input_shim: TileId,
    /// Shim carrying the output drain
    pub output_shim: TileId,
    /// Shim carrying the coefficient fill, if any
    pub coefficient_shim: Option<TileId>,
}

/// Assigns tiles to a declared pipeline.
pub trait Placer {
    fn place(&self, decl: &PipelineDecl) -> Result<Placement, ConfigError>;
}

/// Places everything in one column: shims in row 0, the worker on the first
/// compute tile unless the declaration pins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialPlacer {
    pub column: u8,
    /// Array columns
    pub cols: u8,
    /// Array rows including shim and memory tile
    pub rows: u8,
}

impl SequentialPlacer {
    /// NPU1 with four columns (Phoenix).
    pub const NPU1_COL4: Self = Self {
        column: 0,
        cols: 4,
        rows: 6,
    };

    fn check(&self, tile: TileId) -> Result<TileId, ConfigError> {
        if tile.col >= self.cols || tile.row >= self.rows {
            return Err(ConfigError::TileOutOfRange {
                tile,
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(tile)
    }
}

impl Default for SequentialPlacer {
    fn default() -> Self {
        Self::NPU1_COL4
    }
}

impl Placer for SequentialPlacer {
    fn place(&self, decl: &PipelineDecl) -> Result<Placement, ConfigError> {
        let worker = match decl.worker_tile {
            Some([col, row]) => {
                let tile = self.check(TileId::new(col, row))?;
                if tile.kind() != TileKind::Compute {
                    return Err(ConfigError::NotComputeTile { tile });
                }
                tile
            }
            None => self.check(TileId::new(self.column, 2))?,
        };
        let shim = TileId::new(worker.col, 0);

        Ok(Placement {
            worker,
            input_shim: shim,
            output_shim: shim,
            coefficient_shim: (decl.kernel.coefficient_rows > 0).then_some(shim),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::presets;

    #[test]
    fn test_tile_kinds() {
        assert_eq!(TileId::new(0, 0).kind(), TileKind::Shim);
        assert_eq!(TileId::new(0, 1).kind(), TileKind::MemTile);
        assert_eq!(TileId::new(3, 5).kind(), TileKind::Compute);
        assert_eq!(TileId::new(1, 2).to_string(), "(1,2)");
    }

    #[test]
    fn test_sequential_defaults() {
        let decl = presets::tent3x3();
        let placement = SequentialPlacer::default().place(&decl).unwrap();
        assert_eq!(placement.worker, TileId::new(0, 2));
        assert_eq!(placement.input_shim, TileId::new(0, 0));
        assert_eq!(placement.coefficient_shim, None);

        let placer = SequentialPlacer {
            column: 2,
            ..SequentialPlacer::default()
        };
        assert_eq!(placer.place(&decl).unwrap().worker, TileId::new(2, 2));
    }

    #[test]
    fn test_pinned_worker() {
        let mut decl = presets::coefficient_matrix();
        decl.worker_tile = Some([1, 4]);
        let placement = SequentialPlacer::default().place(&decl).unwrap();
        assert_eq!(placement.worker, TileId::new(1, 4));
        assert_eq!(placement.coefficient_shim, Some(TileId::new(1, 0)));

        decl.worker_tile = Some([0, 1]);
        assert_eq!(
            SequentialPlacer::default().place(&decl).unwrap_err(),
            ConfigError::NotComputeTile { tile: TileId::new(0, 1) }
        );

        decl.worker_tile = Some([4, 2]);
        assert!(matches!(
            SequentialPlacer::default().place(&decl),
            Err(ConfigError::TileOutOfRange { .. })
        ));
    }
}
