//! Uniform bin grid over the owned particles' bounding box.

use crate::arrays::Vec3;
use crate::config::SortConfig;
use crate::error::{StorageError, StorageResult};

/// Uniform grid of spatial bins, traversed in row-major order
/// (x fastest, then y, then z).
#[derive(Clone, Debug, PartialEq)]
pub struct BinGrid {
    lo: Vec3,
    inv: Vec3,
    dims: [usize; 3],
}

impl BinGrid {
    /// Plans a grid covering `positions`.
    ///
    /// The bin edge is the configured `bin_size`, or else the length that
    /// puts `particles_per_bin` particles in an average bin, never below one
    /// particle per bin. Axes with zero extent, and z in 2-D, get one bin.
    ///
    /// Automatic sizing also gives one bin to any axis thinner than the
    /// edge, recomputing the edge over the remaining axes, and never plans
    /// more than `ceil(n / particles_per_bin)` bins.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TooManyBins`] when the grid exceeds
    /// `max_bins`, which usually means the positions are corrupted.
    pub fn plan(positions: &[Vec3], config: &SortConfig) -> StorageResult<Self> {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for x in positions {
            for d in 0..3 {
                lo[d] = lo[d].min(x[d]);
                hi[d] = hi[d].max(x[d]);
            }
        }

        let axes = usize::from(config.dimension).min(3);
        let mut extent = [0.0; 3];
        let mut active = [false; 3];
        for d in 0..axes {
            extent[d] = hi[d] - lo[d];
            active[d] = extent[d] > 0.0;
        }
        if positions.is_empty() {
            lo = [0.0; 3];
        }

        let count = positions.len() as f64;
        let edge = match config.bin_size {
            Some(size) => Some(size),
            None => auto_edge(&extent, &mut active, count, config.particles_per_bin),
        };
        let Some(edge) = edge.filter(|_| active.iter().any(|axis| *axis)) else {
            return Ok(Self {
                lo,
                inv: [0.0; 3],
                dims: [1; 3],
            });
        };

        let mut dims = [1usize; 3];
        let mut total = 1.0_f64;
        for d in 0..3 {
            if active[d] {
                let n = (extent[d] / edge).floor().max(1.0);
                total *= n;
                // Bounded by max_bins below before any allocation.
                dims[d] = n.min(usize::MAX as f64) as usize;
            }
        }

        if config.bin_size.is_none() {
            let cap = (count / config.particles_per_bin.max(1.0)).ceil().max(1.0);
            while total > cap {
                let widest = (0..3).max_by_key(|d| dims[*d]).unwrap_or(0);
                if dims[widest] == 1 {
                    break;
                }
                dims[widest] -= 1;
                total = dims.iter().map(|n| *n as f64).product();
            }
        }

        if !total.is_finite() || total > config.max_bins as f64 {
            return Err(StorageError::TooManyBins {
                requested: if total.is_finite() && total < u64::MAX as f64 {
                    total as u64
                } else {
                    u64::MAX
                },
                limit: config.max_bins,
            });
        }

        let mut inv = [0.0; 3];
        for d in 0..3 {
            if active[d] {
                inv[d] = dims[d] as f64 / extent[d];
            }
        }
        Ok(Self { lo, inv, dims })
    }

    /// Bins along each axis.
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of bins.
    #[must_use]
    pub const fn bin_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Bin holding position `x`.
    ///
    /// A position on a bin boundary belongs to the upper bin; positions on
    /// the upper box face are clamped into the last bin.
    #[must_use]
    pub fn bin_of(&self, x: &Vec3) -> usize {
        let mut cell = [0usize; 3];
        for d in 0..3 {
            let raw = ((x[d] - self.lo[d]) * self.inv[d]).floor();
            let last = self.dims[d] - 1;
            cell[d] = if raw <= 0.0 {
                0
            } else {
                (raw as usize).min(last)
            };
        }
        (cell[2] * self.dims[1] + cell[1]) * self.dims[0] + cell[0]
    }
}

/// Heuristic bin edge over the active axes.
///
/// Axes thinner than the edge are deactivated and the edge is recomputed
/// without them. Returns `None` once no axis is left.
fn auto_edge(extent: &[f64; 3], active: &mut [bool; 3], count: f64, per_bin: f64) -> Option<f64> {
    loop {
        let rank = active.iter().filter(|axis| **axis).count();
        if rank == 0 {
            return None;
        }
        let volume: f64 = (0..3).filter(|d| active[*d]).map(|d| extent[d]).product();
        let root = |x: f64| match rank {
            1 => x,
            2 => x.sqrt(),
            _ => x.cbrt(),
        };
        let edge = root(volume * per_bin / count).max(root(volume / count));

        let mut dropped = false;
        for d in 0..3 {
            if active[d] && extent[d] < edge {
                active[d] = false;
                dropped = true;
            }
        }
        if !dropped {
            return Some(edge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat() -> SortConfig {
        SortConfig {
            dimension: 2,
            ..SortConfig::default()
        }
    }

    #[test]
    fn test_heuristic_grid() {
        let positions = [[1.0, 1.0, 0.0], [9.0, 9.0, 0.0], [1.0, 9.0, 0.0], [9.0, 1.0, 0.0]];
        // 64 area * 2 per bin / 4 particles = 32 -> edge 5.66 -> one bin per axis.
        let grid = BinGrid::plan(&positions, &flat()).unwrap();
        assert_eq!(grid.dims(), [1, 1, 1]);

        let config = SortConfig {
            particles_per_bin: 0.5,
            ..flat()
        };
        // Clamped to one particle per bin: edge 4.
        let grid = BinGrid::plan(&positions, &config).unwrap();
        assert_eq!(grid.dims(), [2, 2, 1]);
    }

    #[test]
    fn test_boundaries_and_clamping() {
        let positions = [[0.0, 0.0, 0.0], [4.0, 4.0, 4.0]];
        let config = SortConfig {
            bin_size: Some(1.0),
            ..SortConfig::default()
        };
        let grid = BinGrid::plan(&positions, &config).unwrap();
        assert_eq!(grid.dims(), [4, 4, 4]);
        assert_eq!(grid.bin_of(&[0.0, 0.0, 0.0]), 0);
        // Exactly on the first boundary: upper bin.
        assert_eq!(grid.bin_of(&[1.0, 0.0, 0.0]), 1);
        // Upper face clamps into the last bin.
        assert_eq!(grid.bin_of(&[4.0, 4.0, 4.0]), 63);
        assert_eq!(grid.bin_of(&[-3.0, 0.0, 0.0]), 0);
        // Row-major: y advances by one row of x bins.
        assert_eq!(grid.bin_of(&[0.5, 1.5, 0.5]), 4);
        assert_eq!(grid.bin_of(&[0.5, 0.5, 1.5]), 16);
    }

    #[test]
    fn test_too_many_bins() {
        let positions = [[0.0, 0.0, 0.0], [1.0e6, 1.0e6, 1.0e6]];
        let config = SortConfig {
            bin_size: Some(1.0),
            max_bins: 1_000_000,
            ..SortConfig::default()
        };
        let err = BinGrid::plan(&positions, &config).unwrap_err();
        assert_eq!(
            err,
            StorageError::TooManyBins { requested: 1_000_000_000_000_000_000, limit: 1_000_000 }
        );
    }

    #[test]
    fn test_degenerate_extent() {
        let positions = [[2.0, 2.0, 2.0], [2.0, 2.0, 2.0]];
        let grid = BinGrid::plan(&positions, &SortConfig::default()).unwrap();
        assert_eq!(grid.bin_count(), 1);
        assert_eq!(grid.bin_of(&[2.0, 2.0, 2.0]), 0);
    }
    #[test]
    fn test_thin_axis_gets_one_bin() {
        // 10x10 lattice with sub-nanometre z noise.
        let positions: Vec<Vec3> = (0..100_i32)
            .map(|i| {
                let z = if i % 2 == 0 { 0.0 } else { 1.0e-9 };
                [f64::from(i % 10), f64::from(i / 10), z]
            })
            .collect();
        let grid = BinGrid::plan(&positions, &SortConfig::default()).unwrap();
        // Planar edge sqrt(81 * 2 / 100) = 1.27 -> 7 bins per axis.
        assert_eq!(grid.dims(), [7, 7, 1]);
        assert!(grid.bin_count() <= 50);
    }

    #[test]
    fn test_auto_grid_respects_bin_budget() {
        let positions = [
            [8.0, 8.0, 0.0],
            [1.0, 1.0, 0.9],
            [9.0, 2.0, 0.3],
            [2.0, 9.0, 0.6],
            [3.0, 3.0, 0.45],
            [6.0, 7.0, 0.15],
            [2.0, 6.0, 0.75],
            [7.0, 1.5, 0.5],
        ];
        let grid = BinGrid::plan(&positions, &SortConfig::default()).unwrap();
        // z (0.9) is thinner than the 3-D edge (2.43); planar edge is 4.
        assert_eq!(grid.dims(), [2, 2, 1]);
        assert_eq!(grid.bin_of(&[4.9, 4.9, 0.9]), 0);
        assert_eq!(grid.bin_of(&[5.0, 1.0, 0.0]), 1);
    }

    #[test]
    fn test_explicit_bin_size_keeps_thin_axes() {
        let positions = [[0.0, 0.0, 0.0], [4.0, 4.0, 2.0]];
        let config = SortConfig {
            bin_size: Some(1.0),
            ..SortConfig::default()
        };
        let grid = BinGrid::plan(&positions, &config).unwrap();
        assert_eq!(grid.dims(), [4, 4, 2]);
    }
}
