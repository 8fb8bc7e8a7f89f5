//! Symmetric distance matrix storing only the strictly lower triangle.
//!
//! The matrix tracks the coordinates of its smallest off-diagonal entry.
//! [`DistanceMatrix::set`] keeps that bookkeeping current, while
//! [`DistanceMatrix::set_quick`] and [`DistanceMatrix::reduce`] mark it stale
//! until [`DistanceMatrix::recompute_minimum`] is called.

use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::error::{ClusterError, Result};

/// Matrices at least this large scan their rows in parallel.
const PARALLEL_SCAN_MIN_DIMENSION: usize = 512;

/// Offset of cell (row, col), row > col, in the flat lower-triangle buffer.
#[inline]
fn triangle_offset(row: usize, col: usize) -> usize {
    debug_assert!(row > col);
    row * (row - 1) / 2 + col
}

#[inline]
fn canonical(row: usize, col: usize) -> (usize, usize) {
    if row > col { (row, col) } else { (col, row) }
}

fn allocate(dimension: usize, fill: f32) -> Result<Vec<f32>> {
    let cells = dimension
        .checked_mul(dimension.saturating_sub(1))
        .map(|c| c / 2)
        .ok_or(ClusterError::OutOfMemory { dimension })?;

    let mut values = Vec::new();
    values
        .try_reserve_exact(cells)
        .map_err(|_| ClusterError::OutOfMemory { dimension })?;
    values.resize(cells, fill);
    Ok(values)
}

/// Pairwise distances among `size()` items.
///
/// `get(i, i)` is always 0 and `get(i, j) == get(j, i)`.
#[derive(Clone, Debug)]
pub struct DistanceMatrix {
    dimension: usize,
    values: Vec<f32>,
    min_element: (usize, usize),
    min_stale: bool,
}

impl DistanceMatrix {
    /// Creates a matrix of `dimension` items with every off-diagonal cell set to `fill`.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the triangle cannot be allocated.
    pub fn new(dimension: usize, fill: f32) -> Result<Self> {
        let values = allocate(dimension, fill)?;
        Ok(Self {
            dimension,
            values,
            min_element: Self::first_cell(dimension),
            min_stale: false,
        })
    }

    // all cells tie after a fill, so the first stored cell is the minimum
    fn first_cell(dimension: usize) -> (usize, usize) {
        if dimension > 1 { (1, 0) } else { (0, 0) }
    }

    /// Number of items.
    pub fn size(&self) -> usize {
        self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.dimension == 0
    }

    #[inline]
    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.dimension || col >= self.dimension {
            return Err(ClusterError::OutOfRange { row, col, size: self.dimension });
        }
        Ok(())
    }

    /// Value of a stored cell; callers guarantee `row > col` and both in range.
    #[inline]
    pub(crate) fn cell(&self, row: usize, col: usize) -> f32 {
        self.values[triangle_offset(row, col)]
    }

    /// Distance between items `row` and `col`.
    pub fn get(&self, row: usize, col: usize) -> Result<f32> {
        self.check_index(row, col)?;
        if row == col {
            return Ok(0.0);
        }
        let (r, c) = canonical(row, col);
        Ok(self.cell(r, c))
    }

    /// Writes a distance and keeps the minimum current.
    ///
    /// Writing the diagonal is a no-op. Overwriting the cell that currently
    /// holds the minimum triggers a full rescan.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        self.check_index(row, col)?;
        if row == col {
            return Ok(());
        }
        let (r, c) = canonical(row, col);
        self.values[triangle_offset(r, c)] = value;

        if self.min_stale {
            return Ok(());
        }
        if (r, c) == self.min_element {
            self.recompute_minimum()?;
        } else if value < self.cell(self.min_element.0, self.min_element.1) {
            self.min_element = (r, c);
        }
        Ok(())
    }

    /// Writes a distance without maintaining the minimum.
    ///
    /// The minimum is stale afterwards: [`minimum_coordinates`](Self::minimum_coordinates)
    /// fails until [`recompute_minimum`](Self::recompute_minimum) runs.
    pub fn set_quick(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        self.check_index(row, col)?;
        if row == col {
            return Ok(());
        }
        let (r, c) = canonical(row, col);
        self.values[triangle_offset(r, c)] = value;
        self.min_stale = true;
        Ok(())
    }

    /// Fills every stored row in parallel. `fill(row, cells)` receives the
    /// cells `(row, 0..row)` of one row.
    ///
    /// Leaves the minimum stale. Stops at the first error `fill` returns.
    pub fn fill_rows<F>(&mut self, fill: F) -> Result<()>
    where
        F: Fn(usize, &mut [f32]) -> Result<()> + Sync,
    {
        let mut rows: Vec<(usize, &mut [f32])> = Vec::with_capacity(self.dimension.saturating_sub(1));
        let mut rest = self.values.as_mut_slice();
        for row in 1..self.dimension {
            let (cells, tail) = rest.split_at_mut(row);
            rows.push((row, cells));
            rest = tail;
        }
        rows.into_par_iter().try_for_each(|(row, cells)| fill(row, cells))?;
        self.min_stale = true;
        Ok(())
    }

    /// Removes item `row`, i.e. its row and its column. Later items move up by one.
    ///
    /// Leaves the minimum stale.
    pub fn reduce(&mut self, row: usize) -> Result<()> {
        if row >= self.dimension {
            return Err(ClusterError::OutOfRange { row, col: row, size: self.dimension });
        }

        let mut write = 0;
        for i in 1..self.dimension {
            if i == row {
                continue;
            }
            let start = triangle_offset(i, 0);
            for j in 0..i {
                if j == row {
                    continue;
                }
                self.values[write] = self.values[start + j];
                write += 1;
            }
        }
        self.values.truncate(write);

        self.dimension -= 1;
        self.min_stale = true;
        Ok(())
    }

    /// Full O(n²) scan for the smallest stored cell.
    ///
    /// Ties resolve to the lowest row, then the lowest column.
    pub fn recompute_minimum(&mut self) -> Result<()> {
        if self.dimension < 1 {
            return Err(ClusterError::OutOfRange { row: 0, col: 0, size: 0 });
        }
        if self.dimension == 1 {
            self.min_element = (0, 0);
            self.min_stale = false;
            return Ok(());
        }

        let key = |&(value, row, col): &(f32, usize, usize)| (OrderedFloat(value), row, col);
        let best = if self.dimension >= PARALLEL_SCAN_MIN_DIMENSION {
            (1..self.dimension)
                .into_par_iter()
                .map(|row| self.row_minimum(row))
                .min_by_key(key)
        } else {
            (1..self.dimension).map(|row| self.row_minimum(row)).min_by_key(key)
        };

        if let Some((_, row, col)) = best {
            self.min_element = (row, col);
        }
        self.min_stale = false;
        Ok(())
    }

    fn row_minimum(&self, row: usize) -> (f32, usize, usize) {
        let start = triangle_offset(row, 0);
        let (col, value) = self.values[start..start + row]
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| OrderedFloat(**v))
            .map(|(col, v)| (col, *v))
            .unwrap_or((0, f32::INFINITY));
        (value, row, col)
    }

    /// Canonical `(row, col)` with `row > col` of the smallest distance.
    ///
    /// A one-item matrix reports the diagonal `(0, 0)`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` on an empty matrix, `StaleMinimum` after an unchecked write or a reduction.
    pub fn minimum_coordinates(&self) -> Result<(usize, usize)> {
        if self.dimension == 0 {
            return Err(ClusterError::OutOfRange { row: 0, col: 0, size: 0 });
        }
        if self.min_stale {
            return Err(ClusterError::StaleMinimum);
        }
        Ok(self.min_element)
    }

    /// Smallest stored distance.
    pub fn minimum_value(&self) -> Result<f32> {
        let (row, col) = self.minimum_coordinates()?;
        self.get(row, col)
    }

    /// Re-dimensions the matrix to `dimension` items filled with `fill`, dropping old content.
    ///
    /// On allocation failure the matrix is left empty.
    pub fn resize(&mut self, dimension: usize, fill: f32) -> Result<()> {
        match allocate(dimension, fill) {
            Ok(values) => {
                self.values = values;
                self.dimension = dimension;
                self.min_element = Self::first_cell(dimension);
                self.min_stale = false;
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        self.values = Vec::new();
        self.dimension = 0;
        self.min_element = (0, 0);
        self.min_stale = false;
    }

    /// Iterates stored cells as `(row, col, value)` with `row > col`, row by row.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (1..self.dimension).flat_map(move |row| (0..row).map(move |col| (row, col, self.cell(row, col))))
    }

    /// Compares cell values of two matrices of the same dimension.
    pub fn try_eq(&self, other: &DistanceMatrix) -> Result<bool> {
        if self.dimension != other.dimension {
            return Err(ClusterError::DimensionMismatch {
                left: self.dimension,
                right: other.dimension,
            });
        }
        Ok(self.values == other.values)
    }
}

impl PartialEq for DistanceMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.try_eq(other).unwrap_or(false)
    }
}

impl Display for DistanceMatrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "DistanceMatrix(dimension={})", self.dimension)?;
        for row in 1..self.dimension {
            let start = triangle_offset(row, 0);
            writeln!(f, "{}: {}", row, self.values[start..start + row].iter().join(" "))?;
        }
        Ok(())
    }
}
