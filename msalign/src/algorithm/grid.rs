use itertools::iproduct;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::matcher::MAX_CELLS;
use crate::data::feature::{BoundingBox2D, Dim, MapSlice, Position};
use crate::data::transform::ShiftTransform;
use crate::error::{AlignError, Result};

/// Subtracted from the bucket count when sizing buckets so that the maximal
/// coordinate still falls into the last bucket.
pub const BUCKET_EPSILON: f64 = 0.01;

/// One cell of the matching grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub bounding_box: BoundingBox2D,
    /// set once the cell has been superimposed
    pub shift: Option<ShiftTransform>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    cells: Vec<GridCell>,
}

impl Grid {
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [GridCell] {
        &mut self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Regular partition of a bounding box into `number_buckets[RT] x number_buckets[MZ]`
/// cells. Cell index is `rt_bucket + mz_bucket * number_buckets[RT]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    origin: Position,
    box_size: [f64; 2],
    number_buckets: [usize; 2],
}

impl SpatialGrid {
    /// An axis without extent (single point or empty box) gets a unit box size.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a zero bucket count or more than [`MAX_CELLS`] cells.
    pub fn build(bounding_box: &BoundingBox2D, number_buckets: [usize; 2]) -> Result<Self> {
        if let Some(dim) = Dim::ALL.into_iter().find(|d| number_buckets[d.index()] == 0) {
            return Err(AlignError::invalid(
                format!("number_buckets:{}", dim.short_name()),
                "at least one bucket is required",
            ));
        }

        match number_buckets[0].checked_mul(number_buckets[1]) {
            Some(cells) if cells <= MAX_CELLS => {}
            _ => {
                return Err(AlignError::invalid(
                    "number_buckets",
                    format!(
                        "grid of {}x{} buckets exceeds {} cells",
                        number_buckets[0], number_buckets[1], MAX_CELLS
                    ),
                ))
            }
        }

        let origin = if bounding_box.is_empty() { Position::default() } else { bounding_box.min };
        let extent = bounding_box.diagonal().to_array();
        let mut box_size = [1.0; 2];
        for d in 0..2 {
            if extent[d] > 0.0 {
                box_size[d] = extent[d] / (number_buckets[d] as f64 - BUCKET_EPSILON);
            }
        }

        debug!(
            "grid: {}x{} buckets of {:.4}x{:.4} from ({})",
            number_buckets[0], number_buckets[1], box_size[0], box_size[1], origin
        );
        Ok(SpatialGrid { origin, box_size, number_buckets })
    }

    pub fn number_buckets(&self) -> [usize; 2] {
        self.number_buckets
    }

    pub fn box_size(&self) -> [f64; 2] {
        self.box_size
    }

    pub fn number_of_cells(&self) -> usize {
        self.number_buckets[0] * self.number_buckets[1]
    }

    /// Cell index of `position`, `None` if it lies outside the grid.
    pub fn bucket_index(&self, position: Position) -> Option<usize> {
        let origin = self.origin.to_array();
        let mut bucket = [0usize; 2];
        for (d, value) in position.to_array().into_iter().enumerate() {
            let offset = (value - origin[d]) / self.box_size[d];
            // also rejects NaN
            if !(offset >= 0.0) {
                return None;
            }
            let b = offset.floor() as usize;
            if b >= self.number_buckets[d] {
                return None;
            }
            bucket[d] = b;
        }
        Some(bucket[0] + bucket[1] * self.number_buckets[0])
    }

    /// Feature indices per cell, in input order.
    ///
    /// # Errors
    ///
    /// `PointOutsideGrid` for the first feature that maps to no cell.
    pub fn assign(&self, map: MapSlice<'_>) -> Result<Vec<Vec<usize>>> {
        let mut buckets = vec![Vec::new(); self.number_of_cells()];
        for (index, feature) in map.iter() {
            let cell = self
                .bucket_index(feature.position())
                .ok_or(AlignError::PointOutsideGrid { index, rt: feature.rt, mz: feature.mz })?;
            buckets[cell].push(index);
        }
        Ok(buckets)
    }

    pub fn cell_bounding_box(&self, index: usize) -> BoundingBox2D {
        let rt_bucket = index % self.number_buckets[0];
        let mz_bucket = index / self.number_buckets[0];
        let min = Position::new(
            self.origin.rt + rt_bucket as f64 * self.box_size[0],
            self.origin.mz + mz_bucket as f64 * self.box_size[1],
        );
        let max = Position::new(min.rt + self.box_size[0], min.mz + self.box_size[1]);
        BoundingBox2D::new(min, max)
    }

    /// Cells without transforms, in index order.
    pub fn to_grid(&self) -> Grid {
        let cells = iproduct!(0..self.number_buckets[1], 0..self.number_buckets[0])
            .map(|(mz, rt)| GridCell {
                bounding_box: self.cell_bounding_box(rt + mz * self.number_buckets[0]),
                shift: None,
            })
            .collect();
        Grid { cells }
    }
}
