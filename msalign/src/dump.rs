//! Plaintext debug dumps of intermediate matcher results.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::algorithm::grid::{Grid, SpatialGrid};
use crate::algorithm::pair_finder::FeaturePair;
use crate::algorithm::superimposer::ShiftHistogram;
use crate::data::feature::Feature;
use crate::error::Result;

/// One block per non-empty cell: a header with the cell box, then `rt mz intensity` lines.
pub fn write_feature_buckets(
    path: &Path,
    grid: &SpatialGrid,
    buckets: &[Vec<usize>],
    scene: &[Feature],
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (cell, bucket) in buckets.iter().enumerate().filter(|(_, b)| !b.is_empty()) {
        let bbox = grid.cell_bounding_box(cell);
        writeln!(
            writer,
            "# cell {} rt [{}, {}] mz [{}, {}] features {}",
            cell,
            bbox.min.rt,
            bbox.max.rt,
            bbox.min.mz,
            bbox.max.mz,
            bucket.len()
        )?;
        for &i in bucket {
            writeln!(writer, "{} {} {}", scene[i].rt, scene[i].mz, scene[i].intensity)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    debug!("wrote feature buckets to {}", path.display());
    Ok(())
}

/// Per cell: the chosen transform, then the non-zero histogram cells as
/// `rt_shift mz_shift quality`.
pub fn write_shift_buckets(
    path: &Path,
    grid: &Grid,
    histograms: &[(usize, Option<ShiftHistogram>)],
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (cell, histogram) in histograms {
        match grid.cells()[*cell].shift {
            Some(shift) => writeln!(writer, "# cell {} transform {}", cell, shift)?,
            None => writeln!(writer, "# cell {} transform none", cell)?,
        }
        if let Some(histogram) = histogram {
            for (position, quality) in histogram.iter_nonzero() {
                writeln!(writer, "{} {}", position, quality)?;
            }
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    debug!("wrote shift histograms of {} cells to {}", histograms.len(), path.display());
    Ok(())
}

pub fn write_feature_pairs(path: &Path, pairs: &[FeaturePair]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# model_index scene_index model_rt model_mz scene_rt scene_mz quality")?;
    for p in pairs {
        writeln!(
            writer,
            "{} {} {} {} {}",
            p.model_index, p.scene_index, p.model_position, p.scene_position, p.quality
        )?;
    }
    writer.flush()?;
    debug!("wrote {} feature pairs to {}", pairs.len(), path.display());
    Ok(())
}
