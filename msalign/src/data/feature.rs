use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::ops::{Index, Sub};
use std::path::Path;

use itertools::Either;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The two axes of an LC-MS feature map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Rt,
    Mz,
}

impl Dim {
    pub const ALL: [Dim; 2] = [Dim::Rt, Dim::Mz];

    /// Axis name as used in parameter keys, e.g. `number_buckets:RT`.
    pub fn short_name(&self) -> &'static str {
        match self {
            Dim::Rt => "RT",
            Dim::Mz => "MZ",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Dim::Rt => 0,
            Dim::Mz => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub rt: f64,
    pub mz: f64,
}

impl Position {
    pub fn new(rt: f64, mz: f64) -> Self {
        Position { rt, mz }
    }

    pub fn from_array(values: [f64; 2]) -> Self {
        Position { rt: values[0], mz: values[1] }
    }

    pub fn to_array(&self) -> [f64; 2] {
        [self.rt, self.mz]
    }
}

impl Index<Dim> for Position {
    type Output = f64;

    fn index(&self, dim: Dim) -> &f64 {
        match dim {
            Dim::Rt => &self.rt,
            Dim::Mz => &self.mz,
        }
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, other: Position) -> Position {
        Position::new(self.rt - other.rt, self.mz - other.mz)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.rt, self.mz)
    }
}

/// A detected LC-MS feature: retention time, mass-to-charge ratio and intensity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub rt: f64,
    pub mz: f64,
    pub intensity: f64,
}

impl Feature {
    pub fn new(rt: f64, mz: f64, intensity: f64) -> Self {
        Feature { rt, mz, intensity }
    }

    pub fn position(&self) -> Position {
        Position::new(self.rt, self.mz)
    }
}

/// Reads a feature map stored as a JSON array of `{rt, mz, intensity}` objects.
pub fn read_feature_map<P: AsRef<Path>>(path: P) -> Result<Vec<Feature>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Axis-aligned box in (rt, mz). A fresh box is empty and grows with `enlarge`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2D {
    pub min: Position,
    pub max: Position,
}

impl Default for BoundingBox2D {
    fn default() -> Self {
        BoundingBox2D {
            min: Position::new(f64::INFINITY, f64::INFINITY),
            max: Position::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }
}

impl BoundingBox2D {
    pub fn new(min: Position, max: Position) -> Self {
        BoundingBox2D { min, max }
    }

    pub fn from_positions<I: IntoIterator<Item = Position>>(positions: I) -> Self {
        let mut bbox = BoundingBox2D::default();
        for position in positions {
            bbox.enlarge(position);
        }
        bbox
    }

    pub fn from_features(features: &[Feature]) -> Self {
        Self::from_positions(features.iter().map(Feature::position))
    }

    pub fn is_empty(&self) -> bool {
        !(self.min.rt <= self.max.rt && self.min.mz <= self.max.mz)
    }

    pub fn enlarge(&mut self, position: Position) {
        self.min.rt = self.min.rt.min(position.rt);
        self.min.mz = self.min.mz.min(position.mz);
        self.max.rt = self.max.rt.max(position.rt);
        self.max.mz = self.max.mz.max(position.mz);
    }

    /// Extent along both axes, zero for an empty box.
    pub fn diagonal(&self) -> Position {
        if self.is_empty() {
            Position::default()
        } else {
            self.max - self.min
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        position.rt >= self.min.rt
            && position.rt <= self.max.rt
            && position.mz >= self.min.mz
            && position.mz <= self.max.mz
    }
}

/// Borrowed view on a feature map, optionally restricted to a subset of
/// indices. Indices reported by [`MapSlice::iter`] always refer to the full map.
#[derive(Clone, Copy, Debug)]
pub struct MapSlice<'a> {
    features: &'a [Feature],
    indices: Option<&'a [usize]>,
}

impl<'a> MapSlice<'a> {
    pub fn all(features: &'a [Feature]) -> Self {
        MapSlice { features, indices: None }
    }

    /// # Panics
    ///
    /// Iteration panics if an index is out of bounds for `features`.
    pub fn subset(features: &'a [Feature], indices: &'a [usize]) -> Self {
        MapSlice { features, indices: Some(indices) }
    }

    pub fn len(&self) -> usize {
        match self.indices {
            Some(indices) => indices.len(),
            None => self.features.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a Feature)> + 'a {
        let features = self.features;
        match self.indices {
            Some(indices) => Either::Left(indices.iter().map(move |&i| (i, &features[i]))),
            None => Either::Right(features.iter().enumerate()),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox2D {
        BoundingBox2D::from_positions(self.iter().map(|(_, f)| f.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box() {
        let mut bbox = BoundingBox2D::default();
        assert!(bbox.is_empty());
        assert_eq!(bbox.diagonal(), Position::default());

        bbox.enlarge(Position::new(10.0, 500.0));
        assert!(!bbox.is_empty());
        assert_eq!(bbox.diagonal(), Position::default());

        bbox.enlarge(Position::new(2.0, 700.0));
        assert_eq!(bbox.min, Position::new(2.0, 500.0));
        assert_eq!(bbox.max, Position::new(10.0, 700.0));
        assert_eq!(bbox.diagonal(), Position::new(8.0, 200.0));
        assert!(bbox.contains(Position::new(5.0, 600.0)));
        assert!(!bbox.contains(Position::new(11.0, 600.0)));
    }

    #[test]
    fn test_map_slice_subset_keeps_original_indices() {
        let features = vec![
            Feature::new(1.0, 100.0, 10.0),
            Feature::new(2.0, 200.0, 20.0),
            Feature::new(3.0, 300.0, 30.0),
        ];
        let indices = vec![2, 0];
        let slice = MapSlice::subset(&features, &indices);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.iter().map(|(i, _)| i).collect::<Vec<_>>(), vec![2, 0]);
        assert_eq!(slice.bounding_box().min, Position::new(1.0, 100.0));
        assert_eq!(slice.bounding_box().max, Position::new(3.0, 300.0));

        let all = MapSlice::all(&features);
        assert_eq!(all.len(), 3);
        assert!(MapSlice::all(&[]).is_empty());
    }

    #[test]
    fn test_read_feature_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, r#"[{"rt": 1.5, "mz": 400.2, "intensity": 1000.0}]"#).unwrap();
        let map = read_feature_map(&path).unwrap();
        assert_eq!(map, vec![Feature::new(1.5, 400.2, 1000.0)]);
        assert_eq!(map[0].position()[Dim::Mz], 400.2);
    }
}
