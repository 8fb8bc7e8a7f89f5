use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::data::feature::{Dim, Position};

/// `x -> slope * x + intercept`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearMapping {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for LinearMapping {
    fn default() -> Self {
        LinearMapping { slope: 1.0, intercept: 0.0 }
    }
}

impl LinearMapping {
    pub fn new(slope: f64, intercept: f64) -> Self {
        LinearMapping { slope, intercept }
    }

    pub fn apply(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    pub fn is_identity(&self) -> bool {
        self.slope == 1.0 && self.intercept == 0.0
    }
}

/// Independent linear mappings for both axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftTransform {
    pub rt: LinearMapping,
    pub mz: LinearMapping,
}

impl ShiftTransform {
    pub fn identity() -> Self {
        ShiftTransform::default()
    }

    /// Slope 1 on both axes, moving points by `offset`.
    pub fn translation(offset: Position) -> Self {
        ShiftTransform {
            rt: LinearMapping::new(1.0, offset.rt),
            mz: LinearMapping::new(1.0, offset.mz),
        }
    }

    pub fn get(&self, dim: Dim) -> &LinearMapping {
        match dim {
            Dim::Rt => &self.rt,
            Dim::Mz => &self.mz,
        }
    }

    pub fn apply(&self, position: Position) -> Position {
        Position::new(self.rt.apply(position.rt), self.mz.apply(position.mz))
    }

    pub fn is_identity(&self) -> bool {
        self.rt.is_identity() && self.mz.is_identity()
    }
}

impl Display for ShiftTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.rt.slope, self.rt.intercept, self.mz.slope, self.mz.intercept
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation() {
        let t = ShiftTransform::translation(Position::new(-12.0, 0.5));
        assert_eq!(t.apply(Position::new(100.0, 500.0)), Position::new(88.0, 500.5));
        assert_eq!(t.get(Dim::Rt).intercept, -12.0);
        assert!(!t.is_identity());
        assert!(ShiftTransform::identity().is_identity());
        assert_eq!(t.to_string(), "1 -12 1 0.5");
    }
}
