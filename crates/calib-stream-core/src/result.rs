use crate::spec::PatternSpec;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Outcome of one pattern search on one buffer.
///
/// Invariant: `found == false` implies `corners` is empty; `found == true`
/// implies `corners.len() == columns * rows` of the searched pattern, ordered
/// row-major.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    pub corners: Vec<Point2<f32>>,
}

impl DetectionResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(corners: Vec<Point2<f32>>) -> Self {
        Self {
            found: true,
            corners,
        }
    }

    /// Check the found/corner-count invariant against a pattern.
    pub fn is_consistent_with(&self, pattern: &PatternSpec) -> bool {
        if self.found {
            pattern.is_valid() && self.corners.len() == pattern.corner_count()
        } else {
            self.corners.is_empty()
        }
    }

    /// Iterate the corners grouped into pattern rows.
    pub fn rows<'a>(&'a self, pattern: &PatternSpec) -> impl Iterator<Item = &'a [Point2<f32>]> {
        let step = pattern.columns.max(1) as usize;
        self.corners.chunks(step)
    }
}
