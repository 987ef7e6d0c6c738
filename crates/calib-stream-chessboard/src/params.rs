use serde::{Deserialize, Serialize};

/// How hard the detector works on a single buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Centre-of-mass peak refinement and no recovery of missing corners.
    /// Marginal boards are reported as not found.
    #[default]
    Fast,
    /// Quadratic sub-pixel refinement, plus one completion pass that looks
    /// for weak response peaks where the grid predicts a missing corner.
    Refined,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    /// Nearest neighbours inspected per corner.
    pub k_neighbors: usize,
    /// Accepted neighbour distance, relative to the median corner spacing.
    pub min_spacing_ratio: f32,
    pub max_spacing_ratio: f32,
    /// Absolute floor on neighbour distance (pixels).
    pub min_spacing_pix: f32,
    /// Max angle between a neighbour edge and the nearest grid axis.
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            min_spacing_ratio: 0.6,
            max_spacing_ratio: 1.6,
            min_spacing_pix: 4.0,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters specific to the chessboard detector.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// ChESS ring radius: 5 (canonical) or 10 (blurry or large squares).
    pub ring_radius: u32,

    /// Relative threshold as a fraction of the max response.
    pub threshold_rel: f32,

    /// Absolute threshold override; used instead of `threshold_rel` when set.
    pub threshold_abs: Option<f32>,

    /// Non-maximum suppression radius (pixels).
    pub nms_radius: u32,

    /// Minimal count of positive-response neighbours inside the NMS window.
    pub min_cluster_size: u32,

    /// Candidates closer than this are merged into the strongest one.
    pub merge_radius_pix: f32,

    /// Upper bound on candidates fed to grid assembly (strongest kept).
    pub max_candidates: usize,

    pub mode: DetectionMode,

    /// Threshold used by the completion pass in `Refined` mode, as a
    /// fraction of the main threshold.
    pub completion_threshold_ratio: f32,

    pub grid: GridGraphParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            ring_radius: 5,
            threshold_rel: 0.2,
            threshold_abs: None,
            nms_radius: 2,
            min_cluster_size: 2,
            merge_radius_pix: 5.0,
            max_candidates: 1024,
            mode: DetectionMode::Fast,
            completion_threshold_ratio: 0.5,
            grid: GridGraphParams::default(),
        }
    }
}

impl ChessboardParams {
    pub fn with_mode(mut self, mode: DetectionMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let params: ChessboardParams =
            serde_json::from_str(r#"{ "mode": "refined", "grid": { "k_neighbors": 6 } }"#).unwrap();
        assert_eq!(params.mode, DetectionMode::Refined);
        assert_eq!(params.grid.k_neighbors, 6);
        assert_eq!(params.ring_radius, 5);
        assert_eq!(params.grid.orientation_tolerance_deg, 22.5);
    }
}
