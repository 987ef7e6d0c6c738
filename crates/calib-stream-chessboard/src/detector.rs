use crate::draw::draw_chessboard_corners;
use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::{ChessboardParams, DetectionMode};
use crate::peaks::{effective_threshold, extract_candidates, strongest_in_window, Candidate};
use crate::response::{chess_response, ResponseMap};
use calib_stream_core::{DetectionResult, PatternSpec, PixelBuffer};
use image::GrayImage;
use log::debug;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by pattern detectors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("invalid pattern {columns}x{rows}: both dimensions must be at least 1")]
    InvalidPattern { columns: i32, rows: i32 },
}

/// Locates a planar calibration pattern in a pixel buffer.
pub trait PatternDetector: Send {
    /// Search `buffer` for `pattern`. Never mutates the buffer; a board that
    /// is not there is `Ok(DetectionResult::not_found())`.
    fn detect(
        &self,
        buffer: &PixelBuffer,
        pattern: PatternSpec,
    ) -> Result<DetectionResult, DetectError>;

    /// Copy of `buffer` with the detection drawn on it.
    fn annotate(
        &self,
        buffer: &PixelBuffer,
        pattern: PatternSpec,
        result: &DetectionResult,
    ) -> PixelBuffer {
        draw_chessboard_corners(buffer, pattern, result)
    }
}

impl<D: PatternDetector + ?Sized> PatternDetector for Box<D> {
    fn detect(
        &self,
        buffer: &PixelBuffer,
        pattern: PatternSpec,
    ) -> Result<DetectionResult, DetectError> {
        (**self).detect(buffer, pattern)
    }

    fn annotate(
        &self,
        buffer: &PixelBuffer,
        pattern: PatternSpec,
        result: &DetectionResult,
    ) -> PixelBuffer {
        (**self).annotate(buffer, pattern, result)
    }
}

/// Why a detection attempt ended without a board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// No positive response anywhere.
    NoResponse,
    /// Fewer candidates than the pattern needs.
    TooFewCandidates,
    /// Could not estimate spacing or grid axes.
    NoGrid,
    /// No connected component matched the pattern dimensions.
    NoMatchingComponent,
}

/// Intermediate values of one detection, for tuning and tests.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDebug {
    pub response_max: Option<f32>,
    pub threshold: Option<f32>,
    pub candidates: Vec<Candidate>,
    pub spacing: Option<f32>,
    pub axis_angle: Option<f32>,
    /// Sizes of the grid-graph components, largest first.
    pub component_sizes: Vec<usize>,
    /// Corners filled in by the completion pass.
    pub completed: usize,
    pub rejected: Option<RejectReason>,
}

/// Chessboard inner-corner detector on ChESS responses.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }

    /// Full detection on a grayscale image, returning debug information.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(width = img.width(), height = img.height()))
    )]
    pub fn detect_with_debug(
        &self,
        img: &GrayImage,
        pattern: PatternSpec,
    ) -> Result<(DetectionResult, ChessboardDebug), DetectError> {
        if !pattern.is_valid() {
            return Err(DetectError::InvalidPattern {
                columns: pattern.columns,
                rows: pattern.rows,
            });
        }

        let mut report = ChessboardDebug::default();
        let resp = chess_response(img, self.params.ring_radius);
        report.response_max = resp.max();
        report.threshold = effective_threshold(&resp, &self.params);
        let Some(threshold) = report.threshold else {
            report.rejected = Some(RejectReason::NoResponse);
            return Ok((DetectionResult::not_found(), report));
        };

        let candidates = extract_candidates(&resp, &self.params);
        debug!(
            "{} corner candidates (threshold {:.1}) for pattern {}",
            candidates.len(),
            threshold,
            pattern
        );

        let needed = pattern.corner_count();
        let min_required = match self.params.mode {
            DetectionMode::Fast => needed,
            DetectionMode::Refined => needed.div_ceil(2),
        };
        if candidates.len() < min_required {
            report.candidates = candidates;
            report.rejected = Some(RejectReason::TooFewCandidates);
            return Ok((DetectionResult::not_found(), report));
        }

        if needed == 1 {
            let corner = candidates[0].position;
            report.candidates = candidates;
            return Ok((DetectionResult::found(vec![corner]), report));
        }

        let points: Vec<Point2<f32>> = candidates.iter().map(|c| c.position).collect();
        report.candidates = candidates;

        let Some(graph) = GridGraph::new(&points, &self.params.grid) else {
            report.rejected = Some(RejectReason::NoGrid);
            return Ok((DetectionResult::not_found(), report));
        };
        report.spacing = Some(graph.spacing);
        report.axis_angle = Some(graph.axis_angle);

        let mut components = connected_components(&graph);
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));
        report.component_sizes = components.iter().map(Vec::len).collect();

        for component in components.iter().filter(|c| c.len() >= min_required) {
            let Some(coords) = assign_grid_coordinates(&graph, component) else {
                continue;
            };
            let Some(mut cells) = fit_pattern(&coords, &points, pattern) else {
                continue;
            };

            let missing = cells.iter().filter(|c| c.is_none()).count();
            if missing > 0 {
                if self.params.mode != DetectionMode::Refined {
                    continue;
                }
                let filled = self.complete_cells(&mut cells, pattern, &resp, threshold, graph.spacing);
                if filled < missing {
                    continue;
                }
                report.completed = filled;
            }

            let corners: Vec<Point2<f32>> = cells.into_iter().flatten().collect();
            let corners = canonical_order(corners, pattern);
            debug!("chessboard {} found", pattern);
            return Ok((DetectionResult::found(corners), report));
        }

        report.rejected = Some(RejectReason::NoMatchingComponent);
        Ok((DetectionResult::not_found(), report))
    }

    /// Fill missing cells from weaker response peaks at the positions the
    /// known neighbours predict. Returns the number of cells filled.
    fn complete_cells(
        &self,
        cells: &mut [Option<Point2<f32>>],
        pattern: PatternSpec,
        resp: &ResponseMap,
        threshold: f32,
        spacing: f32,
    ) -> usize {
        let cols = pattern.columns as usize;
        let rows = pattern.rows as usize;
        let radius = ((spacing * 0.25).round() as i32).max(2);
        let weak_threshold = threshold * self.params.completion_threshold_ratio;
        let min_sep2 = (0.5 * spacing).powi(2);
        let mut filled = 0;

        for r in 0..rows {
            for c in 0..cols {
                if cells[r * cols + c].is_some() {
                    continue;
                }
                let Some(predicted) = predict_cell(cells, cols, rows, r, c) else {
                    continue;
                };
                let Some(hit) =
                    strongest_in_window(resp, predicted, radius, weak_threshold, self.params.mode)
                else {
                    continue;
                };
                let taken = cells
                    .iter()
                    .flatten()
                    .any(|p| (p - hit.position).norm_squared() < min_sep2);
                if !taken {
                    cells[r * cols + c] = Some(hit.position);
                    filled += 1;
                }
            }
        }

        filled
    }
}

impl PatternDetector for ChessboardDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, buffer), fields(width = buffer.width(), height = buffer.height()))
    )]
    fn detect(
        &self,
        buffer: &PixelBuffer,
        pattern: PatternSpec,
    ) -> Result<DetectionResult, DetectError> {
        let gray = buffer.to_gray();
        self.detect_with_debug(&gray, pattern).map(|(result, _)| result)
    }
}

/// Map BFS coordinates onto a `columns x rows` pattern (or its transpose).
///
/// Returns row-major cells; `None` when the bounding box does not match.
fn fit_pattern(
    coords: &[(usize, i32, i32)],
    points: &[Point2<f32>],
    pattern: PatternSpec,
) -> Option<Vec<Option<Point2<f32>>>> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_j = coords.iter().map(|c| c.2).max()?;
    let width = max_i - min_i + 1;
    let height = max_j - min_j + 1;

    let transposed = if (width, height) == (pattern.columns, pattern.rows) {
        false
    } else if (height, width) == (pattern.columns, pattern.rows) {
        true
    } else {
        return None;
    };

    let cols = pattern.columns as usize;
    let mut cells = vec![None; pattern.corner_count()];
    for &(node, i, j) in coords {
        let (c, r) = if transposed {
            (j - min_j, i - min_i)
        } else {
            (i - min_i, j - min_j)
        };
        cells[r as usize * cols + c as usize] = Some(points[node]);
    }
    Some(cells)
}

/// Linear prediction of a cell from known cells along its row and column.
fn predict_cell(
    cells: &[Option<Point2<f32>>],
    cols: usize,
    rows: usize,
    r: usize,
    c: usize,
) -> Option<Point2<f32>> {
    let at = |rr: i64, cc: i64| -> Option<Point2<f32>> {
        if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
            return None;
        }
        cells[rr as usize * cols + cc as usize]
    };
    let (r, c) = (r as i64, c as i64);

    let mut sum = nalgebra::Vector2::<f32>::zeros();
    let mut n = 0.0f32;
    for (dr, dc) in [(0, 1), (1, 0)] {
        let before = at(r - dr, c - dc);
        let after = at(r + dr, c + dc);
        let estimate = match (before, after) {
            (Some(a), Some(b)) => Some(nalgebra::center(&a, &b)),
            (Some(a), None) => at(r - 2 * dr, c - 2 * dc).map(|aa| a + (a - aa)),
            (None, Some(b)) => at(r + 2 * dr, c + 2 * dc).map(|bb| b + (b - bb)),
            (None, None) => None,
        };
        if let Some(p) = estimate {
            sum += p.coords;
            n += 1.0;
        }
    }

    (n > 0.0).then(|| Point2::from(sum / n))
}

/// Row-major order with the first row on top and each row left to right.
fn canonical_order(mut corners: Vec<Point2<f32>>, pattern: PatternSpec) -> Vec<Point2<f32>> {
    let cols = pattern.columns as usize;
    let rows = pattern.rows as usize;

    let row_dx: f32 = (0..rows)
        .map(|r| corners[r * cols + cols - 1].x - corners[r * cols].x)
        .sum();
    if row_dx < 0.0 {
        for row in corners.chunks_mut(cols) {
            row.reverse();
        }
    }

    let col_dy: f32 = (0..cols)
        .map(|c| corners[(rows - 1) * cols + c].y - corners[c].y)
        .sum();
    if col_dy < 0.0 {
        corners = corners
            .chunks(cols)
            .rev()
            .flat_map(|row| row.iter().copied())
            .collect();
    }

    corners
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(cols: usize, rows: usize) -> Vec<Point2<f32>> {
        let mut v = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                v.push(Point2::new(10.0 * c as f32, 10.0 * r as f32));
            }
        }
        v
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let img = GrayImage::new(16, 16);
        let det = ChessboardDetector::default();
        let err = det.detect(&PixelBuffer::Gray(img), PatternSpec::new(0, 5)).unwrap_err();
        assert_eq!(err, DetectError::InvalidPattern { columns: 0, rows: 5 });
    }

    #[test]
    fn blank_image_is_not_found() {
        let img = GrayImage::new(64, 48);
        let (res, dbg) = ChessboardDetector::default()
            .detect_with_debug(&img, PatternSpec::new(4, 5))
            .unwrap();
        assert!(!res.found);
        assert!(res.corners.is_empty());
        assert_eq!(dbg.rejected, Some(RejectReason::NoResponse));
    }

    #[test]
    fn canonical_order_flips_mirrored_rows() {
        let mut flipped = lattice(3, 2);
        flipped.reverse();
        let out = canonical_order(flipped, PatternSpec::new(3, 2));
        assert_eq!(out, lattice(3, 2));
    }

    #[test]
    fn fit_pattern_accepts_transposed_box() {
        let points = lattice(2, 3);
        let coords: Vec<_> = (0..6).map(|n| (n, (n / 2) as i32, (n % 2) as i32)).collect();
        let cells = fit_pattern(&coords, &points, PatternSpec::new(2, 3)).unwrap();
        assert!(cells.iter().all(Option::is_some));
        assert!(fit_pattern(&coords, &points, PatternSpec::new(4, 2)).is_none());
    }

    #[test]
    fn predicts_interior_and_edge_cells() {
        let mut cells: Vec<_> = lattice(3, 3).into_iter().map(Some).collect();
        cells[4] = None;
        let p = predict_cell(&cells, 3, 3, 1, 1).unwrap();
        assert!((p - Point2::new(10.0, 10.0)).norm() < 1e-4);

        cells[4] = Some(Point2::new(10.0, 10.0));
        cells[2] = None;
        let p = predict_cell(&cells, 3, 3, 0, 2).unwrap();
        assert!((p - Point2::new(20.0, 0.0)).norm() < 1e-4);
    }
}
