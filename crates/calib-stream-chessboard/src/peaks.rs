//! Corner candidates from a response map: threshold, NMS, sub-pixel refinement.

use crate::params::{ChessboardParams, DetectionMode};
use crate::response::ResponseMap;
use nalgebra::{Matrix2, Point2, SMatrix, SVector, Vector2};

/// A response peak that may be a chessboard inner corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub position: Point2<f32>,
    pub strength: f32,
}

/// Threshold actually applied to a response map.
pub fn effective_threshold(resp: &ResponseMap, params: &ChessboardParams) -> Option<f32> {
    let max_r = resp.max()?;
    if max_r <= 0.0 {
        return None;
    }
    let thr = params.threshold_abs.unwrap_or(params.threshold_rel * max_r);
    Some(thr.max(0.0))
}

/// Run thresholding + NMS + refinement and return the surviving candidates,
/// strongest first.
pub fn extract_candidates(resp: &ResponseMap, params: &ChessboardParams) -> Vec<Candidate> {
    let Some(thr) = effective_threshold(resp, params) else {
        return Vec::new();
    };

    let w = resp.width;
    let h = resp.height;
    let nms_r = params.nms_radius as i32;
    let border = params.ring_radius as usize + params.nms_radius as usize + 2;
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let mut out = Vec::new();
    for y in border..(h - border) {
        for x in border..(w - border) {
            let v = resp.at(x, y);
            if v <= 0.0 || v < thr {
                continue;
            }
            if !is_local_max(resp, x, y, nms_r, v) {
                continue;
            }
            if count_positive_neighbors(resp, x, y, nms_r) < params.min_cluster_size {
                continue;
            }
            out.push(Candidate {
                position: refine(resp, x, y, params.mode),
                strength: v,
            });
        }
    }

    out.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    let mut merged = merge_close(out, params.merge_radius_pix);
    merged.truncate(params.max_candidates);
    merged
}

/// Strongest peak above `thr` inside a square window, refined.
///
/// Used to recover corners the grid predicts but the global pass missed.
pub fn strongest_in_window(
    resp: &ResponseMap,
    center: Point2<f32>,
    radius: i32,
    thr: f32,
    mode: DetectionMode,
) -> Option<Candidate> {
    let cx = center.x.round() as i32;
    let cy = center.y.round() as i32;
    let lo = 2;
    let hi_x = resp.width as i32 - 3;
    let hi_y = resp.height as i32 - 3;

    let mut best: Option<(usize, usize, f32)> = None;
    for y in (cy - radius).max(lo)..=(cy + radius).min(hi_y) {
        for x in (cx - radius).max(lo)..=(cx + radius).min(hi_x) {
            let v = resp.at(x as usize, y as usize);
            if v > 0.0 && v >= thr && best.map_or(true, |(_, _, b)| v > b) {
                best = Some((x as usize, y as usize, v));
            }
        }
    }

    best.map(|(x, y, v)| Candidate {
        position: refine(resp, x, y, mode),
        strength: v,
    })
}

fn is_local_max(resp: &ResponseMap, x: usize, y: usize, r: i32, v: f32) -> bool {
    let w = resp.width as i32;
    let h = resp.height as i32;
    let cx = x as i32;
    let cy = y as i32;

    for dy in -r..=r {
        for dx in -r..=r {
            if dx == 0 && dy == 0 {
                continue;
            }
            let xx = cx + dx;
            let yy = cy + dy;
            if xx < 0 || yy < 0 || xx >= w || yy >= h {
                continue;
            }
            let vv = resp.at(xx as usize, yy as usize);
            // Plateaus keep only their first pixel in scan order.
            if vv > v || (vv == v && (yy, xx) < (cy, cx)) {
                return false;
            }
        }
    }
    true
}

fn count_positive_neighbors(resp: &ResponseMap, x: usize, y: usize, r: i32) -> u32 {
    let w = resp.width as i32;
    let h = resp.height as i32;
    let mut count = 0;

    for dy in -r..=r {
        for dx in -r..=r {
            if dx == 0 && dy == 0 {
                continue;
            }
            let xx = x as i32 + dx;
            let yy = y as i32 + dy;
            if xx < 0 || yy < 0 || xx >= w || yy >= h {
                continue;
            }
            if resp.at(xx as usize, yy as usize) > 0.0 {
                count += 1;
            }
        }
    }

    count
}

/// Greedy merge: input must be sorted strongest first.
fn merge_close(sorted: Vec<Candidate>, radius: f32) -> Vec<Candidate> {
    if radius <= 0.0 {
        return sorted;
    }
    let r2 = radius * radius;
    let mut kept: Vec<Candidate> = Vec::with_capacity(sorted.len());
    for c in sorted {
        if kept
            .iter()
            .all(|k| (k.position - c.position).norm_squared() > r2)
        {
            kept.push(c);
        }
    }
    kept
}

fn refine(resp: &ResponseMap, x: usize, y: usize, mode: DetectionMode) -> Point2<f32> {
    match mode {
        DetectionMode::Fast => refine_com_5x5(resp, x, y),
        DetectionMode::Refined => {
            refine_quadratic_5x5(resp, x, y).unwrap_or_else(|| refine_com_5x5(resp, x, y))
        }
    }
}

/// 5x5 centre of mass over the non-negative response around an integer peak.
fn refine_com_5x5(resp: &ResponseMap, x: usize, y: usize) -> Point2<f32> {
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sw = 0.0;

    let w = resp.width as i32;
    let h = resp.height as i32;

    for dy in -2i32..=2 {
        for dx in -2i32..=2 {
            let xx = (x as i32 + dx).clamp(0, w - 1) as usize;
            let yy = (y as i32 + dy).clamp(0, h - 1) as usize;
            let w_px = resp.at(xx, yy).max(0.0);
            sx += xx as f32 * w_px;
            sy += yy as f32 * w_px;
            sw += w_px;
        }
    }

    if sw > 0.0 {
        Point2::new(sx / sw, sy / sw)
    } else {
        Point2::new(x as f32, y as f32)
    }
}

/// Least-squares fit of `a + b·dx + c·dy + d·dx² + e·dx·dy + f·dy²` over the
/// 5x5 patch, then the stationary point of the fitted surface.
///
/// `None` when the surface is not a maximum or the peak leaves the centre
/// pixel's neighbourhood.
fn refine_quadratic_5x5(resp: &ResponseMap, x: usize, y: usize) -> Option<Point2<f32>> {
    let w = resp.width as i32;
    let h = resp.height as i32;

    let mut ata = SMatrix::<f32, 6, 6>::zeros();
    let mut atb = SVector::<f32, 6>::zeros();
    for dy in -2i32..=2 {
        for dx in -2i32..=2 {
            let xx = x as i32 + dx;
            let yy = y as i32 + dy;
            if xx < 0 || yy < 0 || xx >= w || yy >= h {
                return None;
            }
            let (fx, fy) = (dx as f32, dy as f32);
            let row = SVector::<f32, 6>::from([1.0, fx, fy, fx * fx, fx * fy, fy * fy]);
            ata += row * row.transpose();
            atb += row * resp.at(xx as usize, yy as usize);
        }
    }

    let coef = ata.lu().solve(&atb)?;
    let hessian = Matrix2::new(2.0 * coef[3], coef[4], coef[4], 2.0 * coef[5]);
    if hessian[(0, 0)] >= 0.0 || hessian.determinant() <= 0.0 {
        return None;
    }
    let offset = hessian.try_inverse()? * -Vector2::new(coef[1], coef[2]);
    if offset.x.abs() > 1.0 || offset.y.abs() > 1.0 {
        return None;
    }
    Some(Point2::new(x as f32 + offset.x, y as f32 + offset.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn map_from_fn(w: usize, h: usize, f: impl Fn(f32, f32) -> f32) -> ResponseMap {
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(f(x as f32, y as f32));
            }
        }
        ResponseMap {
            width: w,
            height: h,
            data,
        }
    }

    fn bump(cx: f32, cy: f32) -> impl Fn(f32, f32) -> f32 {
        move |x, y| 100.0 - (x - cx).powi(2) - (y - cy).powi(2)
    }

    #[test]
    fn single_peak_is_found_and_refined() {
        let resp = map_from_fn(40, 40, |x, y| bump(20.3, 19.6)(x, y).max(0.0));
        let params = ChessboardParams::default();
        let cands = extract_candidates(&resp, &params);
        assert_eq!(cands.len(), 1);
        assert_abs_diff_eq!(cands[0].position.x, 20.3, epsilon = 0.5);
        assert_abs_diff_eq!(cands[0].position.y, 19.6, epsilon = 0.5);
    }

    #[test]
    fn quadratic_fit_recovers_paraboloid_peak() {
        let resp = map_from_fn(40, 40, bump(20.3, 19.6));
        let p = refine_quadratic_5x5(&resp, 20, 20).unwrap();
        assert_abs_diff_eq!(p.x, 20.3, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y, 19.6, epsilon = 1e-3);
    }

    #[test]
    fn quadratic_fit_rejects_saddle_surface() {
        let resp = map_from_fn(20, 20, |x, y| (x - 10.0).powi(2) - (y - 10.0).powi(2));
        assert!(refine_quadratic_5x5(&resp, 10, 10).is_none());
    }

    #[test]
    fn plateau_yields_one_candidate() {
        let resp = map_from_fn(40, 40, |x, y| {
            if (19.0..=20.0).contains(&x) && (19.0..=20.0).contains(&y) {
                50.0
            } else if (x - 19.5).abs() < 2.0 && (y - 19.5).abs() < 2.0 {
                10.0
            } else {
                0.0
            }
        });
        let cands = extract_candidates(&resp, &ChessboardParams::default());
        assert_eq!(cands.len(), 1);
    }

    #[test]
    fn close_peaks_are_merged() {
        let resp = map_from_fn(60, 60, |x, y| {
            let a = bump(20.0, 20.0)(x, y) * 0.5;
            let b = bump(24.0, 20.0)(x, y) * 0.48;
            a.max(b).max(0.0)
        });
        let mut params = ChessboardParams::default();
        params.nms_radius = 1;
        let cands = extract_candidates(&resp, &params);
        assert_eq!(cands.len(), 1);
    }

    #[test]
    fn empty_map_has_no_candidates() {
        let resp = map_from_fn(30, 30, |_, _| 0.0);
        assert!(extract_candidates(&resp, &ChessboardParams::default()).is_empty());
        assert!(effective_threshold(&resp, &ChessboardParams::default()).is_none());
    }

    #[test]
    fn window_search_respects_threshold() {
        let resp = map_from_fn(40, 40, |x, y| bump(20.0, 20.0)(x, y).max(0.0));
        let hit = strongest_in_window(&resp, Point2::new(21.0, 19.0), 3, 10.0, DetectionMode::Fast);
        assert!(hit.is_some());
        let miss = strongest_in_window(&resp, Point2::new(21.0, 19.0), 3, 1000.0, DetectionMode::Fast);
        assert!(miss.is_none());
    }
}
