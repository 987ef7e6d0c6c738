use nalgebra::Vector2;
use std::f32::consts::FRAC_PI_2;

/// Dominant grid axis angle from a set of edge vectors.
///
/// Grid edges repeat every quarter turn, so angles are averaged in
/// "quadruple-angle" space (θ ≡ θ + π/2), weighted by the given weights.
/// Returns an angle in `(-π/4, π/4]`, or `None` when there is no dominant
/// direction.
pub fn dominant_axis_angle(edges: impl IntoIterator<Item = (Vector2<f32>, f32)>) -> Option<f32> {
    let mut sum = Vector2::<f32>::zeros();
    let mut weight_sum = 0.0f32;

    for (e, w) in edges {
        if w <= 0.0 || e.norm_squared() <= 0.0 {
            continue;
        }
        let four_theta = 4.0 * e.y.atan2(e.x);
        sum += w * Vector2::new(four_theta.cos(), four_theta.sin());
        weight_sum += w;
    }

    if weight_sum <= 0.0 {
        return None;
    }
    let mean = sum / weight_sum;
    if mean.norm_squared() < 1e-6 {
        return None;
    }
    Some(0.25 * mean.y.atan2(mean.x))
}

/// Rotate `v` by `-angle`.
#[inline]
pub fn rotate_back(v: Vector2<f32>, angle: f32) -> Vector2<f32> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x + s * v.y, -s * v.x + c * v.y)
}

/// Angle between a vector and the nearest of the axes x, y (in `[0, π/4]`).
#[inline]
pub fn axis_deviation(v: Vector2<f32>) -> f32 {
    let a = v.y.atan2(v.x);
    let nearest = (a / FRAC_PI_2).round() * FRAC_PI_2;
    (a - nearest).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn axis_aligned_grid_has_zero_angle() {
        let edges = [
            (Vector2::new(10.0, 0.0), 1.0),
            (Vector2::new(0.0, 10.0), 1.0),
            (Vector2::new(-10.0, 0.0), 1.0),
            (Vector2::new(0.0, -10.0), 1.0),
        ];
        assert_abs_diff_eq!(dominant_axis_angle(edges).unwrap(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn rotated_grid_angle_is_recovered() {
        let theta = 0.3f32;
        let edges = (0..4).map(|k| {
            let a = theta + k as f32 * FRAC_PI_2;
            (Vector2::new(a.cos(), a.sin()), 1.0)
        });
        assert_abs_diff_eq!(dominant_axis_angle(edges).unwrap(), theta, epsilon = 1e-5);
    }

    #[test]
    fn no_edges_no_angle() {
        assert!(dominant_axis_angle(std::iter::empty()).is_none());
    }

    #[test]
    fn deviation_and_rotation() {
        assert_abs_diff_eq!(axis_deviation(Vector2::new(1.0, 1.0)), FRAC_PI_4, epsilon = 1e-6);
        assert_abs_diff_eq!(axis_deviation(Vector2::new(0.0, -3.0)), 0.0, epsilon = 1e-6);
        let v = rotate_back(Vector2::new(0.0, 1.0), FRAC_PI_2);
        assert_abs_diff_eq!(v.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.y, 0.0, epsilon = 1e-6);
    }
}
