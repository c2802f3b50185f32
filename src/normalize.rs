//! Centering and optional rescaling of a pair of point clouds into a shared
//! normalized space (C2 in the component design).

use nalgebra::Vector3;

use crate::types::PointCloud;

/// The effect of [`normalize`] on a pair of clouds: their pre-scaling
/// centroids and the scale factors needed to undo the normalization later.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationResult {
    /// Centroid of `a`, captured before scaling.
    pub centroid_a: Vector3<f64>,
    /// Centroid of `b`, captured before scaling.
    pub centroid_b: Vector3<f64>,
    /// Divisor applied to bring both clouds into normalized space; `1.0` when
    /// `use_absolute_scale` is set.
    pub global_scale: f64,
    /// Initial value for the solver's annealed kernel scale.
    pub start_scale: f64,
}

/// Centers `a` and `b` on their own centroids, then (unless
/// `use_absolute_scale`) divides every point in both clouds by the larger of
/// the two post-centering max radii.
pub fn normalize(a: &mut PointCloud, b: &mut PointCloud, use_absolute_scale: bool) -> NormalizationResult {
    let centroid_a = centroid(a);
    let centroid_b = centroid(b);

    translate(a, &-centroid_a);
    translate(b, &-centroid_b);

    let r = max_radius(a).max(max_radius(b));

    let (global_scale, start_scale) = if use_absolute_scale {
        (1.0, r)
    } else {
        scale(a, r);
        scale(b, r);
        (r, 1.0)
    };

    NormalizationResult { centroid_a, centroid_b, global_scale, start_scale }
}

fn centroid(cloud: &PointCloud) -> Vector3<f64> {
    let n = cloud.len() as f64;
    let sum = cloud
        .points()
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    sum / n
}

fn translate(cloud: &mut PointCloud, delta: &Vector3<f64>) {
    for p in cloud.points_mut() {
        p.coords += delta;
    }
}

fn max_radius(cloud: &PointCloud) -> f64 {
    cloud
        .points()
        .iter()
        .map(|p| p.coords.norm())
        .fold(0.0, f64::max)
}

fn scale(cloud: &mut PointCloud, r: f64) {
    for p in cloud.points_mut() {
        p.coords /= r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn cloud(points: &[[f64; 3]]) -> PointCloud {
        PointCloud::new(points.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect())
    }

    #[test]
    fn centers_both_clouds_on_their_own_centroid() {
        let mut a = cloud(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let mut b = cloud(&[[5.0, 5.0, 5.0], [7.0, 5.0, 5.0]]);
        normalize(&mut a, &mut b, true);

        let mean_a: Vector3<f64> = a.points().iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / a.len() as f64;
        let mean_b: Vector3<f64> = b.points().iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / b.len() as f64;
        assert_relative_eq!(mean_a.norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(mean_b.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn absolute_scale_leaves_points_unscaled() {
        let mut a = cloud(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0]]);
        let mut b = cloud(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let result = normalize(&mut a, &mut b, true);

        assert_relative_eq!(result.global_scale, 1.0);
        assert_relative_eq!(result.start_scale, 1.5);
        assert_relative_eq!(a.points()[1].coords.norm(), 1.5);
    }

    #[test]
    fn relative_scale_normalizes_max_radius_to_one() {
        let mut a = cloud(&[[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]]);
        let mut b = cloud(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let result = normalize(&mut a, &mut b, false);

        assert_relative_eq!(result.start_scale, 1.0);
        assert_relative_eq!(result.global_scale, 2.0);
        assert_relative_eq!(a.points()[1].coords.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(b.points()[1].coords.norm(), 0.25, epsilon = 1e-12);
    }
}
