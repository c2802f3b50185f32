//! Core data types: point clouds, feature matrices and rigid transforms.

use nalgebra::{DMatrix, Isometry3, Matrix4, Point3};

/// An ordered sequence of 3D points. Index `i` is "point `i`" throughout the crate;
/// correspondences refer to points by this index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f64>>,
}

impl PointCloud {
    /// Builds a cloud from an owned vector of points.
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Number of points in the cloud.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the cloud has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Borrow the points as a slice.
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Mutable access to the points, used by normalization to recenter/rescale in place.
    pub fn points_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.points
    }
}

impl FromIterator<Point3<f64>> for PointCloud {
    fn from_iter<T: IntoIterator<Item = Point3<f64>>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A dense D×N matrix of per-point descriptors. Column `j` is the descriptor of
/// point `j`; the crate never interprets the contents beyond computing Euclidean
/// distances between columns.
pub type FeatureMatrix = DMatrix<f64>;

/// A rigid 4×4 homogeneous transform, i.e. a member of SE(3).
///
/// Exposed as a plain [`Matrix4`] at the API boundary (matching the source's
/// `Eigen::Matrix4d`), backed internally by [`Isometry3`] where composition and
/// inversion are needed.
pub fn isometry_to_matrix(iso: &Isometry3<f64>) -> Matrix4<f64> {
    iso.to_homogeneous()
}
