//! A kd-tree over an N×D matrix of `f64`, queried by exact Euclidean nearest
//! neighbors. Construction follows a median-of-variances split with a small
//! leaf size; nodes are stored flat in a single arena addressed by `u32`
//! indices rather than boxed, so a build is one allocation pass and a query
//! touches no heap beyond its output vectors.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::DMatrix;

use crate::error::{Error, Result};

/// Points per leaf before the tree stops splitting. 15 matches the FLANN
/// `KDTreeSingleIndexParams` leaf size the source library is built on.
const LEAF_SIZE: usize = 15;

enum KdNode {
    Leaf {
        start: u32,
        end: u32,
    },
    Internal {
        axis: usize,
        split: f64,
        left: u32,
        right: u32,
    },
}

/// An immutable-after-build kd-tree index over an N×D matrix. Each row is one
/// point in D-dimensional space.
pub struct KdTree {
    dim: usize,
    data: DMatrix<f64>,
    /// Permutation of row indices grouped by leaf; leaf nodes reference ranges
    /// into this vector rather than owning their own point lists.
    order: Vec<u32>,
    nodes: Vec<KdNode>,
    root: Option<u32>,
}

/// One entry in a k-NN result: the row index in the original matrix, paired
/// with its squared distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub squared_distance: f64,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending by distance, ties broken by ascending index. A max-heap
        // built on this order naturally evicts the farthest/highest-index
        // candidate first, which is exactly the tie-break the index promises.
        self.squared_distance
            .total_cmp(&other.squared_distance)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for KdTree {
    fn default() -> Self {
        Self::new()
    }
}

impl KdTree {
    /// An index with no data. Any query against it fails with [`Error::NotReady`].
    pub fn new() -> Self {
        Self {
            dim: 0,
            data: DMatrix::zeros(0, 0),
            order: Vec::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Builds an index over `points` (N rows, D columns; row `i` is point `i`).
    pub fn build(points: &DMatrix<f64>) -> Result<Self> {
        let n = points.nrows();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        let dim = points.ncols();

        let mut order: Vec<u32> = (0..n as u32).collect();
        let mut nodes = Vec::new();
        let root = build_recursive(points, &mut order, 0, n, &mut nodes);

        Ok(Self {
            dim,
            data: points.clone(),
            order,
            nodes,
            root: Some(root),
        })
    }

    /// Number of points in the index.
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    fn check_query(&self, query: &[f64]) -> Result<u32> {
        let root = self.root.ok_or(Error::NotReady)?;
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch(format!(
                "query has {} dimensions, index was built over {}",
                query.len(),
                self.dim
            )));
        }
        Ok(root)
    }

    /// The `k` nearest neighbors to `query`, ascending by squared distance
    /// (ties ascending by index). Returns fewer than `k` if the index has
    /// fewer than `k` points.
    pub fn knn(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>> {
        let root = self.check_query(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        self.knn_recurse(root, query, k, &mut heap);
        Ok(heap.into_sorted_vec())
    }

    fn knn_recurse(&self, node_idx: u32, query: &[f64], k: usize, heap: &mut BinaryHeap<Neighbor>) {
        match &self.nodes[node_idx as usize] {
            KdNode::Leaf { start, end } => {
                for &i in &self.order[*start as usize..*end as usize] {
                    let d2 = squared_distance(query, self.data.row(i as usize).iter());
                    push_bounded(heap, Neighbor { index: i as usize, squared_distance: d2 }, k);
                }
            }
            KdNode::Internal { axis, split, left, right } => {
                let diff = query[*axis] - split;
                let (near, far) = if diff <= 0.0 { (*left, *right) } else { (*right, *left) };
                self.knn_recurse(near, query, k, heap);
                if heap.len() < k || diff * diff < heap.peek().unwrap().squared_distance {
                    self.knn_recurse(far, query, k, heap);
                }
            }
        }
    }

    /// All points within squared radius `r2` of `query`, ascending by squared
    /// distance (ties ascending by index).
    pub fn radius(&self, query: &[f64], r2: f64) -> Result<Vec<Neighbor>> {
        let root = self.check_query(query)?;
        let mut out = Vec::new();
        self.radius_recurse(root, query, r2, &mut out);
        out.sort();
        Ok(out)
    }

    fn radius_recurse(&self, node_idx: u32, query: &[f64], r2: f64, out: &mut Vec<Neighbor>) {
        match &self.nodes[node_idx as usize] {
            KdNode::Leaf { start, end } => {
                for &i in &self.order[*start as usize..*end as usize] {
                    let d2 = squared_distance(query, self.data.row(i as usize).iter());
                    if d2 <= r2 {
                        out.push(Neighbor { index: i as usize, squared_distance: d2 });
                    }
                }
            }
            KdNode::Internal { axis, split, left, right } => {
                let diff = query[*axis] - split;
                let (near, far) = if diff <= 0.0 { (*left, *right) } else { (*right, *left) };
                self.radius_recurse(near, query, r2, out);
                if diff * diff <= r2 {
                    self.radius_recurse(far, query, r2, out);
                }
            }
        }
    }

    /// At most `k_max` points within squared radius `r2`, ascending by squared
    /// distance (ties ascending by index). Returns fewer than `k_max` if fewer
    /// points lie within the radius.
    pub fn hybrid(&self, query: &[f64], r2: f64, k_max: usize) -> Result<Vec<Neighbor>> {
        let root = self.check_query(query)?;
        if k_max == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k_max + 1);
        self.hybrid_recurse(root, query, r2, k_max, &mut heap);
        Ok(heap.into_sorted_vec())
    }

    fn hybrid_recurse(
        &self,
        node_idx: u32,
        query: &[f64],
        r2: f64,
        k_max: usize,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        match &self.nodes[node_idx as usize] {
            KdNode::Leaf { start, end } => {
                for &i in &self.order[*start as usize..*end as usize] {
                    let d2 = squared_distance(query, self.data.row(i as usize).iter());
                    if d2 <= r2 {
                        push_bounded(heap, Neighbor { index: i as usize, squared_distance: d2 }, k_max);
                    }
                }
            }
            KdNode::Internal { axis, split, left, right } => {
                let diff = query[*axis] - split;
                let (near, far) = if diff <= 0.0 { (*left, *right) } else { (*right, *left) };
                self.hybrid_recurse(near, query, r2, k_max, heap);
                let plane_d2 = diff * diff;
                if plane_d2 <= r2 && (heap.len() < k_max || plane_d2 < heap.peek().unwrap().squared_distance) {
                    self.hybrid_recurse(far, query, r2, k_max, heap);
                }
            }
        }
    }
}

fn push_bounded(heap: &mut BinaryHeap<Neighbor>, candidate: Neighbor, k: usize) {
    if heap.len() < k {
        heap.push(candidate);
    } else if candidate < *heap.peek().unwrap() {
        heap.pop();
        heap.push(candidate);
    }
}

fn squared_distance<'a>(query: &[f64], point: impl Iterator<Item = &'a f64>) -> f64 {
    query.iter().zip(point).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// Picks the axis of largest variance among `order[lo..hi]` and splits at its
/// median, recursing on both halves. Leaves store a range once `hi - lo`
/// drops to [`LEAF_SIZE`] or below.
fn build_recursive(points: &DMatrix<f64>, order: &mut [u32], lo: usize, hi: usize, nodes: &mut Vec<KdNode>) -> u32 {
    let len = hi - lo;
    if len <= LEAF_SIZE {
        nodes.push(KdNode::Leaf { start: lo as u32, end: hi as u32 });
        return (nodes.len() - 1) as u32;
    }

    let axis = max_variance_axis(points, &order[lo..hi]);
    let mid = lo + len / 2;
    order[lo..hi].select_nth_unstable_by(mid - lo, |&a, &b| {
        points[(a as usize, axis)]
            .partial_cmp(&points[(b as usize, axis)])
            .unwrap()
    });
    let split = points[(order[mid] as usize, axis)];

    // Reserve this node's slot before recursing so children can be linked in
    // by index once their own subtrees are built.
    let node_idx = nodes.len() as u32;
    nodes.push(KdNode::Internal { axis, split, left: 0, right: 0 });
    let left = build_recursive(points, order, lo, mid, nodes);
    let right = build_recursive(points, order, mid, hi, nodes);
    nodes[node_idx as usize] = KdNode::Internal { axis, split, left, right };
    node_idx
}

fn max_variance_axis(points: &DMatrix<f64>, idx: &[u32]) -> usize {
    let dim = points.ncols();
    let n = idx.len() as f64;

    let mut mean = vec![0.0; dim];
    for &i in idx {
        for d in 0..dim {
            mean[d] += points[(i as usize, d)];
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut variance = vec![0.0; dim];
    for &i in idx {
        for d in 0..dim {
            let diff = points[(i as usize, d)] - mean[d];
            variance[d] += diff * diff;
        }
    }

    variance
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .map(|(axis, _)| axis)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_points() -> DMatrix<f64> {
        // 4x4 grid in the plane, z = 0.
        let mut rows = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                rows.push(vec![x as f64, y as f64, 0.0]);
            }
        }
        DMatrix::from_fn(rows.len(), 3, |r, c| rows[r][c])
    }

    #[test]
    fn build_rejects_empty() {
        let empty = DMatrix::<f64>::zeros(0, 3);
        assert!(matches!(KdTree::build(&empty), Err(Error::EmptyInput)));
    }

    #[test]
    fn query_on_unbuilt_index_is_not_ready() {
        let tree = KdTree::new();
        assert!(matches!(tree.knn(&[0.0, 0.0, 0.0], 1), Err(Error::NotReady)));
    }

    #[test]
    fn knn_finds_exact_nearest() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let result = tree.knn(&[1.1, 1.1, 0.0], 1).unwrap();
        assert_eq!(result.len(), 1);
        // (1,1) is row index 1*4 + 1 = 5
        assert_eq!(result[0].index, 5);
    }

    #[test]
    fn knn_is_sorted_ascending() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let result = tree.knn(&[1.5, 1.5, 0.0], 6).unwrap();
        for w in result.windows(2) {
            assert!(w[0].squared_distance <= w[1].squared_distance);
        }
    }

    #[test]
    fn knn_matches_brute_force() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let query = [2.3, 0.7, 0.0];
        let k = 5;
        let result = tree.knn(&query, k).unwrap();

        let mut brute: Vec<Neighbor> = (0..points.nrows())
            .map(|i| Neighbor {
                index: i,
                squared_distance: squared_distance(&query, points.row(i).iter()),
            })
            .collect();
        brute.sort();
        brute.truncate(k);

        assert_eq!(result.len(), brute.len());
        for (a, b) in result.iter().zip(brute.iter()) {
            assert_eq!(a.index, b.index);
            assert_relative_eq!(a.squared_distance, b.squared_distance, epsilon = 1e-12);
        }
    }

    #[test]
    fn radius_excludes_points_outside() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let result = tree.radius(&[0.0, 0.0, 0.0], 1.01).unwrap();
        // within radius^2=1.01 of origin: (0,0), (1,0), (0,1) -> dist2 0, 1, 1
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|n| n.squared_distance <= 1.01));
    }

    #[test]
    fn hybrid_caps_at_k_max_within_radius() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let result = tree.hybrid(&[0.0, 0.0, 0.0], 100.0, 3).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn hybrid_returns_fewer_when_radius_is_tight() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        let result = tree.hybrid(&[0.0, 0.0, 0.0], 0.5, 10).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].index, 0);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let points = grid_points();
        let tree = KdTree::build(&points).unwrap();
        assert!(matches!(
            tree.knn(&[0.0, 0.0], 1),
            Err(Error::DimensionMismatch(_))
        ));
    }
}
