//! Mutual-nearest-neighbor matching in descriptor space, cross-checking, and
//! geometric tuple-consistency pruning (C3 in the component design).

use rand::Rng;
use tracing::debug;

use crate::kdtree::KdTree;
use crate::types::{FeatureMatrix, PointCloud};

/// One correspondence: `(index into cloud_a, index into cloud_b)`.
pub type Correspondence = (usize, usize);

/// Builds the correspondence list between `cloud_a`/`features_a`/`index_a`
/// and `cloud_b`/`features_b`/`index_b`.
///
/// `index_a` and `index_b` must be kd-trees built over the *transposed*
/// feature matrices (one row per point, so their row count matches the
/// corresponding cloud's length). Tuple pruning samples 3D positions from
/// `cloud_a`/`cloud_b`, so these should be the post-normalization clouds.
#[allow(clippy::too_many_arguments)]
pub fn build_correspondences(
    cloud_a: &PointCloud,
    features_a: &FeatureMatrix,
    index_a: &KdTree,
    cloud_b: &PointCloud,
    features_b: &FeatureMatrix,
    index_b: &KdTree,
    tuple_scale: f64,
    maximum_tuple_count: usize,
    rng: &mut impl Rng,
) -> Vec<Correspondence> {
    // A is the larger cloud; remember if we swapped so the output can be
    // flipped back into the caller's (a, b) orientation.
    let swapped = cloud_b.len() > cloud_a.len();
    let (big_cloud, big_features, big_index, small_cloud, small_features, small_index) = if swapped {
        (cloud_b, features_b, index_b, cloud_a, features_a, index_a)
    } else {
        (cloud_a, features_a, index_a, cloud_b, features_b, index_b)
    };

    let initial = initial_matching(big_features, big_index, small_features, small_index);
    debug!(candidates = initial.0.len() + initial.1.len(), "advanced matching: initial candidates");

    let cross = cross_check(big_cloud.len(), small_cloud.len(), &initial.0, &initial.1);
    debug!(remaining = cross.len(), "advanced matching: cross-check");

    let pruned = tuple_prune(&cross, big_cloud, small_cloud, tuple_scale, maximum_tuple_count, rng);
    debug!(accepted = pruned.len(), "advanced matching: tuple constraint");

    if swapped {
        pruned.into_iter().map(|(i, j)| (j, i)).collect()
    } else {
        pruned
    }
}

/// Returns `(corres_ij, corres_ji)` as described in §4.3.2: for each point in
/// the smaller cloud, its nearest descriptor in the larger cloud (`corres_ji`),
/// plus the first-seen reverse lookup for each distinct larger-cloud index
/// that was hit (`corres_ij`).
fn initial_matching(
    big_features: &FeatureMatrix,
    big_index: &KdTree,
    small_features: &FeatureMatrix,
    small_index: &KdTree,
) -> (Vec<Correspondence>, Vec<Correspondence>) {
    let n_big = big_features.ncols();
    let n_small = small_features.ncols();

    let mut i_to_j: Vec<Option<usize>> = vec![None; n_big];
    let mut corres_ji = Vec::with_capacity(n_small);

    for j in 0..n_small {
        let query: Vec<f64> = small_features.column(j).iter().copied().collect();
        let nearest = big_index.knn(&query, 1).expect("descriptor index ready");
        let i = nearest[0].index;

        if i_to_j[i].is_none() {
            let back_query: Vec<f64> = big_features.column(i).iter().copied().collect();
            let back = small_index.knn(&back_query, 1).expect("descriptor index ready");
            i_to_j[i] = Some(back[0].index);
        }
        corres_ji.push((i, j));
    }

    let corres_ij = i_to_j
        .into_iter()
        .enumerate()
        .filter_map(|(i, j)| j.map(|j| (i, j)))
        .collect();

    (corres_ij, corres_ji)
}

/// Keeps only pairs that appear in both directions (§4.3.3).
fn cross_check(
    n_big: usize,
    n_small: usize,
    corres_ij: &[Correspondence],
    corres_ji: &[Correspondence],
) -> Vec<Correspondence> {
    let mut adj_i: Vec<Vec<usize>> = vec![Vec::new(); n_big];
    for &(i, j) in corres_ij {
        adj_i[i].push(j);
    }
    let mut adj_j: Vec<Vec<usize>> = vec![Vec::new(); n_small];
    for &(i, j) in corres_ji {
        adj_j[j].push(i);
    }

    let mut out = Vec::new();
    for i in 0..n_big {
        for &j in &adj_i[i] {
            for &back_i in &adj_j[j] {
                if back_i == i {
                    out.push((i, j));
                }
            }
        }
    }
    out
}

/// Geometric tuple-consistency pruning (§4.3.4). Samples are not deduplicated
/// across the three draws, matching the source's behavior (see the open
/// question in the design notes).
fn tuple_prune(
    corres: &[Correspondence],
    cloud_a: &PointCloud,
    cloud_b: &PointCloud,
    scale: f64,
    maximum_tuple_count: usize,
    rng: &mut impl Rng,
) -> Vec<Correspondence> {
    let n = corres.len();
    if n == 0 {
        return Vec::new();
    }
    let trials = n * 100;

    let mut out = Vec::new();
    let mut accepted = 0usize;

    for _ in 0..trials {
        if accepted >= maximum_tuple_count {
            break;
        }

        let c0 = corres[rng.gen_range(0..n)];
        let c1 = corres[rng.gen_range(0..n)];
        let c2 = corres[rng.gen_range(0..n)];

        let a0 = cloud_a.points()[c0.0];
        let a1 = cloud_a.points()[c1.0];
        let a2 = cloud_a.points()[c2.0];
        let b0 = cloud_b.points()[c0.1];
        let b1 = cloud_b.points()[c1.1];
        let b2 = cloud_b.points()[c2.1];

        let la = [(a0 - a1).norm(), (a1 - a2).norm(), (a2 - a0).norm()];
        let lb = [(b0 - b1).norm(), (b1 - b2).norm(), (b2 - b0).norm()];

        let consistent = (0..3).all(|e| scale * la[e] < lb[e] && lb[e] < la[e] / scale);
        if consistent {
            out.push(c0);
            out.push(c1);
            out.push(c2);
            accepted += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, Point3};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity_features(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    fn lattice_cloud(n: usize) -> PointCloud {
        PointCloud::new((0..n).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect())
    }

    #[test]
    fn exact_match_survives_cross_check_and_tuples() {
        let n = 20;
        let cloud_a = lattice_cloud(n);
        let cloud_b = lattice_cloud(n);
        let feats = identity_features(n);

        let index_a = KdTree::build(&feats.transpose()).unwrap();
        let index_b = KdTree::build(&feats.transpose()).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let corres = build_correspondences(
            &cloud_a, &feats, &index_a, &cloud_b, &feats, &index_b, 0.95, 1000, &mut rng,
        );

        assert!(!corres.is_empty());
        for (i, j) in &corres {
            assert_eq!(i, j);
        }
    }

    #[test]
    fn tuple_cap_is_honored() {
        let n = 20;
        let cloud_a = lattice_cloud(n);
        let cloud_b = lattice_cloud(n);
        let feats = identity_features(n);

        let index_a = KdTree::build(&feats.transpose()).unwrap();
        let index_b = KdTree::build(&feats.transpose()).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let corres = build_correspondences(
            &cloud_a, &feats, &index_a, &cloud_b, &feats, &index_b, 0.95, 3, &mut rng,
        );

        assert!(corres.len() <= 3 * 3);
    }

    #[test]
    fn smaller_cloud_on_either_side_gives_symmetric_results() {
        let feats_a = identity_features(10);
        let feats_b = DMatrix::from_fn(10, 6, |r, c| if r == c { 1.0 } else { 0.0 });
        let cloud_a = lattice_cloud(10);
        let cloud_b = lattice_cloud(6);

        let index_a = KdTree::build(&feats_a.transpose()).unwrap();
        let index_b = KdTree::build(&feats_b.transpose()).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let corres = build_correspondences(
            &cloud_a, &feats_a, &index_a, &cloud_b, &feats_b, &index_b, 0.95, 1000, &mut rng,
        );

        for (i, j) in &corres {
            assert!(*i < 10);
            assert!(*j < 6);
        }
    }
}
