//! Pairwise rigid registration of two 3D point clouds from precomputed
//! per-point feature descriptors, without an initial pose guess.
//!
//! [`register`] is the single entry point: it sequences normalization
//! ([`normalize`]), mutual-nearest-neighbor correspondence search with
//! tuple-consistency pruning ([`correspondence`]) over a descriptor kd-tree
//! ([`kdtree`]), and a GNC-annealed robust Gauss-Newton pose solve
//! ([`solver`]), then composes the result back into the callers' original
//! (un-normalized) coordinate frame.
//!
//! The crate holds no state between calls: every [`register`] invocation
//! owns its inputs' copies and its own correspondence list and solver
//! working set, so concurrent calls from multiple threads never interfere.

pub mod correspondence;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod kdtree;
pub mod normalize;
pub mod options;
pub mod solver;
pub mod types;

use nalgebra::{Isometry3, Matrix4, Translation3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

pub use error::{Error, Result};
pub use options::Options;
pub use types::{FeatureMatrix, PointCloud};

use crate::correspondence::build_correspondences;
use crate::diagnostics::Stopwatch;
use crate::kdtree::KdTree;
use crate::solver::{solve, SolveOutcome, SolverParams};

/// The outcome of a [`register`] call, carried alongside the transform so
/// callers can distinguish a normal solve from the defined fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The solver ran its full iteration schedule.
    Converged,
    /// Fewer than the minimum number of correspondences survived tuple
    /// pruning; `transform` is identity.
    InsufficientCorrespondences,
    /// At least one Gauss-Newton step hit a singular `JtJ`; the solve still
    /// ran to completion using zero-update steps where it failed.
    NumericalFailure,
}

/// Result of a [`register`] call: the transform that aligns `source` to
/// `target`, plus diagnostics.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Transform `T` such that `T * source ≈ target` in a least-squares
    /// sense. Apply this to `source`'s points to align them with `target`.
    pub transform: Matrix4<f64>,
    /// Number of correspondences the solver was given (post tuple-pruning).
    pub correspondence_count: usize,
    /// The annealed kernel scale the solver finished at (diagnostic only;
    /// `-1.0` when [`RegistrationOutcome::InsufficientCorrespondences`]).
    pub final_scale: f64,
    pub outcome: RegistrationOutcome,
}

/// Registers `source` against `target` using precomputed per-point
/// descriptors `source_feat`/`target_feat` (D×N, column `j` is the
/// descriptor of point `j`), without any initial pose guess.
///
/// Neither cloud is mutated; the core works on internal copies.
pub fn register(
    source: &PointCloud,
    target: &PointCloud,
    source_feat: &FeatureMatrix,
    target_feat: &FeatureMatrix,
    opts: &Options,
) -> Result<RegistrationResult> {
    validate(source, target, source_feat, target_feat)?;

    let mut sw = Stopwatch::new();

    let mut cloud_a = source.clone();
    let mut cloud_b = target.clone();
    let norm = sw.time("normalize", || {
        normalize::normalize(&mut cloud_a, &mut cloud_b, opts.use_absolute_scale)
    });

    let (index_a, index_b) = sw.time("build_kdtrees", || -> Result<(KdTree, KdTree)> {
        let index_a = KdTree::build(&source_feat.transpose())?;
        let index_b = KdTree::build(&target_feat.transpose())?;
        Ok((index_a, index_b))
    })?;

    let mut rng = StdRng::seed_from_u64(opts.rng_seed);
    let correspondences = sw.time("correspondences", || {
        build_correspondences(
            &cloud_a,
            source_feat,
            &index_a,
            &cloud_b,
            target_feat,
            &index_b,
            opts.tuple_scale,
            opts.maximum_tuple_count,
            &mut rng,
        )
    });

    let solver_params = SolverParams {
        division_factor: opts.division_factor,
        decrease_mu: opts.decrease_mu,
        maximum_correspondence_distance: opts.maximum_correspondence_distance,
        iteration_number: opts.iteration_number,
    };
    let solved = sw.time("solve", || {
        solve(&cloud_a, &cloud_b, &correspondences, norm.start_scale, &solver_params)
    });

    let outcome = match solved.outcome {
        SolveOutcome::Converged => RegistrationOutcome::Converged,
        SolveOutcome::InsufficientCorrespondences => RegistrationOutcome::InsufficientCorrespondences,
        SolveOutcome::NumericalFailure => RegistrationOutcome::NumericalFailure,
    };

    // De-normalize: the normalized-space transform maps cloud_b (target)
    // onto cloud_a (source). World-space, that's
    //   R = R_n, t = -R_n * centroid_b + global_scale * t_n + centroid_a
    // mapping the original target onto the original source. The public API
    // returns the inverse: applied to `source`, it aligns with `target`.
    let r_n = solved.transform.rotation;
    let t_n = solved.transform.translation.vector;
    let t_world = -(r_n * norm.centroid_b) + norm.global_scale * t_n + norm.centroid_a;
    let world_to_source = Isometry3::from_parts(Translation3::from(t_world), r_n);
    let transform = types::isometry_to_matrix(&world_to_source.inverse());

    info!(
        correspondences = correspondences.len(),
        final_scale = solved.final_scale,
        elapsed_ms = sw.total().as_secs_f64() * 1000.0,
        "registration finished"
    );
    debug!(stages = ?sw.stages(), "registration stage timings");

    Ok(RegistrationResult {
        transform,
        correspondence_count: correspondences.len(),
        final_scale: solved.final_scale,
        outcome,
    })
}

fn validate(
    source: &PointCloud,
    target: &PointCloud,
    source_feat: &FeatureMatrix,
    target_feat: &FeatureMatrix,
) -> Result<()> {
    if source.is_empty() || target.is_empty() || source_feat.ncols() == 0 || target_feat.ncols() == 0 {
        return Err(Error::EmptyInput);
    }
    if source.len() != source_feat.ncols() {
        return Err(Error::DimensionMismatch(format!(
            "source has {} points but {} feature columns",
            source.len(),
            source_feat.ncols()
        )));
    }
    if target.len() != target_feat.ncols() {
        return Err(Error::DimensionMismatch(format!(
            "target has {} points but {} feature columns",
            target.len(),
            target_feat.ncols()
        )));
    }
    if source_feat.nrows() != target_feat.nrows() {
        return Err(Error::DimensionMismatch(format!(
            "descriptor dimension mismatch: source is {}, target is {}",
            source_feat.nrows(),
            target_feat.nrows()
        )));
    }
    Ok(())
}
