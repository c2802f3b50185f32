//! GNC-annealed reweighted Gauss-Newton solver over SE(3) (C4 in the
//! component design).

use nalgebra::{Isometry3, Matrix6, Point3, Rotation3, Translation3, Vector3, Vector6};
use tracing::debug;

use crate::correspondence::Correspondence;
use crate::types::PointCloud;

/// Minimum number of correspondences the solver requires before attempting a
/// solve; below this the result carries [`SolveOutcome::InsufficientCorrespondences`].
pub const MIN_CORRESPONDENCES: usize = 10;

/// How the solve concluded, beyond the transform itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Ran the full iteration schedule normally.
    Converged,
    /// Fewer than [`MIN_CORRESPONDENCES`] correspondences were supplied; the
    /// returned transform is identity and `final_scale` is `-1.0`.
    InsufficientCorrespondences,
    /// At least one inner Gauss-Newton step hit a singular `JtJ` and
    /// contributed no update. The solve otherwise ran to completion.
    NumericalFailure,
}

/// The result of [`solve`]: a normalized-space rigid transform plus
/// diagnostics about the annealed kernel scale it converged to.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub transform: Isometry3<f64>,
    pub final_scale: f64,
    pub outcome: SolveOutcome,
}

/// Parameters the GNC schedule needs from [`crate::options::Options`].
#[derive(Debug, Clone, Copy)]
pub struct SolverParams {
    pub division_factor: f64,
    pub decrease_mu: bool,
    pub maximum_correspondence_distance: f64,
    pub iteration_number: usize,
}

/// Solves for the rigid transform taking `cloud_b` onto `cloud_a` in the
/// (already normalized) space they live in, using `correspondences` as
/// `(a_index, b_index)` pairs and `start_scale` as the initial Geman-McClure
/// kernel scale.
pub fn solve(
    cloud_a: &PointCloud,
    cloud_b: &PointCloud,
    correspondences: &[Correspondence],
    start_scale: f64,
    params: &SolverParams,
) -> SolveResult {
    if correspondences.len() < MIN_CORRESPONDENCES {
        debug!(count = correspondences.len(), "pairwise solve: insufficient correspondences");
        return SolveResult {
            transform: Isometry3::identity(),
            final_scale: -1.0,
            outcome: SolveOutcome::InsufficientCorrespondences,
        };
    }

    let mut working: Vec<Point3<f64>> = correspondences
        .iter()
        .map(|&(_, j)| cloud_b.points()[j])
        .collect();
    let a_points: Vec<Point3<f64>> = correspondences
        .iter()
        .map(|&(i, _)| cloud_a.points()[i])
        .collect();

    let mut mu = start_scale;
    let mut trans = Isometry3::identity();
    let mut numerical_failure = false;

    for iter in 0..params.iteration_number {
        if params.decrease_mu && iter % 4 == 0 && mu > params.maximum_correspondence_distance {
            mu /= params.division_factor;
        }

        let (jtj, jtr) = accumulate_normal_equations(&a_points, &working, mu);

        let delta = match jtj.cholesky() {
            Some(chol) => chol.solve(&(-jtr)),
            None => {
                numerical_failure = true;
                Vector6::zeros()
            }
        };

        let omega = Vector3::new(delta[0], delta[1], delta[2]);
        let tau = Vector3::new(delta[3], delta[4], delta[5]);
        let step = small_angle_isometry(omega, tau);

        trans = step * trans;
        for p in working.iter_mut() {
            *p = step * *p;
        }
    }

    debug!(final_scale = mu, iterations = params.iteration_number, "pairwise solve: done");

    SolveResult {
        transform: trans,
        final_scale: mu,
        outcome: if numerical_failure {
            SolveOutcome::NumericalFailure
        } else {
            SolveOutcome::Converged
        },
    }
}

/// One Gauss-Newton accumulation pass: builds `JtJ` and `Jtr` over all
/// correspondences using the current working positions `b` and kernel scale
/// `mu`, with the Geman-McClure IRLS weight applied per scalar row.
fn accumulate_normal_equations(a: &[Point3<f64>], b: &[Point3<f64>], mu: f64) -> (Matrix6<f64>, Vector6<f64>) {
    let mut jtj = Matrix6::zeros();
    let mut jtr = Vector6::zeros();

    for (p, q) in a.iter().zip(b.iter()) {
        let r = p - q;
        let weight = gm_weight(r.norm_squared(), mu);

        let rows = [
            (Vector6::new(0.0, -q.z, q.y, -1.0, 0.0, 0.0), r.x),
            (Vector6::new(q.z, 0.0, -q.x, 0.0, -1.0, 0.0), r.y),
            (Vector6::new(-q.y, q.x, 0.0, 0.0, 0.0, -1.0), r.z),
        ];

        for (row, residual) in rows {
            jtj += weight * row * row.transpose();
            jtr += weight * row * residual;
        }
    }

    (jtj, jtr)
}

/// Geman-McClure IRLS weight `(mu / (r2 + mu))^2`.
fn gm_weight(r2: f64, mu: f64) -> f64 {
    let w = mu / (r2 + mu);
    w * w
}

/// Builds the small-angle delta transform from the Gauss-Newton step: the
/// rotation is the exact `Rz(wz) * Ry(wy) * Rx(wx)` Euler composition (not a
/// first-order approximation), matching the source.
fn small_angle_isometry(omega: Vector3<f64>, tau: Vector3<f64>) -> Isometry3<f64> {
    let r = Rotation3::from_axis_angle(&Vector3::z_axis(), omega.z)
        * Rotation3::from_axis_angle(&Vector3::y_axis(), omega.y)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), omega.x);
    Isometry3::from_parts(Translation3::from(tau), nalgebra::UnitQuaternion::from_rotation_matrix(&r))
}
