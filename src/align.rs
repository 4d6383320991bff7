//! Alignment point store and the sky-to-mount rotation solver.
//!
//! Two recorded points give an exact rotation through an orthonormal
//! triad construction; three or more solve Wahba's problem through the
//! SVD of the cross-covariance. Points that do not fit are excluded on
//! the way in and pruned afterwards, and the final matrix must pass a
//! residual gate before anyone is allowed to track with it.

use crate::astro;
use crate::error::MountError;
use crate::mat3::{self, Mat3, Vec3};
use crate::types::{AlignmentPoint, AlignmentQuality};
use crate::Result;
use chrono::{DateTime, Utc};

/// Residual ceiling (degrees) under which a candidate point is accepted
/// regardless of how it compares to the running average: 10 arcminutes.
const ABSOLUTE_ACCEPT_DEG: f64 = 0.167;
/// A candidate may not inflate the average residual by more than this.
const RELATIVE_ACCEPT_FACTOR: f64 = 1.5;
/// Pruning kicks in when the worst point is this many times the best.
const PRUNE_SPREAD_FACTOR: f64 = 5.0;

/// Hard reject gate.
const REJECT_AVG_DEG: f64 = 0.5;
const REJECT_PAIR_DEG: f64 = 0.7;
/// Marginal gate.
const MARGINAL_AVG_DEG: f64 = 0.25;
const MARGINAL_PAIR_DEG: f64 = 0.3;
/// Below this average residual the fit counts as excellent.
const EXCELLENT_AVG_DEG: f64 = 0.10;

/// Pairwise separations shorter than this are too noisy for the
/// step-loss percentage to mean anything.
const MIN_PAIR_SEP_DEG: f64 = 0.5;

/// Ordered, append-only store of alignment observations.
#[derive(Debug, Default, Clone)]
pub struct AlignmentSet {
    points: Vec<AlignmentPoint>,
}

impl AlignmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: AlignmentPoint) {
        self.points.push(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[AlignmentPoint] {
        &self.points
    }
}

/// A solved and gate-approved sky-to-mount rotation.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Row-major rotation taking sky unit vectors to mount unit vectors,
    /// both expressed in the rotating frame anchored at `reference`.
    pub matrix: Mat3,
    pub quality: AlignmentQuality,
    /// Mean angular residual over the points the solution kept.
    pub avg_residual_deg: f64,
    /// Worst disagreement between sky and mount pairwise separations.
    pub max_pair_delta_deg: f64,
    /// Worst relative step loss over well-separated pairs, percent.
    pub max_step_loss_pct: f64,
    /// Indices (into the input slice) of points the solution kept.
    pub used: Vec<usize>,
    /// Indices excluded as outliers.
    pub excluded: Vec<usize>,
    /// Epoch the sky vectors were reframed to.
    pub reference: DateTime<Utc>,
}

impl Alignment {
    /// Wire form of the matrix: row-major single precision. The solver
    /// itself never leaves double precision.
    pub fn matrix_f32(&self) -> [f32; 9] {
        let m = &self.matrix;
        [
            m[0][0] as f32,
            m[0][1] as f32,
            m[0][2] as f32,
            m[1][0] as f32,
            m[1][1] as f32,
            m[1][2] as f32,
            m[2][0] as f32,
            m[2][1] as f32,
            m[2][2] as f32,
        ]
    }
}

/// Solve for the rotation mapping sky to mount at the given reference
/// instant.
///
/// The first two points seed the solution; each later point is admitted
/// only if the refit stays tight, then the kept set is pruned of
/// stragglers. Fails when fewer than two points exist, when the seed
/// pair is degenerate, or when the final fit does not pass the gate.
pub fn solve(points: &[AlignmentPoint], reference: DateTime<Utc>) -> Result<Alignment> {
    if points.len() < 2 {
        return Err(MountError::AlignmentRejected(format!(
            "need at least two alignment points, have {}",
            points.len()
        )));
    }

    let sky: Vec<Vec3> = points
        .iter()
        .map(|p| astro::sky_vector(p.ra_hours as f64, p.dec_degrees as f64, reference, p.captured_at))
        .collect();
    let mount: Vec<Vec3> = points
        .iter()
        .map(|p| astro::mount_vector(p.mount_x, p.mount_y, p.mount_z))
        .collect();

    let mut active: Vec<usize> = vec![0, 1];
    let mut excluded: Vec<usize> = Vec::new();
    let mut matrix = two_star(sky[0], sky[1], mount[0], mount[1])?;
    let mut avg = avg_residual_deg(&matrix, &active, &sky, &mount);

    // Quality-gated inclusion of the remaining points.
    for k in 2..points.len() {
        let mut candidate = active.clone();
        candidate.push(k);
        let refit = wahba(&candidate, &sky, &mount);
        let refit_avg = avg_residual_deg(&refit, &candidate, &sky, &mount);

        if refit_avg <= RELATIVE_ACCEPT_FACTOR * avg || refit_avg < ABSOLUTE_ACCEPT_DEG {
            active = candidate;
            matrix = refit;
            avg = refit_avg;
        } else {
            log::warn!(
                "excluding alignment point {}: refit residual {:.4}° (was {:.4}°)",
                k,
                refit_avg,
                avg
            );
            excluded.push(k);
        }
    }

    // Prune stragglers the inclusion pass let through.
    while active.len() >= 3 {
        let residuals: Vec<f64> = active
            .iter()
            .map(|&i| residual_deg(&matrix, sky[i], mount[i]))
            .collect();
        let mut worst_pos = 0;
        let mut worst = residuals[0];
        let mut best = residuals[0];
        for (i, &r) in residuals.iter().enumerate() {
            if r > worst {
                worst = r;
                worst_pos = i;
            }
            best = best.min(r);
        }

        if worst <= PRUNE_SPREAD_FACTOR * best || worst <= ABSOLUTE_ACCEPT_DEG {
            break;
        }

        let removed = active.remove(worst_pos);
        log::warn!(
            "pruning alignment point {}: residual {:.4}° against best {:.4}°",
            removed,
            worst,
            best
        );
        excluded.push(removed);

        matrix = if active.len() >= 3 {
            wahba(&active, &sky, &mount)
        } else {
            two_star(
                sky[active[0]],
                sky[active[1]],
                mount[active[0]],
                mount[active[1]],
            )?
        };
        avg = avg_residual_deg(&matrix, &active, &sky, &mount);
    }

    // Pairwise separation diagnostics over the kept set.
    let mut max_pair_delta = 0.0f64;
    let mut max_step_loss = 0.0f64;
    for (a, &i) in active.iter().enumerate() {
        for &j in active.iter().skip(a + 1) {
            let sky_sep = mat3::angle_deg(sky[i], sky[j]);
            let mount_sep = mat3::angle_deg(mount[i], mount[j]);
            let delta = (sky_sep - mount_sep).abs();
            max_pair_delta = max_pair_delta.max(delta);
            if sky_sep > MIN_PAIR_SEP_DEG {
                let loss_pct = (1.0 - mount_sep / sky_sep) * 100.0;
                max_step_loss = max_step_loss.max(loss_pct.abs());
            }
        }
    }

    if avg > REJECT_AVG_DEG || max_pair_delta > REJECT_PAIR_DEG {
        return Err(MountError::AlignmentRejected(format!(
            "residuals too large: avg {:.3}°, worst pair delta {:.3}°",
            avg, max_pair_delta
        )));
    }

    let quality = if avg > MARGINAL_AVG_DEG || max_pair_delta > MARGINAL_PAIR_DEG {
        AlignmentQuality::Marginal
    } else if avg > EXCELLENT_AVG_DEG {
        AlignmentQuality::Ok
    } else {
        AlignmentQuality::Excellent
    };

    log::info!(
        "alignment solved: {} of {} points, avg residual {:.4}°, pair delta {:.4}°, {:?}",
        active.len(),
        points.len(),
        avg,
        max_pair_delta,
        quality
    );

    Ok(Alignment {
        matrix,
        quality,
        avg_residual_deg: avg,
        max_pair_delta_deg: max_pair_delta,
        max_step_loss_pct: max_step_loss,
        used: active,
        excluded,
        reference,
    })
}

/// Exact rotation from two non-collinear direction pairs.
///
/// Builds matching orthonormal triads in each frame and composes them:
/// `R = M * S^T` maps the sky triad onto the mount triad.
fn two_star(s1: Vec3, s2: Vec3, m1: Vec3, m2: Vec3) -> Result<Mat3> {
    let s = triad(s1, s2).ok_or_else(|| {
        MountError::AlignmentRejected("seed sky directions are collinear".into())
    })?;
    let m = triad(m1, m2).ok_or_else(|| {
        MountError::AlignmentRejected("seed mount directions are collinear".into())
    })?;
    Ok(mat3::mul(&m, &mat3::transpose(&s)))
}

fn triad(v1: Vec3, v2: Vec3) -> Option<Mat3> {
    let b1 = mat3::normalize(v1)?;
    let b2 = mat3::normalize(mat3::cross(v1, v2))?;
    let b3 = mat3::cross(b1, b2);
    Some(mat3::from_columns(b1, b2, b3))
}

/// Wahba's problem for the indexed point subset: the proper rotation
/// closest (least squares) to mapping every sky vector onto its mount
/// vector. `d` flips the smallest singular direction when the raw SVD
/// product would be a reflection.
fn wahba(indices: &[usize], sky: &[Vec3], mount: &[Vec3]) -> Mat3 {
    let mut h = [[0.0f64; 3]; 3];
    for &i in indices {
        for r in 0..3 {
            for c in 0..3 {
                h[r][c] += mount[i][r] * sky[i][c];
            }
        }
    }

    let svd = mat3::svd3(&h);
    let d = (mat3::det(&svd.u) * mat3::det(&svd.v)).signum();

    let mut u = svd.u;
    for row in u.iter_mut() {
        row[2] *= d;
    }
    mat3::mul(&u, &mat3::transpose(&svd.v))
}

/// Angular error of one point under a candidate rotation, degrees.
fn residual_deg(matrix: &Mat3, sky: Vec3, mount: Vec3) -> f64 {
    mat3::dot(mat3::mul_vec(matrix, sky), mount)
        .clamp(-1.0, 1.0)
        .acos()
        .to_degrees()
}

fn avg_residual_deg(matrix: &Mat3, indices: &[usize], sky: &[Vec3], mount: &[Vec3]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    let sum: f64 = indices
        .iter()
        .map(|&i| residual_deg(matrix, sky[i], mount[i]))
        .sum();
    sum / indices.len() as f64
}
