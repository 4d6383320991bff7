//! Small dense 3x3 / 3-vector helpers for the alignment solver.
//!
//! Everything here is double precision; the wire format is the only place
//! the rotation matrix drops to f32.

pub type Vec3 = [f64; 3];
pub type Mat3 = [[f64; 3]; 3];

pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

const JACOBI_SWEEPS: usize = 100;
const JACOBI_EPS: f64 = 1e-15;
const SINGULAR_EPS: f64 = 1e-10;

pub fn mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            out[r][c] = a[r][0] * b[0][c] + a[r][1] * b[1][c] + a[r][2] * b[2][c];
        }
    }
    out
}

pub fn mul_vec(m: &Mat3, v: Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn transpose(m: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            out[r][c] = m[c][r];
        }
    }
    out
}

pub fn det(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Matrix whose columns are the given vectors.
pub fn from_columns(c0: Vec3, c1: Vec3, c2: Vec3) -> Mat3 {
    [
        [c0[0], c1[0], c2[0]],
        [c0[1], c1[1], c2[1]],
        [c0[2], c1[2], c2[2]],
    ]
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(v: Vec3) -> f64 {
    dot(v, v).sqrt()
}

/// Unit vector, or `None` for a (near-)zero input.
pub fn normalize(v: Vec3) -> Option<Vec3> {
    let n = norm(v);
    if n < SINGULAR_EPS {
        return None;
    }
    Some([v[0] / n, v[1] / n, v[2] / n])
}

/// Angle between two unit vectors, in degrees.
pub fn angle_deg(a: Vec3, b: Vec3) -> f64 {
    dot(a, b).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Eigendecomposition of a symmetric 3x3 by cyclic Jacobi rotations.
///
/// Returns the eigenvalues and the matrix whose columns are the matching
/// eigenvectors. Iterates until the largest off-diagonal entry is below
/// `JACOBI_EPS` or `JACOBI_SWEEPS` sweeps have run.
pub fn jacobi_eigen(mut a: Mat3) -> (Vec3, Mat3) {
    let mut v = IDENTITY;

    for _ in 0..JACOBI_SWEEPS {
        let off = a[0][1].abs().max(a[0][2].abs()).max(a[1][2].abs());
        if off < JACOBI_EPS {
            break;
        }

        for &(p, q) in &[(0usize, 1usize), (0, 2), (1, 2)] {
            if a[p][q] == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for k in 0..3 {
                let akp = a[k][p];
                let akq = a[k][q];
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let apk = a[p][k];
                let aqk = a[q][k];
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for k in 0..3 {
                let vkp = v[k][p];
                let vkq = v[k][q];
                v[k][p] = c * vkp - s * vkq;
                v[k][q] = s * vkp + c * vkq;
            }
        }
    }

    ([a[0][0], a[1][1], a[2][2]], v)
}

/// Singular value decomposition of a 3x3, `h = u * diag(sigma) * v^T`.
pub struct Svd {
    pub u: Mat3,
    pub sigma: Vec3,
    pub v: Mat3,
}

/// SVD via the eigendecomposition of `h^T h`.
///
/// Singular values come back sorted descending. A singular value below
/// `SINGULAR_EPS` zeroes its `u` column rather than dividing by it; the
/// caller sees the rank deficiency in `sigma`.
pub fn svd3(h: &Mat3) -> Svd {
    let hth = mul(&transpose(h), h);
    let (lambda, vecs) = jacobi_eigen(hth);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| lambda[b].partial_cmp(&lambda[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut v = [[0.0; 3]; 3];
    let mut sigma = [0.0; 3];
    for (dst, &src) in order.iter().enumerate() {
        sigma[dst] = lambda[src].max(0.0).sqrt();
        for r in 0..3 {
            v[r][dst] = vecs[r][src];
        }
    }

    let mut u = [[0.0; 3]; 3];
    for c in 0..3 {
        if sigma[c] < SINGULAR_EPS {
            continue;
        }
        let col = mul_vec(h, [v[0][c], v[1][c], v[2][c]]);
        for r in 0..3 {
            u[r][c] = col[r] / sigma[c];
        }
    }

    Svd { u, sigma, v }
}
