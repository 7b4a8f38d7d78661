use nalgebra::{Matrix3, Point2};
use tracing::debug;

use crate::error::{Degeneracy, RectifyError, Result};
use crate::geometry::{check_non_degenerate, transform_point, Quad};

/// Smallest acceptable pivot in the normalized system.
const PIVOT_THRESHOLD: f64 = 1e-10;

/// Allowed correspondence error, relative to the destination extent.
const CORRESPONDENCE_TOLERANCE: f64 = 1e-6;

/// A projective transform normalized so that `h[2][2] = 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Map a point through the transform.
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = transform_point(&self.matrix, p.x, p.y);
        Point2::new(x, y)
    }

    /// The transform in the opposite direction, rescaled so `h[2][2] = 1`
    /// whenever that entry does not vanish.
    pub fn inverse(&self) -> Result<Self> {
        let inv = self.matrix.try_inverse().ok_or_else(|| {
            RectifyError::DegenerateGeometry(Degeneracy::SingularSystem {
                pivot: self.matrix.determinant(),
            })
        })?;
        let scale = inv[(2, 2)];
        let matrix = if scale.abs() > 1e-15 { inv / scale } else { inv };
        Ok(Self { matrix })
    }

    /// Euclidean distance between `apply(src)` and `dst`.
    pub fn reprojection_error(&self, src: Point2<f64>, dst: Point2<f64>) -> f64 {
        nalgebra::distance(&self.apply(src), &dst)
    }
}

/// Estimate the homography mapping `source[i]` onto `dest[i]`.
///
/// The 8 unknowns (with `h[2][2] = 1`) are solved from the 8×9 augmented
/// system by Gaussian elimination with partial pivoting, on normalized
/// coordinates so the pivot threshold does not depend on image resolution.
/// Degenerate corners are rejected before the solve, and a transform that
/// misses any correspondence is rejected after it.
pub fn estimate(source: &Quad, dest: &Quad) -> Result<Homography> {
    for (label, quad) in [("source", source), ("destination", dest)] {
        if quad.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(RectifyError::InvalidInput(format!(
                "{} corners must be finite",
                label
            )));
        }
    }

    check_non_degenerate(source)?;
    check_non_degenerate(dest).map_err(|err| {
        RectifyError::InvalidInput(format!("destination rectangle is unusable: {}", err))
    })?;

    let (t_src, src_n) = normalize_points(source);
    let (t_dst, dst_n) = normalize_points(dest);

    let h = solve_dlt(&src_n, &dst_n)?;
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst.try_inverse().ok_or_else(|| {
        RectifyError::DegenerateGeometry(Degeneracy::SingularSystem {
            pivot: t_dst.determinant(),
        })
    })?;
    let denormalized = t_dst_inv * h_norm * t_src;

    let scale = denormalized[(2, 2)];
    if scale.abs() < 1e-12 {
        return Err(RectifyError::DegenerateGeometry(
            Degeneracy::SingularSystem { pivot: scale },
        ));
    }
    let homography = Homography {
        matrix: denormalized / scale,
    };

    let max_error = source
        .iter()
        .zip(dest.iter())
        .map(|(&s, &d)| homography.reprojection_error(s, d))
        .fold(0.0, f64::max);
    let extent = dest
        .iter()
        .map(|p| p.coords.norm())
        .fold(1.0_f64, f64::max);
    if max_error.is_nan() || max_error > CORRESPONDENCE_TOLERANCE * extent {
        return Err(RectifyError::DegenerateGeometry(
            Degeneracy::IllConditioned { max_error },
        ));
    }

    debug!(
        max_error,
        h = ?homography.matrix.as_slice(),
        "Homography estimated"
    );

    Ok(homography)
}

/// Solve the 8×9 augmented system for `h00..h21`.
fn solve_dlt(src: &Quad, dst: &Quad) -> Result<[f64; 8]> {
    let mut a = [[0.0f64; 9]; 8];
    for i in 0..4 {
        let (sx, sy) = (src[i].x, src[i].y);
        let (dx, dy) = (dst[i].x, dst[i].y);

        a[2 * i] = [sx, sy, 1.0, 0.0, 0.0, 0.0, -sx * dx, -sy * dx, dx];
        a[2 * i + 1] = [0.0, 0.0, 0.0, sx, sy, 1.0, -sx * dy, -sy * dy, dy];
    }

    for col in 0..8 {
        let (max_row, max_val) = (col..8)
            .map(|row| (row, a[row][col].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if max_val < PIVOT_THRESHOLD {
            return Err(RectifyError::DegenerateGeometry(
                Degeneracy::SingularSystem { pivot: max_val },
            ));
        }
        if max_row != col {
            a.swap(col, max_row);
        }

        let pivot = a[col][col];
        for row in (col + 1)..8 {
            let factor = a[row][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..9 {
                a[row][c] -= factor * a[col][c];
            }
        }
    }

    let mut h = [0.0f64; 8];
    for row in (0..8).rev() {
        let mut sum = a[row][8];
        for c in (row + 1)..8 {
            sum -= a[row][c] * h[c];
        }
        h[row] = sum / a[row][row];
    }

    Ok(h)
}

/// Translate the centroid to the origin and scale the mean distance to √2.
fn normalize_points(quad: &Quad) -> (Matrix3<f64>, Quad) {
    let cx = quad.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p.y).sum::<f64>() / 4.0;

    let mean_dist = quad
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = quad.map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)));

    (t, normalized)
}
