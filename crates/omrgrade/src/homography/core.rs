//! Plane-to-plane homography estimation via DLT with Hartley normalization.

use std::marker::PhantomData;

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::geometry::{nearly_collinear, Point};

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    LengthMismatch { src: usize, dst: usize },
    /// Correspondences do not determine a unique invertible mapping
    /// (collinear points in either plane, or a singular solution).
    Degenerate(String),
    NumericalFailure(String),
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::LengthMismatch { src, dst } => {
                write!(f, "src/dst length mismatch: {} vs {}", src, dst)
            }
            Self::Degenerate(msg) => write!(f, "degenerate transform: {}", msg),
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
        }
    }
}

impl std::error::Error for HomographyError {}

// ── Raw matrix helpers ───────────────────────────────────────────────────

/// Project a 2D point through a 3×3 homography: H * [x, y, 1]^T → [u, v].
///
/// Returns NaNs when the point maps to the line at infinity.
pub fn project_raw(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

pub(crate) fn matrix3_to_array(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// Translate the centroid to the origin and scale so the mean distance from
/// the origin is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

/// Reject point sets that cannot pin down a projective mapping.
///
/// With exactly four points every triple must be non-collinear. With more,
/// the set must not lie on a single line.
fn check_configuration(pts: &[[f64; 2]], plane: &str) -> Result<(), HomographyError> {
    let n = pts.len();
    if n == 4 {
        for skip in 0..4 {
            let tri: Vec<[f64; 2]> = (0..4).filter(|&i| i != skip).map(|i| pts[i]).collect();
            if nearly_collinear(tri[0], tri[1], tri[2]) {
                return Err(HomographyError::Degenerate(format!(
                    "three {} points are collinear",
                    plane
                )));
            }
        }
        return Ok(());
    }

    // Spread of the point cloud along its minor axis.
    let nf = n as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / nf;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / nf;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let tr = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = (0.25 * tr * tr - det).max(0.0).sqrt();
    let minor = 0.5 * tr - disc;
    if tr <= 1e-12 || minor / tr < 1e-10 {
        return Err(HomographyError::Degenerate(format!(
            "{} points are collinear",
            plane
        )));
    }
    Ok(())
}

/// Estimate H with dst ≈ project(H, src) from ≥4 correspondences.
///
/// More than four points yield the algebraic least-squares solution.
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }
    if src.iter().chain(dst).any(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err(HomographyError::NumericalFailure(
            "non-finite input coordinates".into(),
        ));
    }
    check_configuration(src, "source")?;
    check_configuration(dst, "destination")?;

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    // Build 2n × 9 matrix A
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        // Row 2i:   [  0  0  0 | -sx -sy -1 | dy*sx  dy*sy  dy ]
        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        // Row 2i+1: [ sx  sy  1 |  0  0  0 | -dx*sx -dx*sy -dx ]
        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // h is the eigenvector of the smallest eigenvalue of the 9×9 A^T A.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = (0..9)
        .min_by(|&i, &j| {
            eig.eigenvalues[i]
                .abs()
                .total_cmp(&eig.eigenvalues[j].abs())
        })
        .unwrap_or(0);
    let col = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(
        col[0], col[1], col[2], col[3], col[4], col[5], col[6], col[7], col[8],
    );

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    let h = if scale.abs() < 1e-15 { h } else { h / scale };
    if h.iter().any(|v| !v.is_finite()) {
        return Err(HomographyError::NumericalFailure(
            "non-finite homography entries".into(),
        ));
    }

    // Singular check relative to the matrix scale.
    let norm = h.norm();
    if norm < 1e-15 || (h.determinant() / norm.powi(3)).abs() < 1e-12 {
        return Err(HomographyError::Degenerate("singular homography".into()));
    }
    Ok(h)
}

// ── Typed wrapper ────────────────────────────────────────────────────────

/// Projective mapping from coordinate space `Src` to `Dst`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography<Src, Dst> {
    h: Matrix3<f64>,
    spaces: PhantomData<(Src, Dst)>,
}

impl<Src: Copy, Dst: Copy> Homography<Src, Dst> {
    /// Solve for the mapping that sends each `src[i]` onto `dst[i]`.
    pub fn estimate(src: &[Point<Src>], dst: &[Point<Dst>]) -> Result<Self, HomographyError> {
        let s: Vec<[f64; 2]> = src.iter().map(|p| p.to_array()).collect();
        let d: Vec<[f64; 2]> = dst.iter().map(|p| p.to_array()).collect();
        Ok(Self::from_matrix_unchecked(estimate_homography_dlt(&s, &d)?))
    }

    pub(crate) fn from_matrix_unchecked(h: Matrix3<f64>) -> Self {
        Self {
            h,
            spaces: PhantomData,
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        matrix3_to_array(&self.h)
    }

    /// Map a point; `None` when it lands on the line at infinity.
    pub fn project(&self, p: Point<Src>) -> Option<Point<Dst>> {
        let [u, v] = project_raw(&self.h, p.x, p.y);
        let q = Point::new(u, v);
        q.is_finite().then_some(q)
    }

    pub fn inverse(&self) -> Result<Homography<Dst, Src>, HomographyError> {
        let inv = self
            .h
            .try_inverse()
            .ok_or_else(|| HomographyError::Degenerate("homography is not invertible".into()))?;
        let scale = inv[(2, 2)];
        let inv = if scale.abs() < 1e-15 { inv } else { inv / scale };
        Ok(Homography::from_matrix_unchecked(inv))
    }

    /// Euclidean distance between `project(src)` and `dst`; infinite when the
    /// projection is undefined.
    pub fn reprojection_error(&self, src: Point<Src>, dst: Point<Dst>) -> f64 {
        self.project(src)
            .map(|p| p.distance(dst))
            .unwrap_or(f64::INFINITY)
    }

    /// Mean and maximum reprojection error over paired points.
    pub fn error_stats(&self, src: &[Point<Src>], dst: &[Point<Dst>]) -> (f64, f64) {
        let errs: Vec<f64> = src
            .iter()
            .zip(dst)
            .map(|(s, d)| self.reprojection_error(*s, *d))
            .collect();
        if errs.is_empty() {
            return (0.0, 0.0);
        }
        let mean = errs.iter().sum::<f64>() / errs.len() as f64;
        let max = errs.iter().copied().fold(0.0, f64::max);
        (mean, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ImagePoint, ImageSpace, Quad, TemplatePoint, TemplateSpace};
    use rand::prelude::*;

    #[test]
    fn identity_from_unit_square() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let h = estimate_homography_dlt(&pts, &pts).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert!((h[(r, c)] - expected).abs() < 1e-9, "h[{r},{c}] = {}", h[(r, c)]);
            }
        }
    }

    #[test]
    fn known_projective_map_is_recovered() {
        let h_true = Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 1e-4, -2e-4, 1.0);
        let src: Vec<[f64; 2]> = vec![[0.0, 0.0], [400.0, 0.0], [400.0, 560.0], [0.0, 560.0]];
        let dst: Vec<[f64; 2]> = src.iter().map(|p| project_raw(&h_true, p[0], p[1])).collect();
        let h = estimate_homography_dlt(&src, &dst).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                assert!((h[(r, c)] - h_true[(r, c)]).abs() < 1e-6 * h_true[(r, c)].abs().max(1.0));
            }
        }
    }

    #[test]
    fn collinear_source_is_degenerate() {
        let src = [[0.0, 0.0], [10.0, 0.0], [20.0, 0.0], [0.0, 10.0]];
        let dst = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let err = estimate_homography_dlt(&src, &dst).unwrap_err();
        assert!(matches!(err, HomographyError::Degenerate(_)));
    }

    #[test]
    fn collinear_destination_is_degenerate() {
        let src = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let dst = [[0.0, 0.0], [5.0, 5.0], [10.0, 10.0], [0.0, 10.0]];
        let err = estimate_homography_dlt(&src, &dst).unwrap_err();
        assert!(matches!(err, HomographyError::Degenerate(_)));
    }

    #[test]
    fn all_points_on_one_line_is_degenerate() {
        let src: Vec<[f64; 2]> = (0..6).map(|i| [i as f64, 2.0 * i as f64]).collect();
        let dst: Vec<[f64; 2]> = (0..6).map(|i| [i as f64, (i * i) as f64]).collect();
        let err = estimate_homography_dlt(&src, &dst).unwrap_err();
        assert!(matches!(err, HomographyError::Degenerate(_)));
    }

    #[test]
    fn too_few_and_mismatched_inputs_fail() {
        let p3 = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert_eq!(
            estimate_homography_dlt(&p3, &p3).unwrap_err(),
            HomographyError::TooFewPoints { needed: 4, got: 3 }
        );
        let p4 = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert_eq!(
            estimate_homography_dlt(&p4, &p3).unwrap_err(),
            HomographyError::LengthMismatch { src: 4, dst: 3 }
        );
    }

    #[test]
    fn least_squares_with_extra_points() {
        let h_true = Matrix3::new(0.8, -0.2, 50.0, 0.15, 1.1, -20.0, 2e-4, 1e-4, 1.0);
        let mut rng = StdRng::seed_from_u64(3);
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for _ in 0..30 {
            let p = [rng.gen_range(0.0..500.0), rng.gen_range(0.0..700.0)];
            let q = project_raw(&h_true, p[0], p[1]);
            src.push(p);
            dst.push([q[0] + rng.gen_range(-0.05..0.05), q[1] + rng.gen_range(-0.05..0.05)]);
        }
        let h = estimate_homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = project_raw(&h, s[0], s[1]);
            assert!((p[0] - d[0]).hypot(p[1] - d[1]) < 0.2);
        }
    }

    /// Random convex quads in both planes round-trip through H and H^-1.
    #[test]
    fn round_trip_on_random_quads() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut tested = 0;
        while tested < 200 {
            let jitter = |rng: &mut StdRng, x: f64, y: f64| {
                [x + rng.gen_range(-60.0..60.0), y + rng.gen_range(-60.0..60.0)]
            };
            let raw = [
                jitter(&mut rng, 100.0, 100.0),
                jitter(&mut rng, 900.0, 100.0),
                jitter(&mut rng, 900.0, 1200.0),
                jitter(&mut rng, 100.0, 1200.0),
            ];
            let image_quad = Quad::<ImageSpace>::new(raw.map(ImagePoint::from_array));
            if image_quad.validate().is_err() {
                continue;
            }
            let w = rng.gen_range(200.0..1500.0);
            let hgt = rng.gen_range(200.0..2000.0);
            let template_quad = Quad::<TemplateSpace>::from_rect(w, hgt);

            let h = Homography::estimate(template_quad.corners(), image_quad.corners()).unwrap();
            let inv = h.inverse().unwrap();
            for (t, r) in template_quad.corners().iter().zip(image_quad.corners()) {
                let fwd: ImagePoint = h.project(*t).unwrap();
                assert!(fwd.distance(*r) < 1e-6, "forward error {}", fwd.distance(*r));
                let back: TemplatePoint = inv.project(fwd).unwrap();
                assert!(back.distance(*t) < 1e-6, "round trip error {}", back.distance(*t));
                let raw_back: TemplatePoint = inv.project(*r).unwrap();
                assert!(h.project(raw_back).unwrap().distance(*r) < 1e-6);
            }
            tested += 1;
        }
    }

    #[test]
    fn error_stats_are_zero_for_exact_fit() {
        let src: Vec<TemplatePoint> = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]
            .into_iter()
            .map(TemplatePoint::from_array)
            .collect();
        let dst: Vec<ImagePoint> = [[3.0, 4.0], [14.0, 5.0], [13.0, 16.0], [2.0, 15.0]]
            .into_iter()
            .map(ImagePoint::from_array)
            .collect();
        let h = Homography::estimate(&src, &dst).unwrap();
        let (mean, max) = h.error_stats(&src, &dst);
        assert!(mean < 1e-9 && max < 1e-9);
    }
}
