use nalgebra::{Matrix3, SMatrix, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

pub type Point2 = (f64, f64);

const RANSAC_SEED: u64 = 0x4a11_5eed;
const CONFIDENCE: f64 = 0.995;
const MIN_POINTS: usize = 4;

/// Planar projective transform, reference space -> frame space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Homography(matrix)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Map a point; `None` when it lands on the line at infinity.
    pub fn project(&self, (x, y): Point2) -> Option<Point2> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }
}

/// Robust estimation settings
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Maximum reprojection error of an inlier, in pixels
    pub threshold: f64,
    pub max_iterations: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl HomographyEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2)
fn normalizing_transform(points: &[Point2]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (cx, cy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.0, sy + p.1));
    let (cx, cy) = (cx / n, cy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, p: Point2) -> Point2 {
    let v = t * Vector3::new(p.0, p.1, 1.0);
    (v.x / v.z, v.y / v.z)
}

/// Direct linear transform over all given correspondences.
pub fn fit_homography(src: &[Point2], dst: &[Point2]) -> Option<Homography> {
    if src.len() < MIN_POINTS || src.len() != dst.len() {
        return None;
    }
    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (&s, &d) in src.iter().zip(dst) {
        let (x, y) = apply(&t_src, s);
        let (u, v) = apply(&t_dst, d);
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for r in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += r[i] * r[j];
                }
            }
        }
    }

    let eigen = ata.symmetric_eigen();
    let h = eigen.eigenvectors.column(eigen.eigenvalues.imin());
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let mut matrix = t_dst.try_inverse()? * normalized * t_src;
    let w = matrix[(2, 2)];
    if w.abs() > 1e-12 {
        matrix /= w;
    }
    if !matrix.iter().all(|v| v.is_finite()) || matrix.determinant().abs() < 1e-12 {
        return None;
    }
    Some(Homography(matrix))
}

fn collinear(a: Point2, b: Point2, c: Point2) -> bool {
    let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
    let scale = ((b.0 - a.0).abs() + (b.1 - a.1).abs()) * ((c.0 - a.0).abs() + (c.1 - a.1).abs());
    cross.abs() <= 1e-9 * scale.max(1.0)
}

/// A minimal sample is usable only if no three of its points are collinear
fn degenerate_sample(points: &[Point2; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES
        .iter()
        .any(|t| collinear(points[t[0]], points[t[1]], points[t[2]]))
}

fn reprojection_inliers(h: &Homography, src: &[Point2], dst: &[Point2], threshold: f64) -> Vec<bool> {
    let limit = threshold * threshold;
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| match h.project(s) {
            Some(p) => (p.0 - d.0).powi(2) + (p.1 - d.1).powi(2) <= limit,
            None => false,
        })
        .collect()
}

/// RANSAC over 4-point samples, refit on the best consensus set.
///
/// Returns `None` when there are fewer than four correspondences, when every
/// sample is degenerate, or when fewer than four inliers support the model.
pub fn estimate_homography(
    src: &[Point2],
    dst: &[Point2],
    params: &RansacParams,
) -> Option<HomographyEstimate> {
    let n = src.len();
    if n < MIN_POINTS || n != dst.len() {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut needed = params.max_iterations;
    let mut iteration = 0;

    while iteration < needed {
        iteration += 1;
        let idx = sample(&mut rng, n, MIN_POINTS).into_vec();
        let s = [src[idx[0]], src[idx[1]], src[idx[2]], src[idx[3]]];
        let d = [dst[idx[0]], dst[idx[1]], dst[idx[2]], dst[idx[3]]];
        if degenerate_sample(&s) || degenerate_sample(&d) {
            continue;
        }
        let Some(h) = fit_homography(&s, &d) else {
            continue;
        };

        let inliers = reprojection_inliers(&h, src, dst, params.threshold);
        let count = inliers.iter().filter(|&&b| b).count();
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            best = Some((h, inliers, count));

            let ratio = count as f64 / n as f64;
            let p_fail = 1.0 - ratio.powi(MIN_POINTS as i32);
            if p_fail <= f64::EPSILON {
                break;
            }
            let adaptive = ((1.0 - CONFIDENCE).ln() / p_fail.ln()).ceil();
            if adaptive.is_finite() && adaptive >= 0.0 {
                needed = needed.min(adaptive as usize);
            }
        }
    }

    let (h, inliers, count) = best?;
    if count < MIN_POINTS {
        return None;
    }

    let (in_src, in_dst): (Vec<Point2>, Vec<Point2>) = src
        .iter()
        .zip(dst)
        .zip(&inliers)
        .filter(|(_, &keep)| keep)
        .map(|((&s, &d), _)| (s, d))
        .unzip();

    let refined = fit_homography(&in_src, &in_dst).unwrap_or(h);
    let refined_inliers = reprojection_inliers(&refined, src, dst, params.threshold);
    let (homography, inliers) = if refined_inliers.iter().filter(|&&b| b).count() >= count {
        (refined, refined_inliers)
    } else {
        (h, inliers)
    };

    tracing::debug!(
        "Homography from {} correspondences: {} inliers after {} iterations",
        n,
        inliers.iter().filter(|&&b| b).count(),
        iteration
    );

    Some(HomographyEstimate {
        homography,
        inliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth() -> Homography {
        Homography::from_matrix(Matrix3::new(
            1.1, 0.05, 12.0, -0.03, 0.95, 7.0, 0.0004, -0.0002, 1.0,
        ))
    }

    fn grid() -> Vec<Point2> {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..4 {
                points.push((10.0 + i as f64 * 23.0, 8.0 + j as f64 * 19.0 + i as f64 * 1.5));
            }
        }
        points
    }

    #[test]
    fn test_identity_projection() {
        let h = Homography::from_matrix(Matrix3::identity());
        assert_eq!(h.project((3.0, 4.0)), Some((3.0, 4.0)));
    }

    #[test]
    fn test_fit_recovers_exact_transform() {
        let h = truth();
        let src = grid();
        let dst: Vec<Point2> = src.iter().map(|&p| h.project(p).unwrap()).collect();
        let fitted = fit_homography(&src, &dst).unwrap();
        for &p in &src {
            let a = h.project(p).unwrap();
            let b = fitted.project(p).unwrap();
            assert!((a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let h = truth();
        let src = grid();
        let mut dst: Vec<Point2> = src.iter().map(|&p| h.project(p).unwrap()).collect();
        dst[2] = (400.0, -30.0);
        dst[11] = (0.0, 250.0);
        dst[17].0 += 40.0;

        let estimate = estimate_homography(&src, &dst, &RansacParams::default()).unwrap();
        assert_eq!(estimate.inlier_count(), src.len() - 3);
        assert!(!estimate.inliers[2] && !estimate.inliers[11] && !estimate.inliers[17]);

        let corner = estimate.homography.project((0.0, 0.0)).unwrap();
        let expected = h.project((0.0, 0.0)).unwrap();
        assert!((corner.0 - expected.0).abs() < 1e-3);
        assert!((corner.1 - expected.1).abs() < 1e-3);
    }

    #[test]
    fn test_too_few_points() {
        let src = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert!(estimate_homography(&src, &src, &RansacParams::default()).is_none());
        assert!(fit_homography(&src, &src).is_none());
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let src: Vec<Point2> = (0..8).map(|i| (i as f64, 2.0 * i as f64)).collect();
        assert!(estimate_homography(&src, &src, &RansacParams::default()).is_none());
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let src = vec![(5.0, 5.0); 6];
        assert!(estimate_homography(&src, &src, &RansacParams::default()).is_none());
    }
}
