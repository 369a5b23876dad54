//! Full-covariance Gaussian mixtures over RGB colours

pub type Color = [f64; 3];

const KMEANS_ROUNDS: usize = 10;
/// Added to the covariance diagonal so flat regions stay invertible
const REGULARIZATION: f64 = 0.01;

#[derive(Debug, Clone)]
struct Component {
    weight: f64,
    mean: Color,
    inverse: [[f64; 3]; 3],
    /// 1 / sqrt(det(covariance))
    norm: f64,
}

impl Component {
    fn density(&self, c: &Color) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let d = [c[0] - self.mean[0], c[1] - self.mean[1], c[2] - self.mean[2]];
        let mut mahalanobis = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                mahalanobis += d[i] * self.inverse[i][j] * d[j];
            }
        }
        self.norm * (-0.5 * mahalanobis).exp()
    }
}

#[derive(Debug, Clone)]
pub struct Gmm {
    components: Vec<Component>,
}

fn distance_sq(a: &Color, b: &Color) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// Lloyd's k-means seeded with evenly spaced samples; returns a cluster per sample.
pub fn kmeans(samples: &[Color], k: usize) -> Vec<usize> {
    if samples.is_empty() || k == 0 {
        return vec![0; samples.len()];
    }
    let mut centers: Vec<Color> = (0..k).map(|i| samples[i * samples.len() / k]).collect();
    let mut labels = vec![0usize; samples.len()];

    for _ in 0..KMEANS_ROUNDS {
        for (label, s) in labels.iter_mut().zip(samples) {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (i, c) in centers.iter().enumerate() {
                let d = distance_sq(s, c);
                if d < best_d {
                    best_d = d;
                    best = i;
                }
            }
            *label = best;
        }

        let mut sums = vec![([0.0; 3], 0usize); k];
        for (&label, s) in labels.iter().zip(samples) {
            let (sum, n) = &mut sums[label];
            for ch in 0..3 {
                sum[ch] += s[ch];
            }
            *n += 1;
        }
        for (center, (sum, n)) in centers.iter_mut().zip(sums) {
            if n > 0 {
                *center = [sum[0] / n as f64, sum[1] / n as f64, sum[2] / n as f64];
            }
        }
    }
    labels
}

fn invert(m: &[[f64; 3]; 3]) -> Option<([[f64; 3]; 3], f64)> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det <= f64::EPSILON {
        return None;
    }
    let inv = [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
        ],
    ];
    Some((inv, det))
}

impl Gmm {
    /// Fit `k` components from samples and their component assignments.
    ///
    /// Returns `None` for an empty sample set.
    pub fn fit(samples: &[Color], assignments: &[usize], k: usize) -> Option<Self> {
        if samples.is_empty() || k == 0 {
            return None;
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut products = vec![[[0.0f64; 3]; 3]; k];
        let mut counts = vec![0usize; k];
        for (s, &a) in samples.iter().zip(assignments) {
            let a = a.min(k - 1);
            counts[a] += 1;
            for i in 0..3 {
                sums[a][i] += s[i];
                for j in 0..3 {
                    products[a][i][j] += s[i] * s[j];
                }
            }
        }

        let total = samples.len() as f64;
        let components = (0..k)
            .map(|c| {
                let n = counts[c] as f64;
                if counts[c] == 0 {
                    return Component {
                        weight: 0.0,
                        mean: [0.0; 3],
                        inverse: [[0.0; 3]; 3],
                        norm: 0.0,
                    };
                }
                let mean = [sums[c][0] / n, sums[c][1] / n, sums[c][2] / n];
                let mut cov = [[0.0; 3]; 3];
                for i in 0..3 {
                    for j in 0..3 {
                        cov[i][j] = products[c][i][j] / n - mean[i] * mean[j];
                    }
                    cov[i][i] += REGULARIZATION;
                }
                match invert(&cov) {
                    Some((inverse, det)) => Component {
                        weight: n / total,
                        mean,
                        inverse,
                        norm: 1.0 / det.sqrt(),
                    },
                    None => Component {
                        weight: 0.0,
                        mean,
                        inverse: [[0.0; 3]; 3],
                        norm: 0.0,
                    },
                }
            })
            .collect();

        Some(Self { components })
    }

    /// Fit from scratch, clustering with k-means first.
    pub fn from_samples(samples: &[Color], k: usize) -> Option<Self> {
        let assignments = kmeans(samples, k);
        Self::fit(samples, &assignments, k)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Mixture likelihood of a colour
    pub fn likelihood(&self, c: &Color) -> f64 {
        self.components
            .iter()
            .map(|comp| comp.weight * comp.density(c))
            .sum()
    }

    /// Component that best explains a colour; the first wins ties.
    pub fn most_likely(&self, c: &Color) -> usize {
        let mut best = 0;
        let mut best_p = 0.0;
        for (i, comp) in self.components.iter().enumerate() {
            let p = comp.density(c);
            if p > best_p {
                best_p = p;
                best = i;
            }
        }
        best
    }
}
