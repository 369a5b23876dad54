//! Template matching: slide a reference over a source and keep the best offset

use crate::draw;
use crate::error::{ensure_non_empty, Result, VisionError};
use crate::geometry::{crop, Region};
use crate::integral::IntegralImage;
use image::RgbImage;
use ndarray::Array2;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const CHANNELS: usize = 3;

/// Similarity metric, in the order the desktop tool numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    SqDiff,
    SqDiffNormed,
    CCorr,
    CCorrNormed,
    CCoeff,
    CCoeffNormed,
}

impl MatchMethod {
    pub const ALL: [MatchMethod; 6] = [
        MatchMethod::SqDiff,
        MatchMethod::SqDiffNormed,
        MatchMethod::CCorr,
        MatchMethod::CCorrNormed,
        MatchMethod::CCoeff,
        MatchMethod::CCoeffNormed,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Squared-difference metrics score a perfect match lowest
    pub fn prefers_minimum(self) -> bool {
        matches!(self, MatchMethod::SqDiff | MatchMethod::SqDiffNormed)
    }

    pub fn name(self) -> &'static str {
        match self {
            MatchMethod::SqDiff => "sqdiff",
            MatchMethod::SqDiffNormed => "sqdiff-normed",
            MatchMethod::CCorr => "ccorr",
            MatchMethod::CCorrNormed => "ccorr-normed",
            MatchMethod::CCoeff => "ccoeff",
            MatchMethod::CCoeffNormed => "ccoeff-normed",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatchMethod {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == lowered)
            .ok_or_else(|| VisionError::InvalidInput(format!("unknown match method '{}'", s)))
    }
}

/// Best alignment of the reference inside the source
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub region: Region,
    /// Raw score at the winning offset, before normalisation
    pub score: f32,
    pub crop: RgbImage,
}

/// Per-reference constants reused at every offset
struct ReferenceStats {
    sum: [f64; CHANNELS],
    square_sum: f64,
    /// Σ (T - mean(T))² over all channels
    centered_square_sum: f64,
    pixels: f64,
}

impl ReferenceStats {
    fn new(reference: &RgbImage) -> Self {
        let mut sum = [0.0; CHANNELS];
        let mut square_sum = 0.0;
        for px in reference.pixels() {
            for c in 0..CHANNELS {
                let v = px[c] as f64;
                sum[c] += v;
                square_sum += v * v;
            }
        }
        let pixels = (reference.width() * reference.height()) as f64;
        let centered_square_sum = square_sum - sum.iter().map(|s| s * s / pixels).sum::<f64>();
        Self {
            sum,
            square_sum,
            centered_square_sum: centered_square_sum.max(0.0),
            pixels,
        }
    }
}

fn normalized(num: f64, denom: f64, zero_denominator: f64) -> f64 {
    if denom > f64::EPSILON {
        num / denom
    } else {
        zero_denominator
    }
}

/// Score of the reference placed with its top-left corner at (x, y).
fn score_at(
    source: &RgbImage,
    reference: &RgbImage,
    integral: &IntegralImage,
    stats: &ReferenceStats,
    method: MatchMethod,
    x: u32,
    y: u32,
) -> f64 {
    let (rw, rh) = reference.dimensions();
    let src = source.as_raw();
    let refr = reference.as_raw();
    let src_stride = source.width() as usize * CHANNELS;
    let ref_stride = rw as usize * CHANNELS;

    let mut cross = [0.0f64; CHANNELS];
    for ty in 0..rh as usize {
        let s_row = (y as usize + ty) * src_stride + x as usize * CHANNELS;
        let r_row = ty * ref_stride;
        for i in 0..ref_stride {
            cross[i % CHANNELS] += src[s_row + i] as f64 * refr[r_row + i] as f64;
        }
    }
    let cross_total: f64 = cross.iter().sum();

    let mut window_sum = [0.0f64; CHANNELS];
    let mut window_square_sum = 0.0;
    for c in 0..CHANNELS {
        window_sum[c] = integral.sum(c, x, y, rw, rh) as f64;
        window_square_sum += integral.square_sum(c, x, y, rw, rh) as f64;
    }

    match method {
        MatchMethod::SqDiff => (stats.square_sum - 2.0 * cross_total + window_square_sum).max(0.0),
        MatchMethod::SqDiffNormed => {
            let num = (stats.square_sum - 2.0 * cross_total + window_square_sum).max(0.0);
            normalized(num, (stats.square_sum * window_square_sum).sqrt(), 1.0)
        }
        MatchMethod::CCorr => cross_total,
        MatchMethod::CCorrNormed => normalized(
            cross_total,
            (stats.square_sum * window_square_sum).sqrt(),
            0.0,
        ),
        MatchMethod::CCoeff | MatchMethod::CCoeffNormed => {
            let mut num = 0.0;
            let mut window_centered = window_square_sum;
            for c in 0..CHANNELS {
                num += cross[c] - stats.sum[c] * window_sum[c] / stats.pixels;
                window_centered -= window_sum[c] * window_sum[c] / stats.pixels;
            }
            if method == MatchMethod::CCoeff {
                num
            } else {
                let denom = (stats.centered_square_sum * window_centered.max(0.0)).sqrt();
                normalized(num, denom, 0.0).clamp(-1.0, 1.0)
            }
        }
    }
}

/// Dense score surface of size (H - h + 1) rows x (W - w + 1) columns.
pub fn score_surface(
    source: &RgbImage,
    reference: &RgbImage,
    method: MatchMethod,
) -> Result<Array2<f32>> {
    let _span = tracing::debug_span!("match_template", %method).entered();

    let (sw, sh) = source.dimensions();
    let (rw, rh) = reference.dimensions();
    ensure_non_empty(sw, sh, "source")?;
    ensure_non_empty(rw, rh, "reference")?;
    if rw > sw || rh > sh {
        return Err(VisionError::InvalidInput(format!(
            "reference {}x{} is larger than source {}x{}",
            rw, rh, sw, sh
        )));
    }

    let cols = (sw - rw + 1) as usize;
    let rows = (sh - rh + 1) as usize;
    let integral = IntegralImage::new(source.as_raw(), sw, sh, CHANNELS);
    let stats = ReferenceStats::new(reference);

    let scored_rows: Vec<Vec<f32>> = (0..rows)
        .into_par_iter()
        .map(|y| {
            (0..cols)
                .map(|x| {
                    score_at(source, reference, &integral, &stats, method, x as u32, y as u32)
                        as f32
                })
                .collect()
        })
        .collect();
    let values: Vec<f32> = scored_rows.into_iter().flatten().collect();

    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| VisionError::InvalidInput(format!("score surface shape: {}", e)))
}

/// Rescale the surface in place to [0, 1]. A constant surface becomes all zeros.
pub fn normalize_min_max(surface: &mut Array2<f32>) {
    let (min, max) = surface
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        surface.fill(0.0);
        return;
    }
    surface.mapv_inplace(|v| (v - min) / range);
}

/// Offset (x, y) of the winning extremum; the first one in row-major order wins ties.
pub fn locate_best(surface: &Array2<f32>, method: MatchMethod) -> Option<(u32, u32)> {
    let mut best: Option<((usize, usize), f32)> = None;
    for ((row, col), &value) in surface.indexed_iter() {
        let better = match best {
            None => true,
            Some((_, current)) if method.prefers_minimum() => value < current,
            Some((_, current)) => value > current,
        };
        if better {
            best = Some(((row, col), value));
        }
    }
    best.map(|((row, col), _)| (col as u32, row as u32))
}

/// Find the reference inside the source, box it on `display` and crop it out.
///
/// `display` is overwritten with a copy of the source before the box is drawn.
pub fn search(
    source: &RgbImage,
    reference: &RgbImage,
    display: &mut RgbImage,
    method: MatchMethod,
) -> Result<SearchMatch> {
    let raw = score_surface(source, reference, method)?;
    let mut surface = raw.clone();
    normalize_min_max(&mut surface);

    let (x, y) = locate_best(&surface, method)
        .ok_or_else(|| VisionError::InvalidInput("empty score surface".to_string()))?;
    let score = raw[[y as usize, x as usize]];
    let region = Region::new(x, y, reference.width(), reference.height());

    debug!(
        "Best {} match at ({}, {}) with raw score {:.4}",
        method, x, y, score
    );

    draw::reset_display(display, source);
    draw::draw_box(display, region, draw::GREEN);

    Ok(SearchMatch {
        region,
        score,
        crop: crop(source, region),
    })
}
