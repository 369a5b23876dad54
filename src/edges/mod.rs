//! Gradient-based edge map and largest external contour

use crate::config::EdgeConfig;
use crate::contours::{external_contours, largest, Contour};
use crate::draw;
use crate::error::{ensure_non_empty, Result, VisionError};
use crate::geometry::Extraction;
use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::edges::canny;
use ndarray::Array2;

pub const MAX_KERNEL_SIZE: u32 = 31;

#[derive(Debug, Clone)]
pub struct EdgeExtraction {
    /// Binary edge map after hysteresis
    pub edges: GrayImage,
    /// The selected contour, if any
    pub contour: Option<Contour>,
    pub outcome: Extraction,
}

/// Smoothing and derivative taps of a `size`-tap Sobel operator.
///
/// Size 1 is the bare `[-1, 0, 1]` derivative with no smoothing.
pub fn sobel_kernels(size: u32) -> Result<(Vec<f64>, Vec<f64>)> {
    if size == 0 || size % 2 == 0 || size > MAX_KERNEL_SIZE {
        return Err(VisionError::InvalidInput(format!(
            "kernel size must be odd and between 1 and {} (got {})",
            MAX_KERNEL_SIZE, size
        )));
    }
    if size == 1 {
        return Ok((vec![1.0], vec![-1.0, 0.0, 1.0]));
    }

    let binomial = |len: usize| {
        let mut row = vec![1.0f64];
        for _ in 1..len {
            let mut next = vec![1.0; row.len() + 1];
            for i in 1..row.len() {
                next[i] = row[i - 1] + row[i];
            }
            row = next;
        }
        row
    };

    let smooth = binomial(size as usize);
    let base = binomial(size as usize - 1);
    let mut derivative = vec![0.0; size as usize];
    for (i, &b) in base.iter().enumerate() {
        derivative[i] -= b;
        derivative[i + 1] += b;
    }
    Ok((smooth, derivative))
}

/// Mirror an out-of-range index back inside `0..len` without repeating the edge sample
fn reflect(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

fn convolve_rows(input: &Array2<f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = input.dim();
    let r = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &tap)| tap * input[[y, reflect(x as isize + k as isize - r, w)]])
            .sum()
    })
}

fn convolve_cols(input: &Array2<f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = input.dim();
    let r = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &tap)| tap * input[[reflect(y as isize + k as isize - r, h), x]])
            .sum()
    })
}

/// Horizontal and vertical derivatives, indexed `[[y, x]]`.
pub fn sobel_gradients(gray: &GrayImage, size: u32) -> Result<(Array2<f64>, Array2<f64>)> {
    let (smooth, derivative) = sobel_kernels(size)?;
    let (w, h) = gray.dimensions();
    let input = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        gray.get_pixel(x as u32, y as u32)[0] as f64
    });

    let gx = convolve_cols(&convolve_rows(&input, &derivative), &smooth);
    let gy = convolve_rows(&convolve_cols(&input, &derivative), &smooth);
    Ok((gx, gy))
}

/// Equal-weight blend of the saturated absolute gradients
fn fuse(gx: &Array2<f64>, gy: &Array2<f64>) -> GrayImage {
    let (h, w) = gx.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let ax = gx[[y as usize, x as usize]].abs().min(255.0).round();
        let ay = gy[[y as usize, x as usize]].abs().min(255.0).round();
        Luma([(0.5 * ax + 0.5 * ay).round() as u8])
    })
}

/// Find the largest external contour of the edge map and crop its bounding box.
///
/// When no contour exists the display is a plain copy of the source and the
/// whole source is returned.
pub fn extract_edges(
    source: &RgbImage,
    display: &mut RgbImage,
    kernel_size: u32,
    config: &EdgeConfig,
) -> Result<EdgeExtraction> {
    let _span = tracing::debug_span!("extract_edges", kernel_size).entered();
    ensure_non_empty(source.width(), source.height(), "source")?;

    let gray = imageops::grayscale(source);
    let (gx, gy) = sobel_gradients(&gray, kernel_size)?;
    let strength = fuse(&gx, &gy);
    let edges = canny(&strength, config.low_threshold, config.high_threshold);

    let mut contours = external_contours(&edges);
    tracing::debug!("{} external contours", contours.len());

    draw::reset_display(display, source);
    let Some(index) = largest(&contours) else {
        tracing::info!("No contours found, returning the source unchanged");
        return Ok(EdgeExtraction {
            edges,
            contour: None,
            outcome: Extraction::PassThrough(source.clone()),
        });
    };

    let contour = contours.swap_remove(index);
    draw::draw_contour(display, &contour, draw::GREEN);

    let outcome = match contour.bounding_box() {
        Some(region) => {
            tracing::info!("Largest contour area {:.1} in {:?}", contour.area(), region);
            Extraction::found(source, region)
        }
        None => Extraction::PassThrough(source.clone()),
    };

    Ok(EdgeExtraction {
        edges,
        contour: Some(contour),
        outcome,
    })
}
