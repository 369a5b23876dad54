//! Two-stage region detection: primary regions (faces), then nested regions (eyes) inside each

mod cascade;
mod grouping;

pub use cascade::{CascadeClassifier, CascadeDetector, ScanParams};
pub use grouping::group_rectangles;

use crate::config::{DetectConfig, ModelPaths};
use crate::draw;
use crate::geometry::{Extraction, Region};
use image::{imageops, GrayImage, RgbImage};

/// Anything that can report candidate rectangles on an intensity image
pub trait RegionDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Region>;
}

impl<D: RegionDetector + ?Sized> RegionDetector for &D {
    fn detect(&self, image: &GrayImage) -> Vec<Region> {
        (**self).detect(image)
    }
}

impl<D: RegionDetector + ?Sized> RegionDetector for Box<D> {
    fn detect(&self, image: &GrayImage) -> Vec<Region> {
        (**self).detect(image)
    }
}

/// A primary region and the nested regions found inside it, all in source coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedRegion {
    pub region: Region,
    pub nested: Vec<Region>,
}

#[derive(Debug, Clone)]
pub struct FaceDetection {
    /// Every primary region, in detector order
    pub regions: Vec<DetectedRegion>,
    /// Crop of the first primary region, or the untouched source
    pub outcome: Extraction,
}

/// The loaded face and eye detectors
pub struct FaceModels {
    pub primary: CascadeDetector,
    pub nested: CascadeDetector,
}

impl FaceModels {
    /// Load both cascades; either one failing is a `ModelLoad` error.
    pub fn load(paths: &ModelPaths, config: &DetectConfig) -> crate::Result<Self> {
        let primary = CascadeClassifier::load(paths.primary_path())?;
        let nested = CascadeClassifier::load(paths.nested_path())?;
        Ok(Self {
            primary: CascadeDetector::new(
                primary,
                ScanParams {
                    scale_factor: config.scale_factor,
                    min_neighbors: config.min_neighbors,
                    min_size: config.min_size,
                },
            ),
            nested: CascadeDetector::new(
                nested,
                ScanParams {
                    scale_factor: config.nested_scale_factor,
                    min_neighbors: config.nested_min_neighbors,
                    min_size: 0,
                },
            ),
        })
    }
}

/// Run `primary` on the equalised source and `nested` inside every hit.
///
/// Primary regions are drawn as magenta ellipses and nested ones as blue
/// circles on `display`, which is first reset to a copy of the source.
pub fn detect_faces_with<P, N>(
    primary: &P,
    nested: &N,
    source: &RgbImage,
    display: &mut RgbImage,
) -> FaceDetection
where
    P: RegionDetector + ?Sized,
    N: RegionDetector + ?Sized,
{
    let _span = tracing::debug_span!("detect_faces").entered();
    draw::reset_display(display, source);

    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return FaceDetection {
            regions: Vec::new(),
            outcome: Extraction::PassThrough(source.clone()),
        };
    }

    let gray = imageproc::contrast::equalize_histogram(&imageops::grayscale(source));

    let regions: Vec<DetectedRegion> = primary
        .detect(&gray)
        .into_iter()
        .filter_map(|r| r.clamp_to(width, height))
        .map(|region| {
            let roi = imageops::crop_imm(&gray, region.x, region.y, region.width, region.height)
                .to_image();
            let nested = nested
                .detect(&roi)
                .into_iter()
                .filter_map(|inner| inner.clamp_to(region.width, region.height))
                .map(|inner| region.translate_from(inner))
                .collect();
            DetectedRegion { region, nested }
        })
        .collect();

    for detected in &regions {
        draw::draw_ellipse(display, detected.region, draw::MAGENTA);
        for &inner in &detected.nested {
            draw::draw_circle(display, inner, draw::BLUE);
        }
    }

    tracing::info!(
        "Detected {} primary regions ({} nested)",
        regions.len(),
        regions.iter().map(|d| d.nested.len()).sum::<usize>()
    );

    let outcome = match regions.first() {
        Some(first) => Extraction::found(source, first.region),
        None => Extraction::PassThrough(source.clone()),
    };
    FaceDetection { regions, outcome }
}

/// Load the configured models, then detect.
///
/// Fails before touching `display` when either model cannot be loaded.
pub fn detect_faces(
    source: &RgbImage,
    display: &mut RgbImage,
    paths: &ModelPaths,
    config: &DetectConfig,
) -> crate::Result<FaceDetection> {
    let models = FaceModels::load(paths, config)?;
    Ok(detect_faces_with(&models.primary, &models.nested, source, display))
}
