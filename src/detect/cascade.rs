use super::grouping::group_rectangles;
use super::RegionDetector;
use crate::error::{Result, VisionError};
use crate::geometry::Region;
use crate::integral::IntegralImage;
use image::{imageops, GrayImage};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;

/// Boosted Haar cascade as stored on disk
#[derive(Debug, Deserialize)]
struct CascadeModel {
    window: [u32; 2],
    features: Vec<FeatureModel>,
    stages: Vec<StageModel>,
}

#[derive(Debug, Deserialize)]
struct FeatureModel {
    /// `[x, y, w, h, weight]` in window coordinates
    rects: Vec<(u32, u32, u32, u32, f32)>,
}

#[derive(Debug, Deserialize)]
struct StageModel {
    threshold: f32,
    classifiers: Vec<Stump>,
}

#[derive(Debug, Clone, Deserialize)]
struct Stump {
    feature: usize,
    threshold: f32,
    left: f32,
    right: f32,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    stumps: Vec<Stump>,
}

/// Multi-scale scan settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    pub scale_factor: f32,
    pub min_neighbors: usize,
    /// Windows smaller than this side length are skipped
    pub min_size: u32,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CascadeClassifier {
    window: (u32, u32),
    features: Vec<Vec<WeightedRect>>,
    stages: Vec<Stage>,
}

impl CascadeClassifier {
    /// Load a cascade model file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| VisionError::model_load(path, e))?;
        let cascade = Self::parse(&text).map_err(|reason| VisionError::model_load(path, reason))?;
        tracing::info!(
            "Loaded cascade {} ({} stages, {}x{} window)",
            path.display(),
            cascade.stages.len(),
            cascade.window.0,
            cascade.window.1
        );
        Ok(cascade)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse(json).map_err(|reason| VisionError::Config(format!("invalid cascade: {}", reason)))
    }

    fn parse(json: &str) -> std::result::Result<Self, String> {
        let model: CascadeModel = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let [ww, wh] = model.window;
        if ww == 0 || wh == 0 {
            return Err("window must be non-empty".to_string());
        }
        if model.stages.is_empty() {
            return Err("cascade has no stages".to_string());
        }

        let mut features = Vec::with_capacity(model.features.len());
        for (i, feature) in model.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(format!("feature {} has no rectangles", i));
            }
            let mut rects = Vec::with_capacity(feature.rects.len());
            for &(x, y, width, height, weight) in &feature.rects {
                if width == 0 || height == 0 || x + width > ww || y + height > wh {
                    return Err(format!(
                        "feature {} rectangle ({}, {}, {}, {}) leaves the {}x{} window",
                        i, x, y, width, height, ww, wh
                    ));
                }
                rects.push(WeightedRect {
                    x,
                    y,
                    width,
                    height,
                    weight: weight as f64,
                });
            }
            features.push(rects);
        }

        let mut stages = Vec::with_capacity(model.stages.len());
        for (i, stage) in model.stages.into_iter().enumerate() {
            if let Some(bad) = stage.classifiers.iter().find(|s| s.feature >= features.len()) {
                return Err(format!(
                    "stage {} references missing feature {}",
                    i, bad.feature
                ));
            }
            stages.push(Stage {
                threshold: stage.threshold as f64,
                stumps: stage.classifiers,
            });
        }

        Ok(Self {
            window: (ww, wh),
            features,
            stages,
        })
    }

    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    /// Run every stage on the window with top-left (x, y).
    fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (ww, wh) = self.window;
        let area = (ww * wh) as f64;
        let mean = integral.sum(0, x, y, ww, wh) as f64 / area;
        let variance = integral.square_sum(0, x, y, ww, wh) as f64 / area - mean * mean;
        let sigma = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let norm = area * sigma;

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .stumps
                .iter()
                .map(|stump| {
                    let value: f64 = self.features[stump.feature]
                        .iter()
                        .map(|r| r.weight * integral.sum(0, x + r.x, y + r.y, r.width, r.height) as f64)
                        .sum();
                    if value < stump.threshold as f64 * norm {
                        stump.left as f64
                    } else {
                        stump.right as f64
                    }
                })
                .sum();
            total >= stage.threshold
        })
    }

    /// Raw window hits over an image pyramid, in source coordinates.
    pub fn scan(&self, image: &GrayImage, params: &ScanParams) -> Vec<Region> {
        let (iw, ih) = image.dimensions();
        let (ww, wh) = self.window;
        if iw == 0 || ih == 0 || params.scale_factor.is_nan() || params.scale_factor <= 1.0 {
            return Vec::new();
        }

        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (ww as f64 * factor).round() as u32;
            let win_h = (wh as f64 * factor).round() as u32;
            let sw = (iw as f64 / factor).round() as u32;
            let sh = (ih as f64 / factor).round() as u32;
            if sw < ww || sh < wh {
                break;
            }
            let current = factor;
            factor *= params.scale_factor as f64;
            if win_w < params.min_size || win_h < params.min_size {
                continue;
            }

            let scaled;
            let level = if (sw, sh) == (iw, ih) {
                image
            } else {
                scaled = imageops::resize(image, sw, sh, imageops::FilterType::Triangle);
                &scaled
            };
            let integral = IntegralImage::from_gray(level);
            let step = if current > 2.0 { 1 } else { 2 };

            let rows: Vec<Vec<Region>> = (0..=(sh - wh) / step)
                .into_par_iter()
                .map(|row| {
                    let y = row * step;
                    (0..=sw - ww)
                        .step_by(step as usize)
                        .filter(|&x| self.accepts(&integral, x, y))
                        .filter_map(|x| {
                            let sx = (x as f64 * current).round() as u32;
                            let sy = (y as f64 * current).round() as u32;
                            Region::new(sx, sy, win_w, win_h).clamp_to(iw, ih)
                        })
                        .collect()
                })
                .collect();
            hits.extend(rows.into_iter().flatten());
        }

        tracing::debug!("Cascade scan: {} raw windows", hits.len());
        hits
    }

    /// Scan and group; the result is in scan order of each cluster's first member.
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &ScanParams) -> Vec<Region> {
        group_rectangles(&self.scan(image, params), params.min_neighbors)
    }
}

/// A cascade bundled with the scan settings it should run with
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    pub classifier: CascadeClassifier,
    pub params: ScanParams,
}

impl CascadeDetector {
    pub fn new(classifier: CascadeClassifier, params: ScanParams) -> Self {
        Self { classifier, params }
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Region> {
        self.classifier.detect_multi_scale(image, &self.params)
    }
}
