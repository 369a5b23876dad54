use crate::config::TrackerConfig;
use image::{imageops, GrayImage, RgbImage};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 256-bit binary descriptor
pub type Descriptor = [u8; 32];

const DESCRIPTOR_BITS: usize = 256;
/// Radius of the orientation patch
const PATCH_RADIUS: i32 = 15;
/// Sampling pairs stay inside this radius so they survive any rotation
const PATTERN_RADIUS: i32 = 13;
/// Keypoints closer than this to a level border are dropped
const EDGE: u32 = (PATCH_RADIUS + 1) as u32;
const PATTERN_SEED: u64 = 0x5eed_0b1e;
const SCALE_STEP: f32 = 1.2;

/// Salient location in level-0 pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians
    pub angle: f32,
    pub octave: usize,
    pub response: f32,
}

/// Keypoints with their descriptors, index-aligned
#[derive(Debug, Clone, Default)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl KeypointSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Oriented FAST corners with steered BRIEF descriptors
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    max_features: usize,
    fast_threshold: u8,
    levels: usize,
    pattern: Vec<[i32; 4]>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

struct Candidate {
    corner: Corner,
    level: usize,
}

impl OrbExtractor {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            max_features: config.max_features,
            fast_threshold: config.fast_threshold,
            levels: config.pyramid_levels.max(1),
            pattern: sampling_pattern(),
        }
    }

    pub fn extract(&self, image: &RgbImage) -> KeypointSet {
        self.extract_gray(&imageops::grayscale(image))
    }

    pub fn extract_gray(&self, gray: &GrayImage) -> KeypointSet {
        let _span = tracing::debug_span!("orb_extract").entered();

        let pyramid = self.pyramid(gray);
        let mut candidates = Vec::new();
        for (level, image) in pyramid.iter().enumerate() {
            for corner in suppress_non_maximum(corners_fast9(image, self.fast_threshold)) {
                let (w, h) = image.dimensions();
                if corner.x >= EDGE && corner.y >= EDGE && corner.x + EDGE < w && corner.y + EDGE < h {
                    candidates.push(Candidate { corner, level });
                }
            }
        }

        candidates.sort_by(|a, b| b.corner.score.total_cmp(&a.corner.score));
        candidates.truncate(self.max_features);

        let smoothed: Vec<GrayImage> = pyramid.iter().map(|l| gaussian_blur_f32(l, 2.0)).collect();
        let mut set = KeypointSet::default();
        for candidate in candidates {
            let level_image = &pyramid[candidate.level];
            let (cx, cy) = (candidate.corner.x as i32, candidate.corner.y as i32);
            let angle = intensity_centroid_angle(level_image, cx, cy);
            let descriptor = self.describe(&smoothed[candidate.level], cx, cy, angle);
            let scale = SCALE_STEP.powi(candidate.level as i32);

            set.keypoints.push(Keypoint {
                x: cx as f32 * scale,
                y: cy as f32 * scale,
                angle,
                octave: candidate.level,
                response: candidate.corner.score,
            });
            set.descriptors.push(descriptor);
        }

        tracing::debug!("Extracted {} keypoints over {} levels", set.len(), pyramid.len());
        set
    }

    fn pyramid(&self, gray: &GrayImage) -> Vec<GrayImage> {
        let mut levels = vec![gray.clone()];
        for level in 1..self.levels {
            let scale = SCALE_STEP.powi(level as i32);
            let w = (gray.width() as f32 / scale).round() as u32;
            let h = (gray.height() as f32 / scale).round() as u32;
            if w <= 2 * EDGE || h <= 2 * EDGE {
                break;
            }
            levels.push(imageops::resize(gray, w, h, imageops::FilterType::Triangle));
        }
        levels
    }

    fn describe(&self, smoothed: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
            let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
            let x = (cx + rx).clamp(0, smoothed.width() as i32 - 1) as u32;
            let y = (cy + ry).clamp(0, smoothed.height() as i32 - 1) as u32;
            smoothed.get_pixel(x, y)[0]
        };

        let mut descriptor = [0u8; 32];
        for (bit, pair) in self.pattern.iter().enumerate() {
            if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

/// Fixed test-pair layout, both ends inside a disc of `PATTERN_RADIUS`
fn sampling_pattern() -> Vec<[i32; 4]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let point = |rng: &mut StdRng| loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    };
    (0..DESCRIPTOR_BITS)
        .map(|_| {
            let (x1, y1) = point(&mut rng);
            let (x2, y2) = point(&mut rng);
            [x1, y1, x2, y2]
        })
        .collect()
}

/// Keep corners whose score is not beaten by any 8-neighbour
fn suppress_non_maximum(corners: Vec<Corner>) -> Vec<Corner> {
    use std::collections::HashMap;

    let scores: HashMap<(u32, u32), f32> =
        corners.iter().map(|c| ((c.x, c.y), c.score)).collect();
    corners
        .into_iter()
        .filter(|c| {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (c.x as i64 + dx, c.y as i64 + dy);
                    if nx < 0 || ny < 0 {
                        continue;
                    }
                    if let Some(&s) = scores.get(&(nx as u32, ny as u32)) {
                        // ties go to the neighbour that comes first in scan order
                        let earlier = (ny, nx) < (c.y as i64, c.x as i64);
                        if s > c.score || (s == c.score && earlier) {
                            return false;
                        }
                    }
                }
            }
            true
        })
        .collect()
}

/// Orientation from the intensity centroid of the circular patch around (cx, cy)
fn intensity_centroid_angle(image: &GrayImage, cx: i32, cy: i32) -> f32 {
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
                continue;
            }
            let v = image.get_pixel(x as u32, y as u32)[0] as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}
