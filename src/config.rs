//! Configuration for the vision operations

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the two cascade models for the region detector live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    /// Directory holding the model files
    pub dir: PathBuf,
    /// Primary-region model (faces)
    pub primary: String,
    /// Nested-region model (eyes)
    pub nested: String,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./models"),
            primary: "face_cascade.json".to_string(),
            nested: "eye_cascade.json".to_string(),
        }
    }
}

impl ModelPaths {
    pub fn primary_path(&self) -> PathBuf {
        self.dir.join(&self.primary)
    }

    pub fn nested_path(&self) -> PathBuf {
        self.dir.join(&self.nested)
    }
}

/// Multi-scale scan parameters for the region detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub scale_factor: f32,
    pub min_neighbors: usize,
    /// Smallest primary region side, in source pixels
    pub min_size: u32,
    pub nested_scale_factor: f32,
    pub nested_min_neighbors: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 30,
            nested_scale_factor: 1.1,
            nested_min_neighbors: 3,
        }
    }
}

/// Hysteresis thresholds for edge linking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub low_threshold: f32,
    pub high_threshold: f32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            low_threshold: 50.0,
            high_threshold: 150.0,
        }
    }
}

/// Foreground segmentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub iterations: usize,
    /// Seed rectangle inset on every side, in pixels
    pub margin: u32,
    /// Gaussian components per colour model
    pub components: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            margin: 10,
            components: 5,
        }
    }
}

/// Keypoint extraction and homography estimation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_features: usize,
    pub fast_threshold: u8,
    pub pyramid_levels: usize,
    /// Reprojection error, in pixels, below which a correspondence is an inlier
    pub ransac_threshold: f64,
    pub max_iterations: usize,
    /// Bounded wait between frames while polling for cancellation
    pub poll_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            fast_threshold: 20,
            pyramid_levels: 4,
            ransac_threshold: 3.0,
            max_iterations: 2000,
            poll_interval_ms: 30,
        }
    }
}

/// Full configuration for every operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub models: ModelPaths,
    pub detect: DetectConfig,
    pub edges: EdgeConfig,
    pub segment: SegmentConfig,
    pub tracker: TrackerConfig,
}

impl VisionConfig {
    /// Load a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: VisionConfig = toml::from_str(&text)
            .map_err(|e| VisionError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let d = &self.detect;
        if d.scale_factor <= 1.0 || d.nested_scale_factor <= 1.0 {
            return Err(VisionError::Config(
                "Detector scale factors must be greater than 1.0".to_string(),
            ));
        }
        if d.min_size == 0 {
            return Err(VisionError::Config("min_size must be non-zero".to_string()));
        }

        let e = &self.edges;
        if e.low_threshold < 0.0 || e.low_threshold > e.high_threshold {
            return Err(VisionError::Config(format!(
                "Edge thresholds must satisfy 0 <= low <= high (got {} / {})",
                e.low_threshold, e.high_threshold
            )));
        }

        let s = &self.segment;
        if s.iterations == 0 || s.components == 0 {
            return Err(VisionError::Config(
                "Segmentation needs at least one iteration and one component".to_string(),
            ));
        }

        let t = &self.tracker;
        if t.pyramid_levels == 0 || t.max_features == 0 {
            return Err(VisionError::Config(
                "Tracker needs at least one pyramid level and one feature".to_string(),
            ));
        }
        if t.ransac_threshold <= 0.0 || t.max_iterations == 0 {
            return Err(VisionError::Config(
                "RANSAC threshold and iteration count must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = VisionConfig::default();
        assert_eq!(config.detect.min_neighbors, 3);
        assert_eq!(config.segment.iterations, 5);
        assert_eq!(config.segment.margin, 10);
        assert_eq!(config.edges.low_threshold, 50.0);
        assert_eq!(config.edges.high_threshold, 150.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_model_paths() {
        let paths = ModelPaths {
            dir: PathBuf::from("/opt/models"),
            ..Default::default()
        };
        assert_eq!(paths.primary_path(), PathBuf::from("/opt/models/face_cascade.json"));
        assert_eq!(paths.nested_path(), PathBuf::from("/opt/models/eye_cascade.json"));
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = VisionConfig::default();
        config.detect.scale_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.edges.low_threshold = 200.0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.segment.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.tracker.ransac_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: VisionConfig = toml::from_str(
            r#"
            [segment]
            iterations = 2

            [models]
            dir = "/srv/cascades"
            "#,
        )
        .unwrap();
        assert_eq!(config.segment.iterations, 2);
        assert_eq!(config.segment.margin, 10);
        assert_eq!(config.models.dir, PathBuf::from("/srv/cascades"));
        assert_eq!(config.models.primary, "face_cascade.json");
    }
}
