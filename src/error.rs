//! Error types for vizor

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load detector model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, VisionError>;

impl VisionError {
    pub(crate) fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VisionError::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Reject zero-sized buffers before any work is done.
pub(crate) fn ensure_non_empty(width: u32, height: u32, what: &str) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(VisionError::InvalidInput(format!(
            "{} image is empty ({}x{})",
            what, width, height
        )));
    }
    Ok(())
}
