mod directory;

pub use directory::ImageDirectory;

use crate::error::Result;
use image::RgbImage;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Number of frames written so far
    fn frames_written(&self) -> usize;
}
