use super::OutputSink;
use crate::error::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Writes numbered PNG files (`frame_000000.png`, ...) into a directory
pub struct ImageDirectory {
    dir: PathBuf,
    next: usize,
}

impl ImageDirectory {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!("Writing frames to {}", dir.display());
        Ok(Self { dir, next: 0 })
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl OutputSink for ImageDirectory {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.path_for(self.next);
        frame.save(&path)?;
        tracing::debug!("Wrote {}", path.display());
        self.next += 1;
        Ok(())
    }

    fn frames_written(&self) -> usize {
        self.next
    }
}
