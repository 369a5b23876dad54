use super::FrameSource;
use crate::error::Result;
use image::RgbImage;
use std::collections::VecDeque;
use std::path::Path;

/// Finite, in-order stream of already-captured frames
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: VecDeque<RgbImage>,
}

impl FrameSequence {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// Load image files in the given order, converting each to RGB
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut frames = VecDeque::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            tracing::debug!("Loading frame {}", path.display());
            frames.push_back(image::open(path)?.to_rgb8());
        }
        tracing::info!("Loaded {} frames", frames.len());
        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for FrameSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        self.frames.front().map(|f| f.dimensions())
    }
}
