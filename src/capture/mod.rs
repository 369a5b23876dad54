mod sequence;
#[cfg(feature = "camera")]
mod webcam;

pub use sequence::FrameSequence;
#[cfg(feature = "camera")]
pub use webcam::WebcamCapture;

use crate::error::{Result, VisionError};
use image::RgbImage;

/// Pull-based source of frames
pub trait FrameSource {
    /// Fetch the next frame, blocking until one is available.
    ///
    /// Returns `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Resolution of the frames, if known up front
    fn resolution(&self) -> Option<(u32, u32)>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        (**self).resolution()
    }
}

/// Grab a single still from a live source (reference or source image capture).
pub fn capture_still<S: FrameSource + ?Sized>(source: &mut S) -> Result<RgbImage> {
    source
        .next_frame()?
        .ok_or_else(|| VisionError::Capture("stream ended before a frame was captured".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_capture_still_takes_first_frame() {
        let first = RgbImage::from_pixel(4, 4, Rgb([1, 1, 1]));
        let second = RgbImage::from_pixel(4, 4, Rgb([2, 2, 2]));
        let mut source = FrameSequence::new(vec![first.clone(), second]);
        assert_eq!(capture_still(&mut source).unwrap(), first);
    }

    #[test]
    fn test_capture_still_on_empty_stream() {
        let mut source: Box<dyn FrameSource> = Box::new(FrameSequence::new(Vec::new()));
        assert!(matches!(
            capture_still(&mut source),
            Err(VisionError::Capture(_))
        ));
    }
}
