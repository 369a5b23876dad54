use super::mask::LabelMask;
use crate::error::Result;
use image::RgbImage;

/// Trait for foreground refinement backends
/// Allows swapping GrabCut for other mask refiners
pub trait SegmentationModel {
    /// Refine `mask` in place for `image`
    ///
    /// Only probable labels may change; definite background and foreground are fixed.
    fn refine(&mut self, image: &RgbImage, mask: &mut LabelMask) -> Result<()>;
}
