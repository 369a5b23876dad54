mod gmm;
mod grabcut;
mod graph;
mod mask;
pub mod types;

pub use gmm::Gmm;
pub use grabcut::GrabCut;
pub use graph::FlowGraph;
pub use mask::{Label, LabelMask};
pub use types::SegmentationModel;

use crate::config::SegmentConfig;
use crate::contours::{external_contours, largest};
use crate::draw;
use crate::error::{ensure_non_empty, Result, VisionError};
use crate::geometry::{Extraction, Region};
use image::{Rgb, RgbImage};

#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Final labels
    pub mask: LabelMask,
    /// Source pixels where the mask leans foreground, black elsewhere
    pub foreground: RgbImage,
    pub outcome: Extraction,
}

/// Seed rectangle: the source shrunk by `margin` on every side
pub fn seed_region(width: u32, height: u32, margin: u32) -> Result<Region> {
    let twice = margin.saturating_mul(2);
    if width <= twice || height <= twice {
        return Err(VisionError::InvalidInput(format!(
            "{}x{} source is too small for a {} px seed margin",
            width, height, margin
        )));
    }
    Ok(Region::new(margin, margin, width - twice, height - twice))
}

/// Segment with any refinement backend
pub fn segment_with<M: SegmentationModel + ?Sized>(
    model: &mut M,
    source: &RgbImage,
    display: &mut RgbImage,
    margin: u32,
) -> Result<Segmentation> {
    let _span = tracing::debug_span!("segment").entered();
    ensure_non_empty(source.width(), source.height(), "source")?;
    let (width, height) = source.dimensions();
    let seed = seed_region(width, height, margin)?;

    let mut mask = LabelMask::from_seed(width, height, seed);
    model.refine(source, &mut mask)?;

    let fg_mask = mask.foreground_mask();
    let foreground = RgbImage::from_fn(width, height, |x, y| {
        if fg_mask.get_pixel(x, y)[0] > 0 {
            *source.get_pixel(x, y)
        } else {
            Rgb([0, 0, 0])
        }
    });

    draw::reset_display(display, source);
    let mut contours = external_contours(&fg_mask);
    let outcome = match largest(&contours) {
        Some(index) => {
            let contour = contours.swap_remove(index);
            draw::draw_contour(display, &contour, draw::GREEN);
            match contour.bounding_box() {
                Some(region) => {
                    tracing::info!("Foreground contour in {:?}", region);
                    Extraction::found(source, region)
                }
                None => Extraction::PassThrough(source.clone()),
            }
        }
        None => {
            tracing::info!("Segmentation found no foreground, returning the source unchanged");
            Extraction::PassThrough(source.clone())
        }
    };

    Ok(Segmentation {
        mask,
        foreground,
        outcome,
    })
}

/// GrabCut segmentation seeded with the configured margin
pub fn segment(source: &RgbImage, display: &mut RgbImage, config: &SegmentConfig) -> Result<Segmentation> {
    let mut model = GrabCut::from(config);
    segment_with(&mut model, source, display, config.margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeepSeed;

    impl SegmentationModel for KeepSeed {
        fn refine(&mut self, _image: &RgbImage, _mask: &mut LabelMask) -> Result<()> {
            Ok(())
        }
    }

    fn disc_on_green() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| {
            let (dx, dy) = (x as i32 - 30, y as i32 - 22);
            if dx * dx + dy * dy <= 100 {
                Rgb([250, 220, 40])
            } else {
                Rgb([30, 150, 60])
            }
        })
    }

    #[test]
    fn test_seed_region() {
        assert_eq!(seed_region(100, 80, 10).unwrap(), Region::new(10, 10, 80, 60));
        assert!(seed_region(20, 80, 10).is_err());
        assert!(seed_region(21, 21, 10).is_ok());
    }

    #[test]
    fn test_crop_within_bounds_and_mask_leans_foreground() {
        let source = disc_on_green();
        let mut display = RgbImage::new(1, 1);
        let result = segment(&source, &mut display, &SegmentConfig::default()).unwrap();

        let region = result.outcome.region().expect("the disc is found");
        assert!(region.fits_within(64, 48));
        assert!(region.x >= 10 && region.y >= 10);

        for (x, y, p) in result.foreground.enumerate_pixels() {
            if *p != Rgb([0, 0, 0]) {
                assert!(result.mask.get(x, y).is_foreground());
                assert_eq!(p, source.get_pixel(x, y));
            }
        }
        assert!(result.mask.get(30, 22).is_foreground());
        assert!(!result.mask.get(12, 40).is_foreground());
    }

    #[test]
    fn test_uniform_source_passes_through() {
        let source = RgbImage::from_pixel(40, 40, Rgb([100, 100, 100]));
        let mut display = RgbImage::new(1, 1);
        let result = segment(&source, &mut display, &SegmentConfig::default()).unwrap();
        assert!(!result.outcome.is_found());
        assert_eq!(result.outcome.crop(), &source);
        assert_eq!(display, source);
        assert_eq!(result.mask.count(Label::ProbableForeground), 0);
    }

    #[test]
    fn test_custom_model_keeps_seed_rectangle() {
        let source = disc_on_green();
        let mut display = RgbImage::new(1, 1);
        let result = segment_with(&mut KeepSeed, &source, &mut display, 8).unwrap();
        assert_eq!(result.outcome.region(), Some(Region::new(8, 8, 48, 32)));
    }

    #[test]
    fn test_too_small_source_rejected() {
        let mut display = RgbImage::new(1, 1);
        let source = RgbImage::new(15, 40);
        assert!(matches!(
            segment(&source, &mut display, &SegmentConfig::default()),
            Err(VisionError::InvalidInput(_))
        ));
        assert!(matches!(
            segment(&RgbImage::new(0, 0), &mut display, &SegmentConfig::default()),
            Err(VisionError::InvalidInput(_))
        ));
    }
}
