use crate::geometry::Region;
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array2;

/// Per-pixel segmentation label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Background,
    Foreground,
    ProbableBackground,
    ProbableForeground,
}

impl Label {
    /// Foreground or probable foreground
    pub fn is_foreground(self) -> bool {
        matches!(self, Label::Foreground | Label::ProbableForeground)
    }

    /// Probable labels are the only ones refinement may change
    pub fn is_probable(self) -> bool {
        matches!(self, Label::ProbableBackground | Label::ProbableForeground)
    }
}

/// Label grid with the dimensions of its source image, indexed `[[y, x]]`
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    labels: Array2<Label>,
}

impl LabelMask {
    pub fn new(width: u32, height: u32, fill: Label) -> Self {
        Self {
            labels: Array2::from_elem((height as usize, width as usize), fill),
        }
    }

    /// Definite background everywhere, probable foreground inside `seed`.
    pub fn from_seed(width: u32, height: u32, seed: Region) -> Self {
        let mut mask = Self::new(width, height, Label::Background);
        if let Some(seed) = seed.clamp_to(width, height) {
            for y in seed.y..seed.bottom() {
                for x in seed.x..seed.right() {
                    mask.set(x, y, Label::ProbableForeground);
                }
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.labels.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.labels.nrows() as u32
    }

    pub fn get(&self, x: u32, y: u32) -> Label {
        self.labels[[y as usize, x as usize]]
    }

    pub fn set(&mut self, x: u32, y: u32, label: Label) {
        self.labels[[y as usize, x as usize]] = label;
    }

    pub fn labels(&self) -> &Array2<Label> {
        &self.labels
    }

    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// 255 where the label leans foreground, 0 elsewhere
    pub fn foreground_mask(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            if self.get(x, y).is_foreground() {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    /// Grey-level visualisation, darkest for definite background
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let v = match self.get(x, y) {
                Label::Background => 0,
                Label::ProbableBackground => 64,
                Label::ProbableForeground => 192,
                Label::Foreground => 255,
            };
            Rgb([v, v, v])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_layout() {
        let mask = LabelMask::from_seed(10, 8, Region::new(2, 2, 6, 4));
        assert_eq!((mask.width(), mask.height()), (10, 8));
        assert_eq!(mask.get(0, 0), Label::Background);
        assert_eq!(mask.get(2, 2), Label::ProbableForeground);
        assert_eq!(mask.get(7, 5), Label::ProbableForeground);
        assert_eq!(mask.get(8, 5), Label::Background);
        assert_eq!(mask.count(Label::ProbableForeground), 24);
    }

    #[test]
    fn test_foreground_mask_and_visualisation() {
        let mut mask = LabelMask::new(3, 1, Label::ProbableBackground);
        mask.set(1, 0, Label::Foreground);
        mask.set(2, 0, Label::ProbableForeground);

        let fg = mask.foreground_mask();
        assert_eq!(fg.as_raw(), &vec![0, 255, 255]);

        let rgb = mask.to_rgb();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([64, 64, 64]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }
}
