use image::{imageops, RgbImage};

/// Axis-aligned rectangle in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region covering a whole `width` x `height` buffer
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// True when the region lies inside a `width` x `height` buffer
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Shift a region found inside `self` back into the outer coordinate frame
    pub fn translate_from(&self, inner: Region) -> Region {
        Region::new(self.x + inner.x, self.y + inner.y, inner.width, inner.height)
    }

    /// Clamp to a `width` x `height` buffer. Returns `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Region::new(self.x, self.y, w, h))
    }

    pub fn to_rect(&self) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(self.x as i32, self.y as i32).of_size(self.width, self.height)
    }
}

/// Copy `region` out of `image` into a fresh buffer.
///
/// The region is clamped to the image first so a crop never reads out of bounds.
pub fn crop(image: &RgbImage, region: Region) -> RgbImage {
    match region.clamp_to(image.width(), image.height()) {
        Some(r) => imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image(),
        None => RgbImage::new(0, 0),
    }
}

/// Result shared by the detect / edge / segment operations
#[derive(Debug, Clone)]
pub enum Extraction {
    /// Nothing was found; holds an unmodified copy of the source
    PassThrough(RgbImage),
    /// A subject was found and cropped out of the source
    Found { region: Region, crop: RgbImage },
}

impl Extraction {
    pub(crate) fn found(source: &RgbImage, region: Region) -> Self {
        Extraction::Found {
            region,
            crop: crop(source, region),
        }
    }

    /// The image handed back to the caller: the crop, or the whole source.
    pub fn crop(&self) -> &RgbImage {
        match self {
            Extraction::PassThrough(image) => image,
            Extraction::Found { crop, .. } => crop,
        }
    }

    pub fn into_crop(self) -> RgbImage {
        match self {
            Extraction::PassThrough(image) => image,
            Extraction::Found { crop, .. } => crop,
        }
    }

    pub fn region(&self) -> Option<Region> {
        match self {
            Extraction::PassThrough(_) => None,
            Extraction::Found { region, .. } => Some(*region),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Extraction::Found { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_clamp_and_fit() {
        let r = Region::new(8, 8, 10, 10);
        assert!(!r.fits_within(12, 12));
        assert_eq!(r.clamp_to(12, 12), Some(Region::new(8, 8, 4, 4)));
        assert_eq!(Region::new(12, 0, 3, 3).clamp_to(12, 12), None);
        assert!(Region::full(12, 12).fits_within(12, 12));
    }

    #[test]
    fn test_translate_from() {
        let outer = Region::new(10, 20, 50, 50);
        let inner = Region::new(5, 6, 7, 8);
        assert_eq!(outer.translate_from(inner), Region::new(15, 26, 7, 8));
    }

    #[test]
    fn test_crop_copies_pixels() {
        let image = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let out = crop(&image, Region::new(3, 4, 2, 2));
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(out.get_pixel(0, 0), &Rgb([3, 4, 0]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([4, 5, 0]));
    }

    #[test]
    fn test_extraction_accessors() {
        let image = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let pass = Extraction::PassThrough(image.clone());
        assert!(!pass.is_found());
        assert_eq!(pass.region(), None);
        assert_eq!(pass.crop(), &image);

        let found = Extraction::found(&image, Region::new(1, 1, 2, 3));
        assert!(found.is_found());
        assert_eq!(found.crop().dimensions(), (2, 3));
    }
}
