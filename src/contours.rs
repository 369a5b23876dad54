//! External boundary tracing on binary masks

use crate::geometry::Region;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

/// Closed boundary polygon in pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
}

impl Contour {
    pub fn new(points: Vec<Point<i32>>) -> Self {
        Self { points }
    }

    /// Enclosed area of the polygon (shoelace formula)
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0i64;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            twice += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
        }
        (twice as f64).abs() / 2.0
    }

    /// Smallest axis-aligned rectangle containing every point
    pub fn bounding_box(&self) -> Option<Region> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Region::new(
            min_x.max(0) as u32,
            min_y.max(0) as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ))
    }
}

/// Trace the outermost boundaries of the non-zero regions in `mask`.
///
/// Hole borders and anything nested inside a hole are ignored.
pub fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| Contour::new(c.points))
        .collect()
}

/// Index of the contour with the largest area; the first one wins ties.
pub fn largest(contours: &[Contour]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, contour) in contours.iter().enumerate() {
        let area = contour.area();
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((i, area)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square_mask(size: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if x >= x0 && x < x0 + side && y >= y0 && y < y0 + side {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_area_of_square() {
        let c = Contour::new(vec![
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 4),
            Point::new(0, 4),
        ]);
        assert_eq!(c.area(), 16.0);
        assert_eq!(c.bounding_box(), Some(Region::new(0, 0, 5, 5)));
    }

    #[test]
    fn test_degenerate_area() {
        let c = Contour::new(vec![Point::new(2, 2), Point::new(5, 2)]);
        assert_eq!(c.area(), 0.0);
        assert_eq!(Contour::new(vec![]).bounding_box(), None);
    }

    #[test]
    fn test_empty_mask_has_no_contours() {
        let mask = GrayImage::new(20, 20);
        assert!(external_contours(&mask).is_empty());
    }

    #[test]
    fn test_single_square() {
        let mask = square_mask(20, 5, 6, 8);
        let contours = external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_box(), Some(Region::new(5, 6, 8, 8)));
    }

    #[test]
    fn test_holes_are_ignored() {
        // A ring: outer square with an inner hole, and a dot inside the hole
        let mask = GrayImage::from_fn(30, 30, |x, y| {
            let outer = (5..25).contains(&x) && (5..25).contains(&y);
            let hole = (10..20).contains(&x) && (10..20).contains(&y);
            let dot = (14..16).contains(&x) && (14..16).contains(&y);
            if (outer && !hole) || dot {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let contours = external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_box(), Some(Region::new(5, 5, 20, 20)));
    }

    #[test]
    fn test_largest_picks_biggest() {
        let mut mask = square_mask(40, 2, 2, 4);
        for y in 15..35 {
            for x in 15..35 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let contours = external_contours(&mask);
        assert_eq!(contours.len(), 2);
        let idx = largest(&contours).unwrap();
        assert_eq!(contours[idx].bounding_box(), Some(Region::new(15, 15, 20, 20)));
        assert_eq!(largest(&[]), None);
    }
}
