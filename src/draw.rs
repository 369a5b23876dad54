//! Overlay drawing on display buffers

use crate::contours::Contour;
use crate::geometry::Region;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_hollow_circle_mut, draw_hollow_ellipse_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

/// Reset `display` to a copy of `source`, reusing its allocation when possible.
pub fn reset_display(display: &mut RgbImage, source: &RgbImage) {
    display.clone_from(source);
}

/// Two-pixel box drawn just inside `region`
pub fn draw_box(canvas: &mut RgbImage, region: Region, color: Rgb<u8>) {
    draw_hollow_rect_mut(canvas, region.to_rect(), color);
    if region.width > 2 && region.height > 2 {
        let inner = Rect::at(region.x as i32 + 1, region.y as i32 + 1)
            .of_size(region.width - 2, region.height - 2);
        draw_hollow_rect_mut(canvas, inner, color);
    }
}

/// Ellipse inscribed in `region`
pub fn draw_ellipse(canvas: &mut RgbImage, region: Region, color: Rgb<u8>) {
    let center = (
        (region.x + region.width / 2) as i32,
        (region.y + region.height / 2) as i32,
    );
    let (rx, ry) = ((region.width / 2) as i32, (region.height / 2) as i32);
    draw_hollow_ellipse_mut(canvas, center, rx, ry, color);
    if rx > 1 && ry > 1 {
        draw_hollow_ellipse_mut(canvas, center, rx - 1, ry - 1, color);
    }
}

/// Circle centred on `region` with radius a quarter of its summed sides
pub fn draw_circle(canvas: &mut RgbImage, region: Region, color: Rgb<u8>) {
    let center = (
        (region.x + region.width / 2) as i32,
        (region.y + region.height / 2) as i32,
    );
    let radius = ((region.width + region.height) as f32 * 0.25).round() as i32;
    draw_hollow_circle_mut(canvas, center, radius.max(1), color);
}

/// Closed polyline through `points`
pub fn draw_polygon(canvas: &mut RgbImage, points: &[(f32, f32)], color: Rgb<u8>) {
    if points.len() < 2 {
        return;
    }
    let (width, height) = canvas.dimensions();
    for (i, &start) in points.iter().enumerate() {
        let end = points[(i + 1) % points.len()];
        let shifted = ((start.0 + 1.0, start.1), (end.0 + 1.0, end.1));
        for (a, b) in [(start, end), shifted] {
            if let Some((a, b)) = clip_segment(a, b, width, height) {
                draw_line_segment_mut(canvas, a, b, color);
            }
        }
    }
}

/// Liang-Barsky clip of a segment to the canvas pixel grid; `None` when it misses.
fn clip_segment(
    start: (f32, f32),
    end: (f32, f32),
    width: u32,
    height: u32,
) -> Option<((f32, f32), (f32, f32))> {
    if ![start.0, start.1, end.0, end.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (start.0 as f64, start.1 as f64);
    let (dx, dy) = (end.0 as f64 - x0, end.1 as f64 - y0);
    let (x_max, y_max) = (width as f64 - 1.0, height as f64 - 1.0);

    let mut t_enter: f64 = 0.0;
    let mut t_exit: f64 = 1.0;
    for (p, q) in [(-dx, x0), (dx, x_max - x0), (-dy, y0), (dy, y_max - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t_enter = t_enter.max(t);
        } else {
            t_exit = t_exit.min(t);
        }
        if t_enter > t_exit {
            return None;
        }
    }

    let at = |t: f64| ((x0 + t * dx) as f32, (y0 + t * dy) as f32);
    Some((at(t_enter), at(t_exit)))
}

/// Contour outline, 2 px
pub fn draw_contour(canvas: &mut RgbImage, contour: &Contour, color: Rgb<u8>) {
    let points: Vec<(f32, f32)> = contour
        .points
        .iter()
        .map(|p| (p.x as f32, p.y as f32))
        .collect();
    if points.len() == 1 {
        let (x, y) = (points[0].0 as u32, points[0].1 as u32);
        if x < canvas.width() && y < canvas.height() {
            canvas.put_pixel(x, y, color);
        }
        return;
    }
    draw_polygon(canvas, &points, color);
}
