//! Overlay shapes on RGB frames, drawn with `imageproc`.
//!
//! Shapes may lie partly or entirely off-canvas. Segments are clipped to the
//! image before rasterization, so far-away endpoints cost nothing.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point as Vertex;

/// Integer drawing coordinate. May lie outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

type Xy = (f64, f64);

/// Liang-Barsky clip of `a`-`b` against the image grown by `margin` pixels.
fn clip_segment(image: &RgbImage, a: Xy, b: Xy, margin: f64) -> Option<(Xy, Xy)> {
    let x_max = f64::from(image.width()) - 1.0 + margin;
    let y_max = f64::from(image.height()) - 1.0 + margin;
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);

    for (p, q) in [
        (-dx, a.0 + margin),
        (dx, x_max - a.0),
        (-dy, a.1 + margin),
        (dy, y_max - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some(((a.0 + t0 * dx, a.1 + t0 * dy), (a.0 + t1 * dx, a.1 + t1 * dy)))
}

fn rounded(p: Xy) -> (i32, i32) {
    (p.0.round() as i32, p.1.round() as i32)
}

fn as_f32(p: Xy) -> (f32, f32) {
    (p.0 as f32, p.1 as f32)
}

/// Draw a segment `thickness` pixels wide with round caps.
pub fn draw_line(image: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>, thickness: u32) {
    let thickness = thickness.max(1);
    let half = f64::from(thickness) / 2.0;
    let a = (f64::from(from.x), f64::from(from.y));
    let b = (f64::from(to.x), f64::from(to.y));
    let Some((a, b)) = clip_segment(image, a, b, half + 1.0) else {
        return;
    };

    if thickness == 1 {
        draw_line_segment_mut(image, as_f32(a), as_f32(b), color);
        return;
    }

    let cap = (thickness / 2) as i32;
    draw_filled_circle_mut(image, rounded(a), cap, color);
    draw_filled_circle_mut(image, rounded(b), cap, color);

    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = dx.hypot(dy);
    if length < f64::EPSILON {
        return;
    }
    let (nx, ny) = (-dy / length * half, dx / length * half);
    let corners = [
        (a.0 + nx, a.1 + ny),
        (b.0 + nx, b.1 + ny),
        (b.0 - nx, b.1 - ny),
        (a.0 - nx, a.1 - ny),
    ]
    .map(|corner| {
        let (x, y) = rounded(corner);
        Vertex::new(x, y)
    });
    // The polygon must not close on itself.
    if corners[0] == corners[3] {
        draw_line_segment_mut(image, as_f32(a), as_f32(b), color);
    } else {
        draw_polygon_mut(image, &corners, color);
    }
}

/// Draw a circle outline of `radius` with a stroke `thickness` pixels wide.
pub fn draw_ring(image: &mut RgbImage, center: Point, radius: u32, color: Rgb<u8>, thickness: u32) {
    let thickness = thickness.max(1);
    let outer = i64::from(radius) + i64::from(thickness / 2);
    let inner = i64::from(radius) - i64::from(thickness.div_ceil(2));
    let (cx, cy) = (i64::from(center.x), i64::from(center.y));
    if cx + outer < 0
        || cy + outer < 0
        || cx - outer >= i64::from(image.width())
        || cy - outer >= i64::from(image.height())
    {
        return;
    }

    if thickness == 1 {
        if let Ok(radius) = i32::try_from(radius) {
            draw_hollow_circle_mut(image, (center.x, center.y), radius, color);
        }
        return;
    }

    // Stroke mask: the outer disc minus the inner one.
    let (Ok(size), Ok(mask_center)) = (u32::try_from(2 * outer + 1), i32::try_from(outer)) else {
        return;
    };
    let mut mask = GrayImage::new(size, size);
    draw_filled_circle_mut(&mut mask, (mask_center, mask_center), mask_center, Luma([255]));
    if let Ok(inner) = i32::try_from(inner) {
        draw_filled_circle_mut(&mut mask, (mask_center, mask_center), inner, Luma([0]));
    }

    let (width, height) = (i64::from(image.width()), i64::from(image.height()));
    for (x, y, value) in mask.enumerate_pixels() {
        if value.0[0] == 0 {
            continue;
        }
        let px = cx + i64::from(x) - outer;
        let py = cy + i64::from(y) - outer;
        if (0..width).contains(&px) && (0..height).contains(&py) {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn painted(image: &RgbImage) -> usize {
        image.pixels().filter(|p| p.0 != [0, 0, 0]).count()
    }

    #[test]
    fn test_horizontal_line() {
        let mut image = RgbImage::new(20, 10);
        draw_line(&mut image, Point::new(2, 5), Point::new(12, 5), RED, 2);
        assert_eq!(*image.get_pixel(2, 5), RED);
        assert_eq!(*image.get_pixel(12, 5), RED);
        assert_eq!(*image.get_pixel(7, 4), RED);
        assert_eq!(*image.get_pixel(7, 6), RED);
        assert_eq!(*image.get_pixel(7, 8), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(15, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_thin_line() {
        let mut image = RgbImage::new(10, 10);
        draw_line(&mut image, Point::new(0, 0), Point::new(9, 9), RED, 1);
        assert!((0..10).all(|i| *image.get_pixel(i, i) == RED));
        assert_eq!(painted(&image), 10);
    }

    #[test]
    fn test_ring_leaves_center_empty() {
        let mut image = RgbImage::new(32, 32);
        draw_ring(&mut image, Point::new(16, 16), 5, RED, 2);
        assert_eq!(*image.get_pixel(16, 11), RED);
        assert_eq!(*image.get_pixel(21, 16), RED);
        assert_eq!(*image.get_pixel(16, 16), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(16, 14), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(16, 8), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_shapes_are_clipped() {
        let mut image = RgbImage::new(16, 16);
        draw_ring(&mut image, Point::new(-100, -100), 5, RED, 2);
        draw_line(&mut image, Point::new(-50, 40), Point::new(-10, 90), RED, 2);
        draw_line(&mut image, Point::new(i32::MIN, 8), Point::new(i32::MIN + 1, 9), RED, 2);
        assert_eq!(painted(&image), 0);

        draw_ring(&mut image, Point::new(0, 0), 5, RED, 2);
        draw_line(&mut image, Point::new(-5, 8), Point::new(i32::MAX, 8), RED, 2);
        assert!(painted(&image) > 0);
        assert_eq!(*image.get_pixel(15, 8), RED);
        assert_eq!(*image.get_pixel(0, 8), RED);
    }

    #[test]
    fn test_degenerate_line_is_a_dot() {
        let mut image = RgbImage::new(8, 8);
        draw_line(&mut image, Point::new(4, 4), Point::new(4, 4), RED, 2);
        assert_eq!(*image.get_pixel(4, 4), RED);
        assert!((1..=9).contains(&painted(&image)));
    }
}
