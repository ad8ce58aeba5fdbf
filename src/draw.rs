//! Drawing primitives on BGR frames. Everything clips against the image, so
//! callers can pass positions that lie partly or fully outside it.

use ndarray as nd;

use crate::my_types::*;

#[inline(always)]
fn put_pixel(image: &mut ColorImage, x: i64, y: i64, color: Bgr) {
    let (height, width, _) = image.dim();
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        return;
    }
    for (c, value) in color.iter().enumerate() {
        image[(y as usize, x as usize, c)] = *value;
    }
}

/// Filled disc of radius `radius` pixels centered at `center`
pub fn filled_circle(image: &mut ColorImage, center: Vector2d, radius: i64, color: Bgr) {
    let cx = center.x.round() as i64;
    let cy = center.y.round() as i64;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Straight line segment. A thickness above one stamps a disc along the path.
pub fn line(image: &mut ColorImage, from: Vector2d, to: Vector2d, color: Bgr, thickness: i64) {
    let (height, width, _) = image.dim();
    if width == 0 || height == 0 || !from.iter().chain(to.iter()).all(|v| v.is_finite()) {
        return;
    }
    let radius = (thickness / 2).max(0);
    let margin = radius as f64 + 1.;
    let bounds = [
        -margin,
        -margin,
        width as f64 - 1. + margin,
        height as f64 - 1. + margin,
    ];
    let (from, to) = match clip_segment(from, to, bounds) {
        Some(segment) => segment,
        None => return,
    };

    // Bresenham
    let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
    let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if radius == 0 {
            put_pixel(image, x0, y0, color);
        } else {
            filled_circle(image, Vector2d::new(x0 as f64, y0 as f64), radius, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Liang-Barsky clipping of a segment against [min_x, min_y, max_x, max_y].
fn clip_segment(from: Vector2d, to: Vector2d, bounds: [f64; 4]) -> Option<(Vector2d, Vector2d)> {
    let d = to - from;
    let p = [-d.x, d.x, -d.y, d.y];
    let q = [
        from.x - bounds[0],
        bounds[2] - from.x,
        from.y - bounds[1],
        bounds[3] - from.y,
    ];
    let mut t0: f64 = 0.;
    let mut t1: f64 = 1.;
    for i in 0..4 {
        if p[i] == 0. {
            if q[i] < 0. {
                return None;
            }
            continue;
        }
        let t = q[i] / p[i];
        if p[i] < 0. {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((from + t0 * d, from + t1 * d))
}

/// Per channel saturating sum of two frames of equal shape
pub fn add_saturating(a: &ColorImage, b: &ColorImage) -> ColorImage {
    nd::Zip::from(a)
        .and(b)
        .map_collect(|&x, &y| x.saturating_add(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: Bgr = [0, 255, 0];

    fn lit(image: &ColorImage) -> usize {
        image
            .lanes(nd::Axis(2))
            .into_iter()
            .filter(|p| p.iter().any(|&v| v > 0))
            .count()
    }

    #[test]
    fn test_horizontal_line() {
        let mut image = ColorImage::zeros((5, 10, 3));
        line(
            &mut image,
            Vector2d::new(1., 2.),
            Vector2d::new(6., 2.),
            GREEN,
            1,
        );
        assert_eq!(lit(&image), 6);
        for x in 1..=6 {
            assert_eq!(image[(2, x, 1)], 255);
            assert_eq!(image[(2, x, 0)], 0);
        }
    }

    #[test]
    fn test_line_is_clipped() {
        let mut image = ColorImage::zeros((4, 4, 3));
        line(
            &mut image,
            Vector2d::new(-1e9, 1.),
            Vector2d::new(1e9, 1.),
            GREEN,
            1,
        );
        assert_eq!(lit(&image), 4);

        let mut image = ColorImage::zeros((4, 4, 3));
        line(
            &mut image,
            Vector2d::new(-10., -10.),
            Vector2d::new(-5., -20.),
            GREEN,
            2,
        );
        assert_eq!(lit(&image), 0);

        line(
            &mut image,
            Vector2d::new(f64::NAN, 0.),
            Vector2d::new(2., 2.),
            GREEN,
            1,
        );
        assert_eq!(lit(&image), 0);
    }

    #[test]
    fn test_filled_circle() {
        let mut image = ColorImage::zeros((11, 11, 3));
        filled_circle(&mut image, Vector2d::new(5., 5.), 1, GREEN);
        assert_eq!(lit(&image), 5);

        let mut image = ColorImage::zeros((11, 11, 3));
        filled_circle(&mut image, Vector2d::new(0., 0.), 2, GREEN);
        // quarter of the 13 pixel disc stays inside
        assert_eq!(lit(&image), 6);
    }

    #[test]
    fn test_add_saturating() {
        let a = ColorImage::from_elem((1, 2, 3), 200);
        let b = ColorImage::from_shape_fn((1, 2, 3), |(_, x, _)| if x == 0 { 10 } else { 100 });
        let sum = add_saturating(&a, &b);
        assert_eq!(sum[(0, 0, 0)], 210);
        assert_eq!(sum[(0, 1, 2)], 255);
    }
}
