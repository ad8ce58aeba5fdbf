//! Pure Rust kernels: pyramidal dense Lucas-Kanade field, Shi-Tomasi corners,
//! a pyramidal sparse Lucas-Kanade tracker and the painter on top of
//! [`crate::image`] and [`crate::draw`].

use anyhow::{ensure, Result};
use std::cmp::Ordering;

use super::{DenseFlowParams, Disc, FeatureParams, FlowKernels, LkParams, Painter, Segment};
use crate::draw;
use crate::flow_field::FlowField;
use crate::image::{hsv_to_bgr, Image};
use crate::my_types::*;
use crate::pyramid::Pyramid;

/// Smallest side a dense flow pyramid level may have
const MIN_LEVEL_SIDE: usize = 8;

/// Deepest pyramid either tracker builds
const MAX_PYRAMID_LEVELS: usize = 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeKernels;

impl FlowKernels for NativeKernels {
    fn dense_flow(&self, prev: &Image, next: &Image, params: &DenseFlowParams) -> Result<FlowField> {
        ensure!(
            prev.same_size(next),
            "dense flow needs equally sized images, got {}x{} and {}x{}",
            prev.width,
            prev.height,
            next.width,
            next.height
        );

        let mut levels = usize::min(params.levels, MAX_PYRAMID_LEVELS);
        let min_side = usize::min(prev.width, prev.height);
        while levels > 0 && (min_side >> levels) < usize::max(params.win_size, MIN_LEVEL_SIDE) {
            levels -= 1;
        }

        let prev_pyramid = Pyramid::compute(prev, levels);
        let next_pyramid = Pyramid::compute(next, levels);
        let top = usize::min(prev_pyramid.len(), next_pyramid.len()) - 1;
        let r = params.win_size / 2;

        let mut flow: Option<FlowField> = None;
        for level in (0..=top).rev() {
            let level0 = prev_pyramid.get_image_at_level(level);
            let level1 = next_pyramid.get_image_at_level(level);
            let mut field = match flow.take() {
                Some(coarse) => upsample(&coarse, level0.width, level0.height),
                None => FlowField::zeros(level0.width, level0.height),
            };
            let (ix, iy) = scharr_gradients(level0);
            for _ in 0..params.iterations.max(1) {
                refine_dense(level0, level1, &ix, &iy, r, &mut field);
            }
            flow = Some(field);
        }

        Ok(flow.unwrap_or_else(|| FlowField::zeros(prev.width, prev.height)))
    }

    fn detect_corners(&self, gray: &Image, params: &FeatureParams) -> Result<Vec<Vector2d>> {
        let (w, h) = (gray.width, gray.height);
        if w < 3 || h < 3 {
            return Ok(vec![]);
        }

        let (ix, iy) = scharr_gradients(gray);
        let r = params.block_size / 2;
        let xx = box_sum(&products(&ix, &ix), w, h, r);
        let xy = box_sum(&products(&ix, &iy), w, h, r);
        let yy = box_sum(&products(&iy, &iy), w, h, r);
        let response: Vec<f64> = (0..w * h)
            .map(|i| min_eigenvalue(xx[i], xy[i], yy[i]))
            .collect();

        let max_response = response.iter().cloned().fold(0., f64::max);
        if max_response <= 0. {
            return Ok(vec![]);
        }
        let threshold = params.quality_level * max_response;

        let mut candidates = vec![];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let value = response[y * w + x];
                if value <= 0. || value < threshold {
                    continue;
                }
                let is_peak = (y - 1..=y + 1)
                    .all(|ny| (x - 1..=x + 1).all(|nx| response[ny * w + nx] <= value));
                if is_peak {
                    candidates.push((value, Vector2d::new(x as f64, y as f64)));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let min_distance2 = params.min_distance.powi(2);
        let mut corners: Vec<Vector2d> = vec![];
        for (_, point) in candidates {
            if params.max_corners > 0 && corners.len() >= params.max_corners {
                break;
            }
            if corners
                .iter()
                .all(|c| (c - point).norm_squared() >= min_distance2)
            {
                corners.push(point);
            }
        }
        Ok(corners)
    }

    fn track_points(
        &self,
        prev: &Image,
        next: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<Vec<Option<Vector2d>>> {
        ensure!(
            prev.same_size(next),
            "point tracking needs equally sized images, got {}x{} and {}x{}",
            prev.width,
            prev.height,
            next.width,
            next.height
        );
        // the coarsest level still has to hold a whole window
        let mut max_level = usize::min(params.max_level, MAX_PYRAMID_LEVELS);
        let min_side = usize::min(prev.width, prev.height);
        while max_level > 0 && (min_side >> max_level) < params.win_size {
            max_level -= 1;
        }
        let prev_pyramid = Pyramid::compute(prev, max_level);
        let next_pyramid = Pyramid::compute(next, max_level);
        let mut tracker = PointTracker::new(params);
        Ok(points
            .iter()
            .map(|p| tracker.track(&prev_pyramid, &next_pyramid, *p))
            .collect())
    }
}

impl Painter for NativeKernels {
    fn bgr_to_gray(&self, frame: &ColorImage) -> Result<Image> {
        Ok(Image::from_bgr(frame))
    }

    fn gray_to_bgr(&self, gray: &Image) -> Result<ColorImage> {
        Ok(gray.to_bgr())
    }

    fn hsv_to_bgr(&self, hsv: &ColorImage) -> Result<ColorImage> {
        let mut bgr = hsv.clone();
        for mut pixel in bgr.lanes_mut(ndarray::Axis(2)) {
            let converted = hsv_to_bgr(pixel[0], pixel[1], pixel[2]);
            for (c, value) in converted.into_iter().enumerate() {
                pixel[c] = value;
            }
        }
        Ok(bgr)
    }

    fn remap(&self, src: &Image, map: &FlowField) -> Result<Image> {
        Ok(Image::from_fn(map.width(), map.height(), |x, y| {
            let at = map.get(x, y);
            src.bilinear(at.x as f64, at.y as f64).round() as u8
        }))
    }

    fn draw_lines(&self, image: &mut ColorImage, lines: &[Segment], thickness: i64) -> Result<()> {
        for segment in lines {
            draw::line(image, segment.from, segment.to, segment.color, thickness);
        }
        Ok(())
    }

    fn draw_discs(&self, image: &mut ColorImage, discs: &[Disc], radius: i64) -> Result<()> {
        for disc in discs {
            if disc.center.iter().all(|v| v.is_finite()) {
                draw::filled_circle(image, disc.center, radius, disc.color);
            }
        }
        Ok(())
    }

    fn add(&self, a: &ColorImage, b: &ColorImage) -> Result<ColorImage> {
        ensure!(
            a.dim() == b.dim(),
            "cannot add frames of shape {:?} and {:?}",
            a.dim(),
            b.dim()
        );
        Ok(draw::add_saturating(a, b))
    }
}

/// Scratch buffers for tracking one point at a time
struct PointTracker<'p> {
    params: &'p LkParams,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl<'p> PointTracker<'p> {
    fn new(params: &'p LkParams) -> Self {
        let n = params.win_size;
        Self {
            params,
            ix: Matrixd::zeros(n, n),
            iy: Matrixd::zeros(n, n),
            it: Matrixd::zeros(n, n),
            grid: Matrixd::zeros(n + 2, n + 2),
        }
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn track(&mut self, prev: &Pyramid, next: &Pyramid, point: Vector2d) -> Option<Vector2d> {
        if !inside(prev.image, point) {
            return None;
        }
        let r = usize::max(self.params.win_size, 3) / 2;
        let area = ((2 * r + 1) * (2 * r + 1)) as f64;
        let epsilon2 = self.params.epsilon.powi(2);
        let top = usize::min(prev.len(), next.len()) - 1;
        let top = usize::min(top, self.params.max_level);

        // guess carried down from the coarser levels
        let mut g = Vector2d::zeros();
        let mut d = Vector2d::zeros();
        for level in (0..=top).rev() {
            let level0 = prev.get_image_at_level(level);
            let level1 = next.get_image_at_level(level);
            let u = point / u32::pow(2, level as u32) as f64;

            fill_grid(level0, u, r + 1, &mut self.grid);
            scharr(&self.grid, &mut self.ix, &mut self.iy);
            let gradient = spatial_gradient(&self.ix, &self.iy);
            if gradient.symmetric_eigenvalues().min() / area < self.params.min_eig {
                return None;
            }
            let inverse = gradient.try_inverse()?;

            let mut nu = Vector2d::zeros();
            for _ in 0..self.params.max_iters {
                image_difference(&self.grid, r, level1, u + g + nu, &mut self.it);
                let eta = inverse * mismatch(&self.ix, &self.iy, &self.it);
                if !eta.iter().all(|v| v.is_finite()) {
                    return None;
                }
                nu += eta;
                if eta.norm_squared() < epsilon2 {
                    break;
                }
            }

            d = nu;
            if level > 0 {
                g = 2. * (g + d);
            }
        }

        let tracked = point + g + d;
        if inside(prev.image, tracked) {
            Some(tracked)
        } else {
            None
        }
    }
}

fn inside(image: &Image, p: Vector2d) -> bool {
    p.x >= 0. && p.y >= 0. && p.x <= (image.width as f64 - 1.) && p.y <= (image.height as f64 - 1.)
}

/// Bilinear samples of `level` on a (2r+1) square grid centered at `center`
fn fill_grid(level: &Image, center: Vector2d, r: usize, grid: &mut Matrixd) {
    let n = 2 * r + 1;
    if grid.nrows() != n || grid.ncols() != n {
        *grid = Matrixd::zeros(n, n);
    }
    let r = r as f64;
    for y in 0..n {
        for x in 0..n {
            grid[(y, x)] = level.bilinear(center.x + x as f64 - r, center.y + y as f64 - r);
        }
    }
}

/// temporal difference between the padded previous window and `level`
/// sampled around `center`
fn image_difference(i0: &Matrixd, r: usize, level: &Image, center: Vector2d, it: &mut Matrixd) {
    fill_grid(level, center, r, it);
    *it *= -1.;
    *it += i0.slice((1, 1), (it.nrows(), it.ncols()));
}

fn mismatch(ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Vector2d {
    let mut b = Vector2d::zeros();
    for y in 0..it.nrows() {
        for x in 0..it.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }
    b
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(grid: &Matrixd, out_x: &mut Matrixd, out_y: &mut Matrixd) {
    let rows = grid.nrows() - 2;
    let cols = grid.ncols() - 2;
    if out_x.shape() != (rows, cols) {
        *out_x = Matrixd::zeros(rows, cols);
        *out_y = Matrixd::zeros(rows, cols);
    }
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

/// Scharr derivatives of a whole image, borders replicated
fn scharr_gradients(image: &Image) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = (image.width as i64, image.height as i64);
    let mut gx = Vec::with_capacity(image.data.len());
    let mut gy = Vec::with_capacity(image.data.len());
    let v = |x: i64, y: i64| image.value_clamped(x, y) as f32;
    for y in 0..h {
        for x in 0..w {
            gx.push(
                (10. * (v(x + 1, y) - v(x - 1, y)) + 3. * (v(x + 1, y + 1) - v(x - 1, y + 1))
                    + 3. * (v(x + 1, y - 1) - v(x - 1, y - 1)))
                    / 32.,
            );
            gy.push(
                (10. * (v(x, y + 1) - v(x, y - 1)) + 3. * (v(x + 1, y + 1) - v(x + 1, y - 1))
                    + 3. * (v(x - 1, y + 1) - v(x - 1, y - 1)))
                    / 32.,
            );
        }
    }
    (gx, gy)
}

fn products(a: &[f32], b: &[f32]) -> Vec<f64> {
    a.iter().zip(b).map(|(a, b)| (*a as f64) * (*b as f64)).collect()
}

/// Sum over the (2r+1) square around every pixel, clipped at the borders
fn box_sum(values: &[f64], w: usize, h: usize, r: usize) -> Vec<f64> {
    // integral image with a zero row and column in front
    let stride = w + 1;
    let mut integral = vec![0.; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0.;
        for x in 0..w {
            row += values[y * w + x];
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }

    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = usize::min(y + r + 1, h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = usize::min(x + r + 1, w);
            out.push(
                integral[y1 * stride + x1] - integral[y0 * stride + x1] - integral[y1 * stride + x0]
                    + integral[y0 * stride + x0],
            );
        }
    }
    out
}

fn min_eigenvalue(xx: f64, xy: f64, yy: f64) -> f64 {
    let half_trace = (xx + yy) / 2.;
    let half_diff = (xx - yy) / 2.;
    half_trace - (half_diff * half_diff + xy * xy).sqrt()
}

/// Nearest neighbour upsampling of a coarser field, vectors scaled to the
/// finer resolution
fn upsample(coarse: &FlowField, width: usize, height: usize) -> FlowField {
    let sx = coarse.width() as f64 / width as f64;
    let sy = coarse.height() as f64 / height as f64;
    FlowField::from_fn(width, height, |x, y| {
        let m = coarse.get_clamped((x as f64 * sx) as i64, (y as f64 * sy) as i64);
        Vector2f::new(m.x / sx as f32, m.y / sy as f32)
    })
}

/// One Lucas-Kanade update of every vector in `field`
fn refine_dense(prev: &Image, next: &Image, ix: &[f32], iy: &[f32], r: usize, field: &mut FlowField) {
    let (w, h) = (prev.width, prev.height);
    let n = w * h;
    let mut xx = vec![0.; n];
    let mut xy = vec![0.; n];
    let mut yy = vec![0.; n];
    let mut xt = vec![0.; n];
    let mut yt = vec![0.; n];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let m = field.get(x, y);
            let warped = next.bilinear(x as f64 + m.x as f64, y as f64 + m.y as f64);
            let t = warped - prev.value(x, y) as f64;
            let (gx, gy) = (ix[i] as f64, iy[i] as f64);
            xx[i] = gx * gx;
            xy[i] = gx * gy;
            yy[i] = gy * gy;
            xt[i] = gx * t;
            yt[i] = gy * t;
        }
    }
    let xx = box_sum(&xx, w, h, r);
    let xy = box_sum(&xy, w, h, r);
    let yy = box_sum(&yy, w, h, r);
    let xt = box_sum(&xt, w, h, r);
    let yt = box_sum(&yt, w, h, r);

    let area = ((2 * r + 1) * (2 * r + 1)) as f64;
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            // skip flat or edge-only neighbourhoods
            if min_eigenvalue(xx[i], xy[i], yy[i]) / area < 1e-2 {
                continue;
            }
            let det = xx[i] * yy[i] - xy[i] * xy[i];
            let du = -(yy[i] * xt[i] - xy[i] * yt[i]) / det;
            let dv = -(xx[i] * yt[i] - xy[i] * xt[i]) / det;
            if du.is_finite() && dv.is_finite() {
                let m = field.get(x, y);
                field.set(x, y, m + Vector2f::new(du as f32, dv as f32));
            }
        }
    }
}
