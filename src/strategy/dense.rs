//! Dense flow modes. All of them run the same dense field kernel between the
//! baseline and the new frame and differ only in how the field is drawn.

use anyhow::{ensure, Context, Result};
use std::rc::Rc;

use super::{ensure_same_size, FlowStrategy, StrategyKind};
use crate::error::SessionError;
use crate::flow_field::FlowField;
use crate::image::Image;
use crate::kernels::{DenseFlowParams, Disc, FlowKernels, Painter, Segment};
use crate::my_types::*;

const LINE_COLOR: Bgr = [0, 255, 0];

pub trait FlowRenderer {
    const KIND: StrategyKind;

    /// `prev` and `next` are the intensity frames the field was computed from.
    fn render(
        &self,
        painter: &dyn Painter,
        prev: &Image,
        next: &Image,
        flow: &FlowField,
    ) -> Result<ColorImage>;
}

pub struct DenseFlow<R> {
    kernels: Rc<dyn FlowKernels>,
    painter: Rc<dyn Painter>,
    params: DenseFlowParams,
    renderer: R,
    prev: Option<Image>,
}

impl<R: FlowRenderer> DenseFlow<R> {
    pub fn new(
        kernels: Rc<dyn FlowKernels>,
        painter: Rc<dyn Painter>,
        params: DenseFlowParams,
        renderer: R,
    ) -> Self {
        Self {
            kernels,
            painter,
            params,
            renderer,
            prev: None,
        }
    }
}

impl<R: FlowRenderer> FlowStrategy for DenseFlow<R> {
    fn kind(&self) -> StrategyKind {
        R::KIND
    }

    fn set_first_frame(&mut self, frame: &Frame) -> Result<()> {
        self.prev = Some(self.painter.bgr_to_gray(frame)?);
        Ok(())
    }

    fn apply(&mut self, frame: &Frame) -> Result<ColorImage> {
        let prev = self
            .prev
            .as_ref()
            .ok_or(SessionError::NotPrimed(R::KIND.token()))?;
        ensure_same_size(prev, frame)?;
        let next = self.painter.bgr_to_gray(frame)?;

        let flow = self
            .kernels
            .dense_flow(prev, &next, &self.params)
            .context("dense flow kernel failed")?;
        ensure!(
            flow.width() == next.width && flow.height() == next.height,
            "dense flow kernel returned a {}x{} field for a {}x{} frame",
            flow.width(),
            flow.height(),
            next.width,
            next.height
        );

        let result = self
            .renderer
            .render(self.painter.as_ref(), prev, &next, &flow)
            .context("rendering failed")?;
        self.prev = Some(next);
        Ok(result)
    }
}

/// Direction as hue, speed as brightness. Brightness is stretched over the
/// extremes of the current field only.
#[derive(Clone, Copy, Debug, Default)]
pub struct HsvRenderer;

impl FlowRenderer for HsvRenderer {
    const KIND: StrategyKind = StrategyKind::DenseHsv;

    fn render(
        &self,
        painter: &dyn Painter,
        _prev: &Image,
        next: &Image,
        flow: &FlowField,
    ) -> Result<ColorImage> {
        let (magnitude, angle) = flow.to_polar();
        let (min, max) = magnitude
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &m| (lo.min(m), hi.max(m)));
        let range = max - min;
        let scale = if range > f32::EPSILON { 255. / range } else { 0. };

        let hsv = ColorImage::from_shape_fn((next.height, next.width, 3), |(y, x, c)| match c {
            0 => (angle[(y, x)] / 2.) as u8,
            1 => 255,
            _ => ((magnitude[(y, x)] - min) * scale) as u8,
        });
        painter.hsv_to_bgr(&hsv)
    }
}

/// Motion segments sampled on a regular grid over the gray frame
#[derive(Clone, Copy, Debug)]
pub struct LinesRenderer {
    step: usize,
}

impl LinesRenderer {
    pub fn new(step: usize) -> Self {
        Self {
            step: step.max(1),
        }
    }

    /// Sample positions: centered in each `step` sized cell and clamped into
    /// the image, so there are ceil(width/step) * ceil(height/step) of them.
    pub fn sample_grid(&self, width: usize, height: usize) -> Vec<(usize, usize)> {
        let axis = |extent: usize| -> Vec<usize> {
            (0..(extent + self.step - 1) / self.step)
                .map(|k| usize::min(k * self.step + self.step / 2, extent - 1))
                .collect()
        };
        let xs = axis(width);
        let ys = axis(height);
        ys.iter()
            .flat_map(|&y| xs.iter().map(move |&x| (x, y)))
            .collect()
    }
}

impl Default for LinesRenderer {
    fn default() -> Self {
        Self::new(16)
    }
}

impl FlowRenderer for LinesRenderer {
    const KIND: StrategyKind = StrategyKind::DenseLines;

    fn render(
        &self,
        painter: &dyn Painter,
        _prev: &Image,
        next: &Image,
        flow: &FlowField,
    ) -> Result<ColorImage> {
        let grid = self.sample_grid(next.width, next.height);
        let mut lines = Vec::with_capacity(grid.len());
        let mut dots = Vec::with_capacity(grid.len());
        for (x, y) in grid {
            let motion = flow.get_clamped(x as i64, y as i64);
            let origin = Vector2d::new(x as f64, y as f64);
            let end = Vector2d::new(
                (x as f64 + motion.x as f64 + 0.5).floor(),
                (y as f64 + motion.y as f64 + 0.5).floor(),
            );
            lines.push(Segment {
                from: origin,
                to: end,
                color: LINE_COLOR,
            });
            dots.push(Disc {
                center: origin,
                color: LINE_COLOR,
            });
        }

        let mut image = painter.gray_to_bgr(next)?;
        painter.draw_lines(&mut image, &lines, 1)?;
        painter.draw_discs(&mut image, &dots, 1)?;
        Ok(image)
    }
}

/// Previous frame pulled backwards along the field
#[derive(Clone, Copy, Debug, Default)]
pub struct WarpRenderer;

impl FlowRenderer for WarpRenderer {
    const KIND: StrategyKind = StrategyKind::DenseWarp;

    fn render(
        &self,
        painter: &dyn Painter,
        prev: &Image,
        _next: &Image,
        flow: &FlowField,
    ) -> Result<ColorImage> {
        let map = FlowField::from_fn(prev.width, prev.height, |x, y| {
            let motion = flow.get_clamped(x as i64, y as i64);
            Vector2f::new(x as f32 - motion.x, y as f32 - motion.y)
        });
        painter.gray_to_bgr(&painter.remap(prev, &map)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_kernels::*;
    use super::*;
    use crate::image::hsv_to_bgr;
    use crate::kernels::native::NativeKernels;
    use ndarray as nd;

    fn primed<R: FlowRenderer>(flow: Vector2f, renderer: R, frame: &Frame) -> DenseFlow<R> {
        let kernels = Rc::new(StubKernels::new(flow, vec![]));
        let mut strategy = DenseFlow::new(
            kernels,
            Rc::new(NativeKernels),
            DenseFlowParams::default(),
            renderer,
        );
        strategy.set_first_frame(frame).unwrap();
        strategy
    }

    #[test]
    fn test_hsv_zero_motion_is_black() {
        let frame = gradient_frame(20, 10);
        let mut strategy = primed(Vector2f::zeros(), HsvRenderer, &frame);
        let out = strategy.apply(&gradient_frame(20, 10)).unwrap();
        assert_eq!(out.dim(), (10, 20, 3));
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_hsv_hue_and_value() {
        let next = Image::new(2, 1);
        // right moving pixel at full speed, the other still
        let flow = FlowField::from_fn(2, 1, |x, _| {
            if x == 0 {
                Vector2f::new(4., 0.)
            } else {
                Vector2f::zeros()
            }
        });
        let out = HsvRenderer.render(&NativeKernels, &next, &next, &flow).unwrap();
        assert_eq!(out.slice(nd::s![0, 0, ..]).to_vec(), vec![0, 0, 255]);
        assert_eq!(out.slice(nd::s![0, 1, ..]).to_vec(), vec![0, 0, 0]);

        // straight down is 90 degrees, hue 45, brightness normalized per frame
        let flow = FlowField::from_fn(2, 1, |x, _| {
            if x == 0 {
                Vector2f::new(0., 0.5)
            } else {
                Vector2f::new(0., 0.25)
            }
        });
        let out = HsvRenderer.render(&NativeKernels, &next, &next, &flow).unwrap();
        assert_eq!(out.slice(nd::s![0, 0, ..]).to_vec(), hsv_to_bgr(45, 255, 255).to_vec());
        assert_eq!(out.slice(nd::s![0, 1, ..]).to_vec(), vec![0, 0, 0]);
    }

    #[test]
    fn test_line_grid_cardinality() {
        for (width, height, step) in [(100, 60, 16), (64, 64, 16), (17, 5, 4), (3, 3, 16), (10, 7, 1)] {
            let renderer = LinesRenderer::new(step);
            let grid = renderer.sample_grid(width, height);
            let expected = ((width + step - 1) / step) * ((height + step - 1) / step);
            assert_eq!(grid.len(), expected, "{width}x{height} step {step}");
            assert!(grid.iter().all(|&(x, y)| x < width && y < height));
        }
        let grid = LinesRenderer::new(16).sample_grid(40, 20);
        assert_eq!(grid[0], (8, 8));
        assert_eq!(grid[2], (39, 8));
        assert_eq!(grid[3], (8, 19));
    }

    #[test]
    fn test_lines_zero_motion_marks_grid() {
        let frame = Frame::zeros((32, 32, 3));
        let mut strategy = primed(Vector2f::zeros(), LinesRenderer::new(16), &frame);
        let out = strategy.apply(&frame).unwrap();
        // each sample point gets a radius 1 dot
        let green = out
            .lanes(nd::Axis(2))
            .into_iter()
            .filter(|p| p[1] == 255)
            .count();
        assert_eq!(green, 4 * 5);
        assert_eq!(out[(8, 8, 1)], 255);
        assert_eq!(out[(0, 0, 1)], 0);
    }

    #[test]
    fn test_lines_draws_displacement() {
        let frame = Frame::zeros((16, 16, 3));
        let mut strategy = primed(Vector2f::new(5., 0.), LinesRenderer::new(16), &frame);
        let out = strategy.apply(&frame).unwrap();
        for x in 8..=13 {
            assert_eq!(out[(8, x, 1)], 255);
        }
        assert_eq!(out[(8, 14, 1)], 0);
    }

    #[test]
    fn test_warp_zero_motion_is_identity() {
        let frame0 = gradient_frame(24, 18);
        let frame1 = Frame::zeros((18, 24, 3));
        let mut strategy = primed(Vector2f::zeros(), WarpRenderer, &frame0);
        let out = strategy.apply(&frame1).unwrap();
        assert_eq!(out, Image::from_bgr(&frame0).to_bgr());
    }

    #[test]
    fn test_warp_shifts_previous_frame() {
        let prev = Image::from_fn(8, 4, |x, _| (x * 10) as u8);
        let flow = FlowField::from_fn(8, 4, |_, _| Vector2f::new(2., 0.));
        let out = WarpRenderer.render(&NativeKernels, &prev, &prev, &flow).unwrap();
        assert_eq!(out[(1, 5, 0)], 30);
        // clamped at the left border
        assert_eq!(out[(1, 0, 0)], 0);
        assert_eq!(out[(1, 1, 2)], 0);
    }

    #[test]
    fn test_first_frame_replaces_baseline() {
        let a = Frame::from_elem((10, 14, 3), 40);
        let b = Frame::from_elem((10, 14, 3), 120);
        let c = gradient_frame(14, 10);
        let mut strategy = primed(Vector2f::zeros(), WarpRenderer, &a);
        strategy.apply(&b).unwrap();
        strategy.set_first_frame(&c).unwrap();
        let out = strategy.apply(&b).unwrap();
        assert_eq!(out, Image::from_bgr(&c).to_bgr());
    }

    #[test]
    fn test_baseline_advances() {
        let frame0 = gradient_frame(12, 12);
        let frame1 = Frame::from_elem((12, 12, 3), 90);
        let frame2 = Frame::from_elem((12, 12, 3), 10);
        let mut strategy = primed(Vector2f::zeros(), WarpRenderer, &frame0);
        strategy.apply(&frame1).unwrap();
        let out = strategy.apply(&frame2).unwrap();
        // warp with zero motion shows the baseline, which is now frame1
        assert!(out.iter().all(|&v| v == 90));
    }
}
