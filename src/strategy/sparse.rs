//! Lucas-Kanade feature tracking with persistent motion trails.

use anyhow::{ensure, Context, Result};
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::rc::Rc;
use tracing::{debug, warn};

use super::{ensure_same_size, FlowStrategy, StrategyKind};
use crate::error::SessionError;
use crate::image::Image;
use crate::kernels::{Disc, FeatureParams, FlowKernels, LkParams, Painter, Segment};
use crate::my_types::*;

const TRAIL_THICKNESS: i64 = 2;
const MARKER_RADIUS: i64 = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPoint {
    pub position: Vector2d,
    pub color: Bgr,
}

pub struct LucasKanadeFlow {
    kernels: Rc<dyn FlowKernels>,
    painter: Rc<dyn Painter>,
    features: FeatureParams,
    lk: LkParams,
    rng: Xoshiro256PlusPlus,
    prev: Option<Image>,
    points: Vec<TrackedPoint>,
    /// Segments drawn so far. Only a new first frame clears it.
    trail: ColorImage,
    reported_empty: bool,
}

impl LucasKanadeFlow {
    pub fn new(
        kernels: Rc<dyn FlowKernels>,
        painter: Rc<dyn Painter>,
        features: FeatureParams,
        lk: LkParams,
        rng: Xoshiro256PlusPlus,
    ) -> Self {
        Self {
            kernels,
            painter,
            features,
            lk,
            rng,
            prev: None,
            points: vec![],
            trail: ColorImage::zeros((0, 0, 3)),
            reported_empty: false,
        }
    }

    pub fn tracked_points(&self) -> &[TrackedPoint] {
        &self.points
    }

    pub fn trail(&self) -> &ColorImage {
        &self.trail
    }

    fn random_color(&mut self) -> Bgr {
        [
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
        ]
    }
}

impl FlowStrategy for LucasKanadeFlow {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LucasKanade
    }

    fn set_first_frame(&mut self, frame: &Frame) -> Result<()> {
        let gray = self.painter.bgr_to_gray(frame)?;
        let corners = self
            .kernels
            .detect_corners(&gray, &self.features)
            .context("corner detection failed")?;

        self.points.clear();
        for position in corners {
            let color = self.random_color();
            self.points.push(TrackedPoint { position, color });
        }
        self.trail = ColorImage::zeros(frame.raw_dim());
        self.reported_empty = false;
        self.prev = Some(gray);
        debug!("tracking {} features", self.points.len());
        Ok(())
    }

    fn apply(&mut self, frame: &Frame) -> Result<ColorImage> {
        let prev = self
            .prev
            .as_ref()
            .ok_or(SessionError::NotPrimed(StrategyKind::LucasKanade.token()))?;
        ensure_same_size(prev, frame)?;
        let gray = self.painter.bgr_to_gray(frame)?;
        let mut canvas = frame.clone();

        if !self.points.is_empty() {
            let positions: Vec<Vector2d> = self.points.iter().map(|p| p.position).collect();
            let tracked = self
                .kernels
                .track_points(prev, &gray, &positions, &self.lk)
                .context("point tracking failed")?;
            ensure!(
                tracked.len() == positions.len(),
                "tracker returned {} results for {} points",
                tracked.len(),
                positions.len()
            );

            let before = self.points.len();
            let mut survivors = Vec::with_capacity(before);
            let mut segments = Vec::with_capacity(before);
            let mut markers = Vec::with_capacity(before);
            for (point, new_position) in self.points.iter().zip(tracked) {
                // lost points are gone until the next first frame
                let Some(new_position) = new_position else {
                    continue;
                };
                segments.push(Segment {
                    from: point.position,
                    to: new_position,
                    color: point.color,
                });
                markers.push(Disc {
                    center: new_position,
                    color: point.color,
                });
                survivors.push(TrackedPoint {
                    position: new_position,
                    color: point.color,
                });
            }
            self.painter
                .draw_lines(&mut self.trail, &segments, TRAIL_THICKNESS)?;
            self.painter
                .draw_discs(&mut canvas, &markers, MARKER_RADIUS)?;
            if survivors.len() < before {
                debug!("lost {} of {} features", before - survivors.len(), before);
            }
            self.points = survivors;
        }

        if self.points.is_empty() && !self.reported_empty {
            warn!("no features left to track, select the mode again to reseed");
            self.reported_empty = true;
        }

        let result = self.painter.add(&canvas, &self.trail)?;
        self.prev = Some(gray);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_kernels::*;
    use super::*;
    use crate::kernels::native::NativeKernels;
    use rand::SeedableRng;

    fn corners() -> Vec<Vector2d> {
        vec![
            Vector2d::new(10., 10.),
            Vector2d::new(20., 12.),
            Vector2d::new(30., 14.),
            Vector2d::new(40., 16.),
        ]
    }

    fn strategy(kernels: &Rc<StubKernels>, seed: u64) -> LucasKanadeFlow {
        LucasKanadeFlow::new(
            kernels.clone(),
            Rc::new(NativeKernels),
            FeatureParams::default(),
            LkParams::default(),
            Xoshiro256PlusPlus::seed_from_u64(seed),
        )
    }

    #[test]
    fn test_lost_points_stay_lost() {
        let kernels = Rc::new(StubKernels::new(Vector2f::new(1., 1.), corners()));
        let mut lk = strategy(&kernels, 1);
        let frame = Frame::zeros((32, 64, 3));
        lk.set_first_frame(&frame).unwrap();
        assert_eq!(lk.tracked_points().len(), 4);

        kernels.lose_left_of.set(15.);
        lk.apply(&frame).unwrap();
        assert_eq!(lk.tracked_points().len(), 3);

        kernels.lose_left_of.set(f64::MIN);
        for _ in 0..3 {
            lk.apply(&frame).unwrap();
        }
        let points = lk.tracked_points();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.position.x > 20.));
        assert_eq!(points[0].position, Vector2d::new(24., 16.));
    }

    #[test]
    fn test_first_frame_resets_state() {
        let kernels = Rc::new(StubKernels::new(Vector2f::new(2., 0.), corners()));
        let mut lk = strategy(&kernels, 2);
        let frame = Frame::zeros((32, 64, 3));
        lk.set_first_frame(&frame).unwrap();
        kernels.lose_left_of.set(35.);
        lk.apply(&frame).unwrap();
        assert_eq!(lk.tracked_points().len(), 1);
        assert!(lk.trail().iter().any(|&v| v > 0));

        kernels.lose_left_of.set(f64::MIN);
        lk.set_first_frame(&frame).unwrap();
        assert_eq!(kernels.detect_calls.get(), 2);
        assert_eq!(lk.tracked_points().len(), corners().len());
        assert!(lk.trail().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_trail_accumulates() {
        let kernels = Rc::new(StubKernels::new(Vector2f::new(3., 0.), vec![Vector2d::new(5., 5.)]));
        let mut lk = strategy(&kernels, 3);
        let frame = Frame::zeros((16, 40, 3));
        lk.set_first_frame(&frame).unwrap();
        let color = lk.tracked_points()[0].color;

        lk.apply(&frame).unwrap();
        let lit_after_one = lk.trail().iter().filter(|&&v| v > 0).count();
        let out = lk.apply(&frame).unwrap();
        let lit_after_two = lk.trail().iter().filter(|&&v| v > 0).count();
        assert!(lit_after_two > lit_after_one);

        // first segment is still there, marker sits at the newest position
        for c in 0..3 {
            assert_eq!(lk.trail()[(5, 6, c)], color[c]);
            assert_eq!(lk.trail()[(9, 11, c)], 0);
            assert_eq!(out[(9, 11, c)], color[c]);
        }
        assert_eq!(lk.tracked_points()[0].position, Vector2d::new(11., 5.));
    }

    #[test]
    fn test_runs_without_points() {
        let kernels = Rc::new(StubKernels::new(Vector2f::new(1., 0.), vec![]));
        let mut lk = strategy(&kernels, 4);
        let frame = gradient_frame(20, 10);
        lk.set_first_frame(&frame).unwrap();
        for _ in 0..3 {
            let out = lk.apply(&frame).unwrap();
            assert_eq!(out, frame);
        }
        assert_eq!(kernels.track_calls.get(), 0);
    }

    #[test]
    fn test_colors_follow_seed() {
        let kernels = Rc::new(StubKernels::new(Vector2f::zeros(), corners()));
        let frame = Frame::zeros((8, 8, 3));
        let colors = |seed| {
            let mut lk = strategy(&kernels, seed);
            lk.set_first_frame(&frame).unwrap();
            lk.tracked_points().iter().map(|p| p.color).collect::<Vec<_>>()
        };
        assert_eq!(colors(9), colors(9));
        assert_ne!(colors(9), colors(10));
    }
}
