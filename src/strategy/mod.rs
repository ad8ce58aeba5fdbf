//! Visualization modes. Every mode is a [`FlowStrategy`]: it is primed with a
//! first frame and then turns each following frame into a rendered image,
//! carrying its own baseline from one call to the next.

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fmt;
use std::rc::Rc;

use crate::error::SessionError;
use crate::image::{frame_size, Image};
use crate::kernels::{DenseFlowParams, FeatureParams, FlowKernels, LkParams, Painter};
use crate::my_types::*;

pub mod dense;
pub mod sparse;

use dense::{DenseFlow, HsvRenderer, LinesRenderer, WarpRenderer};
use sparse::LucasKanadeFlow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    DenseHsv,
    DenseLines,
    DenseWarp,
    LucasKanade,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::DenseHsv,
        StrategyKind::DenseLines,
        StrategyKind::DenseWarp,
        StrategyKind::LucasKanade,
    ];

    pub fn token(self) -> &'static str {
        match self {
            StrategyKind::DenseHsv => "dense_hsv",
            StrategyKind::DenseLines => "dense_lines",
            StrategyKind::DenseWarp => "dense_warp",
            StrategyKind::LucasKanade => "lucas_kanade",
        }
    }

    /// Unknown tokens select the line renderer.
    pub fn from_token(token: &str) -> Self {
        match token {
            "dense_hsv" => StrategyKind::DenseHsv,
            "dense_lines" => StrategyKind::DenseLines,
            "dense_warp" => StrategyKind::DenseWarp,
            "lucas_kanade" | "lucas_kande" => StrategyKind::LucasKanade,
            _ => StrategyKind::DenseLines,
        }
    }

    /// Mode selected by the keys `1` to `4`
    pub fn from_key(key: i32) -> Option<Self> {
        let index = key - '1' as i32;
        if (0..4).contains(&index) {
            Some(Self::ALL[index as usize])
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::DenseHsv => "Dense_by_hsv",
            StrategyKind::DenseLines => "Dense_by_lines",
            StrategyKind::DenseWarp => "Dense_by_warp",
            StrategyKind::LucasKanade => "Lucas-Kanade",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

pub trait FlowStrategy {
    fn kind(&self) -> StrategyKind;

    /// Make `frame` the baseline and drop everything accumulated so far.
    fn set_first_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Render the motion from the baseline to `frame`, then make `frame` the
    /// new baseline. The returned image has the size of `frame`.
    fn apply(&mut self, frame: &Frame) -> Result<ColorImage>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrategyParams {
    pub dense: DenseFlowParams,
    pub features: FeatureParams,
    pub lk: LkParams,
    /// grid stride of the line renderer, in pixels
    pub line_step: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            dense: DenseFlowParams::default(),
            features: FeatureParams::default(),
            lk: LkParams::default(),
            line_step: 16,
        }
    }
}

/// Builds unprimed strategies. Sparse strategies draw their trail colors from
/// a generator forked off the factory seed, so runs with the same seed paint
/// the same colors.
pub struct StrategyFactory {
    kernels: Rc<dyn FlowKernels>,
    painter: Rc<dyn Painter>,
    params: StrategyParams,
    rng: Xoshiro256PlusPlus,
}

impl StrategyFactory {
    pub fn new(
        kernels: Rc<dyn FlowKernels>,
        painter: Rc<dyn Painter>,
        params: StrategyParams,
        seed: u64,
    ) -> Self {
        Self {
            kernels,
            painter,
            params,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn create(&mut self, kind: StrategyKind) -> Box<dyn FlowStrategy> {
        let kernels = self.kernels.clone();
        let painter = self.painter.clone();
        let dense = self.params.dense;
        match kind {
            StrategyKind::DenseHsv => {
                Box::new(DenseFlow::new(kernels, painter, dense, HsvRenderer))
            }
            StrategyKind::DenseLines => Box::new(DenseFlow::new(
                kernels,
                painter,
                dense,
                LinesRenderer::new(self.params.line_step),
            )),
            StrategyKind::DenseWarp => {
                Box::new(DenseFlow::new(kernels, painter, dense, WarpRenderer))
            }
            StrategyKind::LucasKanade => {
                let rng = Xoshiro256PlusPlus::seed_from_u64(self.rng.gen());
                Box::new(LucasKanadeFlow::new(
                    kernels,
                    painter,
                    self.params.features,
                    self.params.lk,
                    rng,
                ))
            }
        }
    }

    pub fn create_from_token(&mut self, token: &str) -> Box<dyn FlowStrategy> {
        self.create(StrategyKind::from_token(token))
    }
}

fn ensure_same_size(baseline: &Image, frame: &Frame) -> Result<(), SessionError> {
    let (got_width, got_height) = frame_size(frame);
    if got_width != baseline.width || got_height != baseline.height {
        return Err(SessionError::FrameSizeMismatch {
            width: baseline.width,
            height: baseline.height,
            got_width,
            got_height,
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_kernels::*;
    use super::*;
    use crate::kernels::native::NativeKernels;

    fn factory() -> StrategyFactory {
        let kernels = Rc::new(StubKernels::new(
            Vector2f::new(1., 0.),
            vec![Vector2d::new(5., 5.), Vector2d::new(20., 10.)],
        ));
        StrategyFactory::new(kernels, Rc::new(NativeKernels), StrategyParams::default(), 7)
    }

    #[test]
    fn test_tokens() {
        for kind in StrategyKind::ALL {
            assert_eq!(StrategyKind::from_token(kind.token()), kind);
        }
        assert_eq!(
            StrategyKind::from_token("lucas_kande"),
            StrategyKind::LucasKanade
        );
        assert_eq!(StrategyKind::from_token("bogus"), StrategyKind::DenseLines);
        assert_eq!(StrategyKind::from_token(""), StrategyKind::DenseLines);
    }

    #[test]
    fn test_keys() {
        assert_eq!(StrategyKind::from_key('1' as i32), Some(StrategyKind::DenseHsv));
        assert_eq!(StrategyKind::from_key('4' as i32), Some(StrategyKind::LucasKanade));
        assert_eq!(StrategyKind::from_key('0' as i32), None);
        assert_eq!(StrategyKind::from_key('5' as i32), None);
        assert_eq!(StrategyKind::from_key(27), None);
    }

    #[test]
    fn test_factory_kinds() {
        let mut factory = factory();
        for kind in StrategyKind::ALL {
            assert_eq!(factory.create(kind).kind(), kind);
        }
        assert_eq!(
            factory.create_from_token("nope").kind(),
            StrategyKind::DenseLines
        );
    }

    #[test]
    fn test_apply_before_first_frame() {
        let mut factory = factory();
        let frame = gradient_frame(8, 8);
        for kind in StrategyKind::ALL {
            let err = factory.create(kind).apply(&frame).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SessionError>(),
                Some(SessionError::NotPrimed(_))
            ));
        }
    }

    #[test]
    fn test_output_keeps_frame_size() {
        let mut factory = factory();
        let frame0 = gradient_frame(37, 23);
        let frame1 = gradient_frame(37, 23);
        for kind in StrategyKind::ALL {
            let mut strategy = factory.create(kind);
            strategy.set_first_frame(&frame0).unwrap();
            for _ in 0..3 {
                let out = strategy.apply(&frame1).unwrap();
                assert_eq!(out.dim(), frame1.dim(), "{kind}");
            }
        }
    }

    #[test]
    fn test_frame_size_change_is_rejected() {
        let mut factory = factory();
        for kind in StrategyKind::ALL {
            let mut strategy = factory.create(kind);
            strategy.set_first_frame(&gradient_frame(16, 16)).unwrap();
            let err = strategy.apply(&gradient_frame(16, 12)).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SessionError>(),
                Some(SessionError::FrameSizeMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_input_frame_untouched() {
        let mut factory = factory();
        let frame = gradient_frame(32, 32);
        let copy = frame.clone();
        let mut strategy = factory.create(StrategyKind::LucasKanade);
        strategy.set_first_frame(&frame).unwrap();
        strategy.apply(&frame).unwrap();
        assert_eq!(frame, copy);
    }
}
