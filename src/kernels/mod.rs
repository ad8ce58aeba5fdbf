//! Numeric motion estimation kernels. Strategies only talk to [`FlowKernels`];
//! which back end runs behind it is picked once at startup.

use anyhow::Result;

use crate::flow_field::FlowField;
use crate::image::Image;
use crate::my_types::*;

#[cfg(feature = "opencv")]
pub mod cv;
pub mod native;

/// Tunables of the dense field estimator (Farneback naming)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DenseFlowParams {
    pub pyr_scale: f64,
    pub levels: usize,
    pub win_size: usize,
    pub iterations: usize,
    pub poly_n: usize,
    pub poly_sigma: f64,
}

impl Default for DenseFlowParams {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            win_size: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
        }
    }
}

/// Shi-Tomasi corner detection tunables
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureParams {
    pub max_corners: usize,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_size: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 7.,
            block_size: 7,
        }
    }
}

/// Pyramidal Lucas-Kanade tunables. Iteration stops after `max_iters` steps
/// or once an update is shorter than `epsilon` pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LkParams {
    pub win_size: usize,
    pub max_level: usize,
    pub max_iters: usize,
    pub epsilon: f64,
    pub min_eig: f64,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            win_size: 15,
            max_level: 2,
            max_iters: 10,
            epsilon: 0.03,
            min_eig: 1e-4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum KernelsKind {
    Native,
    Opencv,
}

/// Colored segment drawn by [`Painter::draw_lines`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub from: Vector2d,
    pub to: Vector2d,
    pub color: Bgr,
}

/// Filled disc drawn by [`Painter::draw_discs`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Disc {
    pub center: Vector2d,
    pub color: Bgr,
}

pub trait FlowKernels {
    /// Per pixel motion from `prev` to `next`. Both images have the same size
    /// and so does the returned field.
    fn dense_flow(&self, prev: &Image, next: &Image, params: &DenseFlowParams) -> Result<FlowField>;

    /// Strongest trackable corners, best first
    fn detect_corners(&self, gray: &Image, params: &FeatureParams) -> Result<Vec<Vector2d>>;

    /// New position of every point in `next`, or `None` where tracking failed.
    /// The output has one entry per input point, in order.
    fn track_points(
        &self,
        prev: &Image,
        next: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<Vec<Option<Vector2d>>>;
}

/// Color conversion, resampling and drawing used by the renderers. Drawing
/// takes whole batches so a back end can convert the canvas once per call.
pub trait Painter {
    fn bgr_to_gray(&self, frame: &ColorImage) -> Result<Image>;

    fn gray_to_bgr(&self, gray: &Image) -> Result<ColorImage>;

    /// 8-bit HSV with hue in 0..180 to BGR
    fn hsv_to_bgr(&self, hsv: &ColorImage) -> Result<ColorImage>;

    /// `out(x, y) = src(map(x, y))` with bilinear sampling. `map` holds
    /// absolute source coordinates; samples outside `src` repeat its border.
    /// The output has the size of `map`.
    fn remap(&self, src: &Image, map: &FlowField) -> Result<Image>;

    /// Segments clip against the image, non-finite endpoints are skipped.
    fn draw_lines(&self, image: &mut ColorImage, lines: &[Segment], thickness: i64) -> Result<()>;

    fn draw_discs(&self, image: &mut ColorImage, discs: &[Disc], radius: i64) -> Result<()>;

    /// Per channel saturating sum of two equally sized frames
    fn add(&self, a: &ColorImage, b: &ColorImage) -> Result<ColorImage>;
}
