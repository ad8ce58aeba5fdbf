use nalgebra as na;
use ndarray as nd;

pub type Vector2d = na::Vector2<f64>;
pub type Vector2f = na::Vector2<f32>;
pub type Matrix2d = na::Matrix2<f64>;

pub type Matrixd = na::DMatrix<f64>;

/// Interleaved BGR image, shape (height, width, 3)
pub type ColorImage = nd::Array3<u8>;

/// A captured video frame
pub type Frame = ColorImage;

/// BGR color triple
pub type Bgr = [u8; 3];
