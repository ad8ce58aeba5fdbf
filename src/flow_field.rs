use ndarray as nd;
use num_traits::clamp;

use crate::my_types::*;

/// Dense motion field, one (dx, dy) vector per pixel
#[derive(Clone, Debug, PartialEq)]
pub struct FlowField {
    data: nd::Array3<f32>,
}

impl FlowField {
    /// Field with zero motion everywhere
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: nd::Array3::zeros((height, width, 2)),
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> Vector2f) -> Self {
        let mut field = Self::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                field.set(x, y, f(x, y));
            }
        }
        field
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> Vector2f {
        Vector2f::new(self.data[(y, x, 0)], self.data[(y, x, 1)])
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, motion: Vector2f) {
        self.data[(y, x, 0)] = motion.x;
        self.data[(y, x, 1)] = motion.y;
    }

    /// Vector at a possibly out of range position. The position is clamped to
    /// the field and non-finite vectors read as no motion.
    pub fn get_clamped(&self, x: i64, y: i64) -> Vector2f {
        if self.data.is_empty() {
            return Vector2f::zeros();
        }
        let x = clamp(x, 0, self.width() as i64 - 1) as usize;
        let y = clamp(y, 0, self.height() as i64 - 1) as usize;
        let motion = self.get(x, y);
        if motion.x.is_finite() && motion.y.is_finite() {
            motion
        } else {
            Vector2f::zeros()
        }
    }

    pub fn as_array(&self) -> &nd::Array3<f32> {
        &self.data
    }

    /// Per pixel (magnitude, angle in degrees within [0, 360))
    pub fn to_polar(&self) -> (nd::Array2<f32>, nd::Array2<f32>) {
        let shape = (self.height(), self.width());
        let mut magnitude = nd::Array2::zeros(shape);
        let mut angle = nd::Array2::zeros(shape);
        for y in 0..self.height() {
            for x in 0..self.width() {
                let m = self.get_clamped(x as i64, y as i64);
                magnitude[(y, x)] = m.norm();
                let mut a = m.y.atan2(m.x).to_degrees();
                if a < 0. {
                    a += 360.;
                }
                // rounding can land exactly on 360
                if a >= 360. {
                    a = 0.;
                }
                angle[(y, x)] = a;
            }
        }
        (magnitude, angle)
    }
}
