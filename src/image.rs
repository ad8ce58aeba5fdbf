use ndarray as nd;
use num_traits::clamp;

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create a black image of the given size
    pub fn new(width: usize, height: usize) -> Image {
        Image {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Image {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image {
            data,
            width,
            height,
        }
    }

    /// BGR to intensity with the fixed point ITU-R 601 weights.
    pub fn from_bgr(frame: &ColorImage) -> Image {
        let (height, width, _) = frame.dim();
        let mut data = Vec::with_capacity(width * height);
        for pixel in frame.lanes(nd::Axis(2)) {
            let (b, g, r) = (pixel[0] as u32, pixel[1] as u32, pixel[2] as u32);
            data.push(((r * 4899 + g * 9617 + b * 1868 + 8192) >> 14) as u8);
        }
        Image {
            data,
            width,
            height,
        }
    }

    /// Replicate the intensity into three channels
    pub fn to_bgr(&self) -> ColorImage {
        nd::Array3::from_shape_fn((self.height, self.width, 3), |(y, x, _)| self.value(x, y))
    }

    pub fn same_size(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel lookup with coordinates clamped to the border
    #[inline(always)]
    pub fn value_clamped(&self, x: i64, y: i64) -> u8 {
        let x = clamp(x, 0, self.width as i64 - 1);
        let y = clamp(y, 0, self.height as i64 - 1);
        self.data[y as usize * self.width + x as usize]
    }

    /// Bilinear interpolation. Coordinates are clamped to the image, so
    /// samples past the border repeat the edge pixels.
    pub fn bilinear(&self, x: f64, y: f64) -> f64 {
        if self.data.is_empty() {
            return 0.;
        }
        let x = clamp(x, 0., (self.width - 1) as f64);
        let y = clamp(y, 0., (self.height - 1) as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = usize::min(x0 + 1, self.width - 1);
        let y1 = usize::min(y0 + 1, self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = (1. - fx) * self.value(x0, y0) as f64 + fx * self.value(x1, y0) as f64;
        let bottom = (1. - fx) * self.value(x0, y1) as f64 + fx * self.value(x1, y1) as f64;
        (1. - fy) * top + fy * bottom
    }
}

/// (width, height) of a color frame
pub fn frame_size(frame: &ColorImage) -> (usize, usize) {
    let (height, width, _) = frame.dim();
    (width, height)
}

/// Mirror a frame around its vertical axis
pub fn flip_horizontal(frame: &ColorImage) -> ColorImage {
    frame.slice(nd::s![.., ..;-1, ..]).to_owned()
}

/// HSV to BGR using the 8-bit convention where hue spans 0..180.
pub fn hsv_to_bgr(h: u8, s: u8, v: u8) -> Bgr {
    let v = v as f32 / 255.;
    let s = s as f32 / 255.;
    if s <= 0. {
        let c = (v * 255.).round() as u8;
        return [c, c, c];
    }
    let h = (h as f32 * 2. / 60.) % 6.;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1. - s);
    let q = v * (1. - s * f);
    let t = v * (1. - s * (1. - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f32| clamp((c * 255.).round(), 0., 255.) as u8;
    [to_u8(b), to_u8(g), to_u8(r)]
}
