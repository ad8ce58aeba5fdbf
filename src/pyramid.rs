use crate::image::Image;

/// Successively halved copies of an image. Level 0 is the image itself and is
/// borrowed rather than stored.
#[derive(Debug)]
pub struct Pyramid<'a> {
    pub image: &'a Image,
    pub levels: Vec<Image>,
}

impl<'a> Pyramid<'a> {
    /// Build `level_count` downscaled levels on top of `image`. Stops early once
    /// a level would shrink below one pixel.
    pub fn compute(image: &'a Image, level_count: usize) -> Self {
        let mut levels: Vec<Image> = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            let parent = levels.last().unwrap_or(image);
            if parent.width < 2 || parent.height < 2 {
                break;
            }
            let mut child = Image::empty();
            downscale(parent, &mut child);
            levels.push(child);
        }
        Self { image, levels }
    }

    /// Number of usable levels, including the full resolution one
    pub fn len(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            self.image
        } else {
            &self.levels[level - 1]
        }
    }
}

/// downscale the parent image and store the result in child
fn downscale(parent: &Image, child: &mut Image) {
    let w = parent.width as i64;
    let h = parent.height as i64;

    let w_half = w / 2;
    let h_half = h / 2;
    child.data.clear();
    child.width = w_half as usize;
    child.height = h_half as usize;

    // out of range taps repeat the border
    let v = |x: i64, y: i64| -> u16 { parent.value_clamped(x, y) as u16 };

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            let value = v(x2, y2) / 4
                + (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1)) / 8
                + (v(x2 + 1, y2 + 1) + v(x2 - 1, y2 - 1) + v(x2 - 1, y2 + 1) + v(x2 + 1, y2 - 1))
                    / 16;
            child.data.push(value as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pyramid_sizes() {
        let image = Image::new(37, 20);
        let pyramid = Pyramid::compute(&image, 3);
        assert_eq!(pyramid.len(), 4);
        assert_eq!(pyramid.get_image_at_level(0).width, 37);
        assert_eq!(pyramid.get_image_at_level(1).width, 18);
        assert_eq!(pyramid.get_image_at_level(1).height, 10);
        assert_eq!(pyramid.get_image_at_level(3).width, 4);
        assert_eq!(pyramid.get_image_at_level(3).height, 2);

        let tiny = Image::new(3, 3);
        assert_eq!(Pyramid::compute(&tiny, 5).len(), 2);
    }

    #[test]
    fn test_flat_image_stays_flat() {
        let image = Image::from_fn(16, 16, |_, _| 80);
        let pyramid = Pyramid::compute(&image, 2);
        for level in 1..pyramid.len() {
            // each tap group rounds down separately
            assert!(pyramid
                .get_image_at_level(level)
                .data
                .iter()
                .all(|&v| v >= 78 && v <= 80));
        }
    }
}
