//! Kernels backed by OpenCV: Farneback dense flow, `goodFeaturesToTrack`,
//! `calcOpticalFlowPyrLK`, and `imgproc` for conversion, remap and drawing.

use cv2::prelude::*;
use opencv as cv2;

use anyhow::{ensure, Result};
use cv2::core::{Mat, Point, Point2f, Scalar, Size, TermCriteria, Vector};

use super::{DenseFlowParams, Disc, FeatureParams, FlowKernels, LkParams, Painter, Segment};
use crate::flow_field::FlowField;
use crate::image::Image;
use crate::my_types::*;
use crate::visualization::{
    color_to_cv_8uc3, cv_8u_to_grayscale, flow_to_cv_32fc2, grayscale_to_cv_8u, AsArray,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct CvKernels;

impl FlowKernels for CvKernels {
    fn dense_flow(&self, prev: &Image, next: &Image, params: &DenseFlowParams) -> Result<FlowField> {
        ensure!(prev.same_size(next), "dense flow needs equally sized images");
        let prev_mat = grayscale_to_cv_8u(prev)?;
        let next_mat = grayscale_to_cv_8u(next)?;
        let mut flow = Mat::default();
        cv2::video::calc_optical_flow_farneback(
            &prev_mat,
            &next_mat,
            &mut flow,
            params.pyr_scale,
            params.levels as i32,
            params.win_size as i32,
            params.iterations as i32,
            params.poly_n as i32,
            params.poly_sigma,
            0,
        )?;

        let mut field = FlowField::zeros(prev.width, prev.height);
        for y in 0..prev.height {
            for x in 0..prev.width {
                let motion: &Point2f = flow.at_2d(y as i32, x as i32)?;
                field.set(x, y, Vector2f::new(motion.x, motion.y));
            }
        }
        Ok(field)
    }

    fn detect_corners(&self, gray: &Image, params: &FeatureParams) -> Result<Vec<Vector2d>> {
        let mat = grayscale_to_cv_8u(gray)?;
        let mut corners = Vector::<Point2f>::new();
        cv2::imgproc::good_features_to_track(
            &mat,
            &mut corners,
            params.max_corners as i32,
            params.quality_level,
            params.min_distance,
            &cv2::core::no_array(),
            params.block_size as i32,
            false,
            0.04,
        )?;
        Ok(corners
            .iter()
            .map(|p| Vector2d::new(p.x as f64, p.y as f64))
            .collect())
    }

    fn track_points(
        &self,
        prev: &Image,
        next: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<Vec<Option<Vector2d>>> {
        if points.is_empty() {
            return Ok(vec![]);
        }
        let prev_mat = grayscale_to_cv_8u(prev)?;
        let next_mat = grayscale_to_cv_8u(next)?;
        let prev_pts: Vector<Point2f> = points
            .iter()
            .map(|p| Point2f::new(p.x as f32, p.y as f32))
            .collect();
        let mut next_pts = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let criteria = TermCriteria::new(
            cv2::core::TermCriteria_COUNT + cv2::core::TermCriteria_EPS,
            params.max_iters as i32,
            params.epsilon,
        )?;
        let win = params.win_size as i32;
        cv2::video::calc_optical_flow_pyr_lk(
            &prev_mat,
            &next_mat,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(win, win),
            params.max_level as i32,
            criteria,
            0,
            params.min_eig,
        )?;
        ensure!(
            next_pts.len() == points.len() && status.len() == points.len(),
            "tracker returned {} points for {} inputs",
            next_pts.len(),
            points.len()
        );

        Ok(next_pts
            .iter()
            .zip(status.iter())
            .map(|(p, ok)| (ok != 0).then(|| Vector2d::new(p.x as f64, p.y as f64)))
            .collect())
    }
}

fn to_point(p: Vector2d) -> Option<Point> {
    if p.x.is_finite() && p.y.is_finite() {
        Some(Point::new(p.x.round() as i32, p.y.round() as i32))
    } else {
        None
    }
}

fn to_scalar(color: Bgr) -> Scalar {
    Scalar::new(color[0] as f64, color[1] as f64, color[2] as f64, 0.)
}

fn convert_color(src: &Mat, code: i32) -> Result<Mat> {
    let mut dst = Mat::default();
    cv2::imgproc::cvt_color(src, &mut dst, code, 0)?;
    Ok(dst)
}

impl Painter for CvKernels {
    fn bgr_to_gray(&self, frame: &ColorImage) -> Result<Image> {
        let gray = convert_color(&color_to_cv_8uc3(frame)?, cv2::imgproc::COLOR_BGR2GRAY)?;
        cv_8u_to_grayscale(&gray)
    }

    fn gray_to_bgr(&self, gray: &Image) -> Result<ColorImage> {
        convert_color(&grayscale_to_cv_8u(gray)?, cv2::imgproc::COLOR_GRAY2BGR)?.try_as_array()
    }

    fn hsv_to_bgr(&self, hsv: &ColorImage) -> Result<ColorImage> {
        convert_color(&color_to_cv_8uc3(hsv)?, cv2::imgproc::COLOR_HSV2BGR)?.try_as_array()
    }

    fn remap(&self, src: &Image, map: &FlowField) -> Result<Image> {
        if map.width() == 0 || map.height() == 0 {
            return Ok(Image::new(map.width(), map.height()));
        }
        let src = grayscale_to_cv_8u(src)?;
        let map = flow_to_cv_32fc2(map)?;
        let mut dst = Mat::default();
        cv2::imgproc::remap(
            &src,
            &mut dst,
            &map,
            &cv2::core::no_array(),
            cv2::imgproc::INTER_LINEAR,
            cv2::core::BORDER_REPLICATE,
            Scalar::default(),
        )?;
        cv_8u_to_grayscale(&dst)
    }

    fn draw_lines(&self, image: &mut ColorImage, lines: &[Segment], thickness: i64) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut mat = color_to_cv_8uc3(image)?;
        for segment in lines {
            let (Some(from), Some(to)) = (to_point(segment.from), to_point(segment.to)) else {
                continue;
            };
            cv2::imgproc::line(
                &mut mat,
                from,
                to,
                to_scalar(segment.color),
                thickness.max(1) as i32,
                cv2::imgproc::LINE_8,
                0,
            )?;
        }
        *image = mat.try_as_array()?;
        Ok(())
    }

    fn draw_discs(&self, image: &mut ColorImage, discs: &[Disc], radius: i64) -> Result<()> {
        if discs.is_empty() {
            return Ok(());
        }
        let mut mat = color_to_cv_8uc3(image)?;
        for disc in discs {
            let Some(center) = to_point(disc.center) else {
                continue;
            };
            cv2::imgproc::circle(
                &mut mat,
                center,
                radius as i32,
                to_scalar(disc.color),
                cv2::imgproc::FILLED,
                cv2::imgproc::LINE_8,
                0,
            )?;
        }
        *image = mat.try_as_array()?;
        Ok(())
    }

    fn add(&self, a: &ColorImage, b: &ColorImage) -> Result<ColorImage> {
        ensure!(
            a.dim() == b.dim(),
            "cannot add frames of shape {:?} and {:?}",
            a.dim(),
            b.dim()
        );
        let mut sum = Mat::default();
        cv2::core::add(
            &color_to_cv_8uc3(a)?,
            &color_to_cv_8uc3(b)?,
            &mut sum,
            &cv2::core::no_array(),
            -1,
        )?;
        sum.try_as_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::native::NativeKernels;

    fn gradient_frame() -> ColorImage {
        ColorImage::from_shape_fn((12, 16, 3), |(y, x, c)| (x * 9 + y * 5 + c * 30) as u8)
    }

    #[test]
    fn test_gray_matches_native() {
        let frame = gradient_frame();
        let cv = CvKernels.bgr_to_gray(&frame).unwrap();
        let native = NativeKernels.bgr_to_gray(&frame).unwrap();
        assert_eq!((cv.width, cv.height), (16, 12));
        assert!(cv
            .data
            .iter()
            .zip(&native.data)
            .all(|(a, b)| (*a as i32 - *b as i32).abs() <= 1));

        let bgr = CvKernels.gray_to_bgr(&cv).unwrap();
        assert_eq!(bgr, cv.to_bgr());
    }

    #[test]
    fn test_hsv_primaries() {
        let hsv = ColorImage::from_shape_vec((1, 3, 3), vec![0, 255, 255, 60, 255, 255, 90, 0, 128])
            .unwrap();
        let bgr = CvKernels.hsv_to_bgr(&hsv).unwrap();
        assert_eq!(bgr.into_raw_vec(), vec![0, 0, 255, 0, 255, 0, 128, 128, 128]);
    }

    #[test]
    fn test_remap_identity_and_border() {
        let src = Image::from_fn(6, 4, |x, y| (x * 20 + y) as u8);
        let identity = FlowField::from_fn(6, 4, |x, y| Vector2f::new(x as f32, y as f32));
        assert_eq!(CvKernels.remap(&src, &identity).unwrap(), src);

        let outside = FlowField::from_fn(1, 1, |_, _| Vector2f::new(50., -50.));
        assert_eq!(CvKernels.remap(&src, &outside).unwrap().data, vec![100]);
    }

    #[test]
    fn test_drawing_and_add() {
        let mut image = ColorImage::zeros((10, 10, 3));
        let lines = [Segment {
            from: Vector2d::new(1., 2.),
            to: Vector2d::new(8., 2.),
            color: [0, 255, 0],
        }];
        CvKernels.draw_lines(&mut image, &lines, 1).unwrap();
        assert!((1..=8).all(|x| image[(2, x, 1)] == 255 && image[(2, x, 0)] == 0));

        let discs = [Disc {
            center: Vector2d::new(5., 6.),
            color: [10, 20, 30],
        }];
        CvKernels.draw_discs(&mut image, &discs, 2).unwrap();
        assert_eq!(image[(6, 5, 2)], 30);
        assert_eq!(image[(0, 0, 2)], 0);

        let sum = CvKernels.add(&image, &image).unwrap();
        assert_eq!(sum[(2, 3, 1)], 255);
        assert_eq!(sum[(6, 5, 0)], 20);
    }
}
