use cv2::prelude::*;
use opencv as cv2;

use anyhow::{ensure, Context, Result};
use ndarray as nd;
use std::ffi::c_void;
use std::path::Path;

use crate::flow_field::FlowField;
use crate::image::Image;
use crate::my_types::*;
use crate::session::{Display, ImageWriter};

pub trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for cv2::core::Mat {
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        ensure!(
            self.typ() == cv2::core::CV_8UC3,
            "expected an 8-bit 3 channel Mat, got type {}",
            self.typ()
        );
        let continuous;
        let mat = if self.is_continuous() {
            self
        } else {
            continuous = self.try_clone()?;
            &continuous
        };
        let bytes = mat.data_bytes()?;
        let size = mat.size()?;
        let a = nd::ArrayView3::from_shape((size.height as usize, size.width as usize, 3), bytes)?;
        Ok(a.to_owned())
    }
}

/// Copy of a grayscale image as a CV_8U Mat
pub fn grayscale_to_cv_8u(img: &Image) -> Result<cv2::core::Mat> {
    let view = unsafe {
        cv2::core::Mat::new_rows_cols_with_data(
            img.height as i32,
            img.width as i32,
            cv2::core::CV_8U,
            img.data.as_ptr() as *mut c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    // the view borrows img.data, detach it before handing it out
    Ok(view.try_clone()?)
}

/// Copy of a CV_8U Mat as a grayscale image
pub fn cv_8u_to_grayscale(mat: &cv2::core::Mat) -> Result<Image> {
    ensure!(
        mat.typ() == cv2::core::CV_8U,
        "expected an 8-bit single channel Mat, got type {}",
        mat.typ()
    );
    let continuous;
    let mat = if mat.is_continuous() {
        mat
    } else {
        continuous = mat.try_clone()?;
        &continuous
    };
    Ok(Image {
        data: mat.data_bytes()?.to_vec(),
        width: mat.cols() as usize,
        height: mat.rows() as usize,
    })
}

/// Copy of a two component field as a CV_32FC2 Mat, the layout `remap` and
/// the flow functions use
pub fn flow_to_cv_32fc2(field: &FlowField) -> Result<cv2::core::Mat> {
    let data = field.as_array().as_standard_layout();
    let data = data.as_slice().context("flow field is not contiguous")?;
    let view = unsafe {
        cv2::core::Mat::new_rows_cols_with_data(
            field.height() as i32,
            field.width() as i32,
            cv2::core::CV_32FC2,
            data.as_ptr() as *mut c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    Ok(view.try_clone()?)
}

/// Copy of a BGR frame as a CV_8UC3 Mat
pub fn color_to_cv_8uc3(frame: &ColorImage) -> Result<cv2::core::Mat> {
    let (height, width, _) = frame.dim();
    let frame = frame.as_standard_layout();
    let data = frame.as_slice().context("frame is not contiguous")?;
    let view = unsafe {
        cv2::core::Mat::new_rows_cols_with_data(
            height as i32,
            width as i32,
            cv2::core::CV_8UC3,
            data.as_ptr() as *mut c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    Ok(view.try_clone()?)
}

/// HighGUI window the rendered frames go to
pub struct CvWindow {
    name: String,
}

impl CvWindow {
    pub fn new(name: &str) -> Result<Self> {
        cv2::highgui::named_window(name, cv2::highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Display for CvWindow {
    fn show(&mut self, image: &ColorImage) -> Result<()> {
        let mat = color_to_cv_8uc3(image)?;
        cv2::highgui::imshow(&self.name, &mat)?;
        Ok(())
    }

    fn poll_key(&mut self, timeout_ms: i32) -> Result<Option<i32>> {
        let key = cv2::highgui::wait_key(timeout_ms)?;
        Ok(if key >= 0 { Some(key) } else { None })
    }

    fn close(&mut self) -> Result<()> {
        cv2::highgui::destroy_window(&self.name)?;
        Ok(())
    }
}

/// Saves frames with imgcodecs, format picked from the file extension
#[derive(Clone, Copy, Debug, Default)]
pub struct CvImageWriter;

impl ImageWriter for CvImageWriter {
    fn write(&mut self, path: &Path, image: &ColorImage) -> Result<()> {
        let mat = color_to_cv_8uc3(image)?;
        let name = path
            .to_str()
            .with_context(|| format!("path {} is not valid UTF-8", path.display()))?;
        let written = cv2::imgcodecs::imwrite(name, &mat, &cv2::core::Vector::<i32>::new())?;
        ensure!(written, "imwrite refused {}", path.display());
        Ok(())
    }
}
