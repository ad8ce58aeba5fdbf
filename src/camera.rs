use cv2::prelude::*;
use opencv as cv2;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::my_types::*;
use crate::session::VideoSource;
use crate::visualization::AsArray;

/// Frames from a camera device or a video file through `videoio`
pub struct CvCamera {
    capture: cv2::videoio::VideoCapture,
    name: String,
}

impl CvCamera {
    /// Open device `index`, optionally asking for a capture resolution
    pub fn open(index: i32, resolution: Option<(u32, u32)>) -> Result<Self> {
        let name = format!("camera {index}");
        let capture = cv2::videoio::VideoCapture::new(index, cv2::videoio::CAP_ANY)
            .map_err(|e| SessionError::SourceUnavailable(format!("{name}: {e}")))?;
        let mut camera = Self::checked(capture, name)?;
        if let Some((width, height)) = resolution {
            // drivers may ignore this, the frames tell the real size
            camera.capture.set(cv2::videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
            camera.capture.set(cv2::videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
        }
        Ok(camera)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let capture = cv2::videoio::VideoCapture::from_file(path, cv2::videoio::CAP_ANY)
            .map_err(|e| SessionError::SourceUnavailable(format!("{path}: {e}")))?;
        Self::checked(capture, path.to_string())
    }

    fn checked(capture: cv2::videoio::VideoCapture, name: String) -> Result<Self> {
        if !capture.is_opened()? {
            return Err(SessionError::SourceUnavailable(name).into());
        }
        info!("opened {name}");
        Ok(Self { capture, name })
    }
}

impl VideoSource for CvCamera {
    fn read(&mut self) -> Result<Option<Frame>> {
        let mut mat = cv2::core::Mat::default();
        let ok = self.capture.read(&mut mat)?;
        if !ok || mat.empty() {
            debug!("{} returned no frame", self.name);
            return Ok(None);
        }
        Ok(Some(mat.try_as_array()?))
    }

    fn release(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}
