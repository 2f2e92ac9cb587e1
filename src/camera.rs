use crate::error::{Result, StreamError};
use crate::vision::{ChannelOrder, Mat};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{debug, info, warn};

/// Source of single frames. Implementations acquire whatever device they
/// need for the duration of one `grab` and release it before returning.
pub trait FrameSource {
    fn grab(&mut self) -> Result<Mat>;
}

/// Local webcam, opened afresh for every frame so no handle is held
/// across the sleep between iterations.
pub struct WebcamSource {
    camera_id: u32,
}

impl WebcamSource {
    pub fn new(camera_id: u32) -> Self {
        info!("Using camera {} for frame capture", camera_id);
        Self { camera_id }
    }

    fn open(&self) -> Result<OpenCamera> {
        let camera_index = CameraIndex::Index(self.camera_id);
        let requested_format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(camera_index, requested_format).map_err(|e| {
            StreamError::CameraReadFailure(format!("cannot open camera {}: {}", self.camera_id, e))
        })?;

        camera.open_stream().map_err(|e| {
            StreamError::CameraReadFailure(format!("cannot start stream on camera {}: {}", self.camera_id, e))
        })?;

        Ok(OpenCamera { camera })
    }
}

impl FrameSource for WebcamSource {
    fn grab(&mut self) -> Result<Mat> {
        let mut handle = self.open()?;
        let frame = handle.read_frame();
        drop(handle);
        frame
    }
}

/// Open camera stream, stopped on drop whatever path the caller takes.
struct OpenCamera {
    camera: Camera,
}

impl OpenCamera {
    fn read_frame(&mut self) -> Result<Mat> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| StreamError::CameraReadFailure(format!("frame capture error: {}", e)))?;

        // Decode the frame to RGB
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| StreamError::CameraReadFailure(format!("frame decode error: {}", e)))?;
        let width = decoded.width();
        let height = decoded.height();

        debug!("Captured camera frame: {}x{}", width, height);

        Ok(Mat::from_raw(width, height, ChannelOrder::Rgb, decoded.into_raw()))
    }
}

impl Drop for OpenCamera {
    fn drop(&mut self) {
        match self.camera.stop_stream() {
            Ok(_) => debug!("Camera stream stopped"),
            Err(e) => warn!("Error stopping camera stream: {}", e),
        }
    }
}
