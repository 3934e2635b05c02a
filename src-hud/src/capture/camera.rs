//! Latest camera and recording frames, shared under one lock.
//!
//! The camera and recording threads publish into [`SharedVideoOutput`]; the
//! screenshot path reads through [`CameraSource`] and holds the lock for the
//! whole time it touches the pixels.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::error::CaptureError;
use super::types::{CameraFrame, FrameOrigin};
use super::{CameraSource, BYTES_PER_PIXEL};

#[derive(Debug)]
struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    fn view(&self, origin: FrameOrigin) -> CameraFrame<'_> {
        CameraFrame {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
            origin,
        }
    }
}

#[derive(Debug, Default)]
struct VideoOutput {
    recording: Option<FrameBuffer>,
    camera: Option<FrameBuffer>,
}

/// Video output state published by the camera and recording subsystems.
#[derive(Debug, Default)]
pub struct SharedVideoOutput {
    inner: Mutex<VideoOutput>,
}

impl SharedVideoOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VideoOutput> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the latest raw camera frame (RGBA, top row first).
    pub fn publish_camera_frame(
        &self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<(), CaptureError> {
        let frame = checked_frame(width, height, pixels)?;
        self.lock().camera = Some(frame);
        Ok(())
    }

    /// Publish the recording subsystem's current RGB output buffer.
    pub fn publish_recording_frame(
        &self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<(), CaptureError> {
        let frame = checked_frame(width, height, pixels)?;
        self.lock().recording = Some(frame);
        Ok(())
    }
}

fn checked_frame(width: u32, height: u32, pixels: Vec<u8>) -> Result<FrameBuffer, CaptureError> {
    let needed = width as usize * height as usize * BYTES_PER_PIXEL;
    if pixels.len() < needed {
        return Err(CaptureError::InvalidParameters(format!(
            "Frame buffer too small: expected {} bytes, got {}",
            needed,
            pixels.len()
        )));
    }
    Ok(FrameBuffer {
        width,
        height,
        pixels,
    })
}

impl CameraSource for SharedVideoOutput {
    fn with_latest_frame(
        &self,
        no_camera_mode: bool,
        read: &mut dyn FnMut(CameraFrame<'_>) -> Result<(), CaptureError>,
    ) -> Result<(), CaptureError> {
        let output = self.lock();

        let frame = match (&output.recording, &output.camera) {
            (Some(recording), _) => recording.view(FrameOrigin::Recording),
            (None, Some(camera)) if !no_camera_mode => camera.view(FrameOrigin::Camera),
            _ => return Err(CaptureError::NoFrameAvailable),
        };

        debug!(
            "Reading {:?} frame {}x{}",
            frame.origin, frame.width, frame.height
        );
        read(frame)
    }
}
