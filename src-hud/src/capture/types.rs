//! Runtime types for capture operations.

use std::marker::PhantomData;

/// Proof that a rendering context is current on the calling thread.
///
/// GPU calls in this crate take a `&RenderContext`. The token is neither
/// `Send` nor `Sync`, so it cannot leave the thread that obtained it, and
/// only a [`TransferDevice`](super::TransferDevice) hands one out. Background
/// threads therefore have no way to reach the GL context; they can only queue
/// requests.
#[derive(Debug)]
pub struct RenderContext {
    _not_send: PhantomData<*const ()>,
}

impl RenderContext {
    /// Create a token for the current thread.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the device's rendering context is
    /// current on the calling thread for as long as the token lives.
    pub unsafe fn assume_current() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

/// Which buffer a raw camera frame was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// RGB output buffer of the recording subsystem
    Recording,
    /// Latest frame straight from the camera
    Camera,
}

/// A borrowed view of the latest raw camera frame.
///
/// Only valid while the video-output lock is held; the borrow cannot escape
/// [`CameraSource::with_latest_frame`](super::CameraSource::with_latest_frame).
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame<'a> {
    /// RGBA pixel data, top row first
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub origin: FrameOrigin,
}

/// Result of one successful pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Harvest {
    /// No transfer is old enough yet; the destination was not written
    Priming,
    /// Destination holds the transfer issued at call `frame`
    Fresh { frame: u64 },
    /// Every map attempt failed; destination holds the cached last-good
    /// frame, whose transfer was issued at call `frame`
    Stale { frame: u64 },
}

impl Harvest {
    /// Whether the destination buffer was written.
    pub fn has_data(&self) -> bool {
        !matches!(self, Harvest::Priming)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Harvest::Stale { .. })
    }
}
