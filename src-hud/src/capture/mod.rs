//! GPU frame capture for the HUD.
//!
//! Pixels are pulled off the GPU through a rotating set of transfer buffers
//! so the render loop never waits on a readback. The device behind the
//! pipeline is abstracted by [`TransferDevice`]: an OpenGL implementation is
//! available with the `glow` feature, and [`SoftwareDevice`] emulates the same
//! semantics in memory for headless runs and tests.

pub mod camera;
pub mod driver;
pub mod error;
#[cfg(feature = "glow")]
pub mod gl;
pub mod pipeline;
pub mod software;
pub mod types;

pub use mirage_common::{CaptureRect, DisplaySettings, BYTES_PER_PIXEL};

pub use camera::SharedVideoOutput;
pub use driver::CaptureDriver;
pub use error::{CaptureError, PipelineError};
pub use pipeline::{flip_rows_into, BufferPipeline, PipelineDepth, RetryPolicy};
pub use software::SoftwareDevice;
pub use types::{CameraFrame, FrameOrigin, Harvest, RenderContext};

/// Trait for the GPU side of frame capture.
///
/// Every call except [`current_context`](TransferDevice::current_context)
/// takes a [`RenderContext`], so the methods can only run on the thread that
/// owns the rendering context. Pixel data handed out by the device is in GL
/// order: the bottom row of the rectangle comes first.
pub trait TransferDevice {
    /// Handle of one GPU transfer buffer.
    type Buffer: Copy + Eq + std::fmt::Debug;

    /// Return a token if the rendering context is current on this thread.
    fn current_context(&self) -> Option<RenderContext>;

    /// Size of the render target in pixels.
    fn output_size(&self, cx: &RenderContext) -> (u32, u32);

    /// Create one transfer buffer.
    fn create_buffer(&mut self, cx: &RenderContext) -> Result<Self::Buffer, String>;

    /// Release one transfer buffer.
    fn delete_buffer(&mut self, cx: &RenderContext, buffer: Self::Buffer);

    /// Size `buffer` for `rect` and start an asynchronous readback into it.
    fn issue_readback(
        &mut self,
        cx: &RenderContext,
        buffer: Self::Buffer,
        rect: CaptureRect,
    ) -> Result<(), String>;

    /// Map the first `len` bytes of `buffer` for reading and pass them to
    /// `read`, unmapping afterwards.
    ///
    /// Returns `false` without calling `read` if the buffer could not be
    /// mapped (transfer still in flight, buffer never written).
    fn read_mapped(
        &mut self,
        cx: &RenderContext,
        buffer: Self::Buffer,
        len: usize,
        read: &mut dyn FnMut(&[u8]),
    ) -> bool;

    /// Blocking single-shot readback of `rect` into `dst`.
    fn read_pixels(
        &mut self,
        cx: &RenderContext,
        rect: CaptureRect,
        dst: &mut [u8],
    ) -> Result<(), String>;
}

/// Trait for access to the camera/recording subsystem's latest frame.
pub trait CameraSource: Send + Sync {
    /// Run `read` on the latest raw frame while holding the video-output lock.
    ///
    /// The recording buffer is preferred; the camera frame is used when no
    /// recording buffer exists, unless `no_camera_mode` is set.
    fn with_latest_frame(
        &self,
        no_camera_mode: bool,
        read: &mut dyn FnMut(CameraFrame<'_>) -> Result<(), CaptureError>,
    ) -> Result<(), CaptureError>;
}
