//! OpenGL transfer device using pixel buffer objects via glow.
//!
//! Readbacks go through `GL_PIXEL_PACK_BUFFER`: `glReadPixels` into a bound
//! buffer returns immediately and the driver copies in the background; the
//! buffer is mapped with `glMapBufferRange` once the pipeline decides it is
//! old enough. Pixels come back bottom row first.

use std::sync::Arc;

use glow::HasContext;
use tracing::warn;

use super::types::RenderContext;
use super::{CaptureRect, TransferDevice};

/// Buffer handle type of the native glow context.
type GlBuffer = <glow::Context as HasContext>::Buffer;

/// Callback asking the windowing layer whether our GL context is current.
pub type ContextCheck = Box<dyn Fn() -> bool>;

/// Transfer device backed by a glow context.
pub struct GlowDevice {
    gl: Arc<glow::Context>,
    is_current: ContextCheck,
}

impl GlowDevice {
    /// Wrap a glow context.
    ///
    /// `is_current` must return true only when the context behind `gl` is
    /// current on the calling thread (for SDL: `SDL_GL_GetCurrentContext()`
    /// is our context).
    pub fn new(gl: Arc<glow::Context>, is_current: ContextCheck) -> Self {
        Self { gl, is_current }
    }
}

impl std::fmt::Debug for GlowDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowDevice").finish_non_exhaustive()
    }
}

fn gl_size(len: usize) -> Result<i32, String> {
    i32::try_from(len).map_err(|_| format!("Transfer of {} bytes exceeds GL limits", len))
}

impl TransferDevice for GlowDevice {
    type Buffer = GlBuffer;

    fn current_context(&self) -> Option<RenderContext> {
        if (self.is_current)() {
            // SAFETY: the check just confirmed our context is current here.
            Some(unsafe { RenderContext::assume_current() })
        } else {
            None
        }
    }

    fn output_size(&self, _cx: &RenderContext) -> (u32, u32) {
        let mut viewport = [0i32; 4];
        // SAFETY: context is current (token); VIEWPORT writes four integers.
        unsafe {
            self.gl
                .get_parameter_i32_slice(glow::VIEWPORT, &mut viewport);
        }
        (viewport[2].max(0) as u32, viewport[3].max(0) as u32)
    }

    fn create_buffer(&mut self, _cx: &RenderContext) -> Result<GlBuffer, String> {
        // SAFETY: context is current (token).
        unsafe { self.gl.create_buffer() }
    }

    fn delete_buffer(&mut self, _cx: &RenderContext, buffer: GlBuffer) {
        // SAFETY: context is current (token); buffer was created by it.
        unsafe { self.gl.delete_buffer(buffer) }
    }

    fn issue_readback(
        &mut self,
        _cx: &RenderContext,
        buffer: GlBuffer,
        rect: CaptureRect,
    ) -> Result<(), String> {
        let size = gl_size(rect.byte_len())?;
        // SAFETY: context is current (token); the pack buffer is sized for
        // the rectangle before the read targets offset 0 of it.
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer));
            self.gl
                .buffer_data_size(glow::PIXEL_PACK_BUFFER, size, glow::STREAM_READ);
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::BufferOffset(0),
            );
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        Ok(())
    }

    fn read_mapped(
        &mut self,
        _cx: &RenderContext,
        buffer: GlBuffer,
        len: usize,
        read: &mut dyn FnMut(&[u8]),
    ) -> bool {
        let Ok(size) = gl_size(len) else {
            return false;
        };
        // SAFETY: context is current (token). The mapped range is `len` bytes
        // long and stays valid until `unmap_buffer`, after `read` returns.
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer));
            let ptr = self
                .gl
                .map_buffer_range(glow::PIXEL_PACK_BUFFER, 0, size, glow::MAP_READ_BIT);
            let mapped = !ptr.is_null();
            if mapped {
                read(std::slice::from_raw_parts(ptr, len));
                self.gl.unmap_buffer(glow::PIXEL_PACK_BUFFER);
            }
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            mapped
        }
    }

    fn read_pixels(
        &mut self,
        _cx: &RenderContext,
        rect: CaptureRect,
        dst: &mut [u8],
    ) -> Result<(), String> {
        if dst.len() < rect.byte_len() {
            return Err(format!(
                "Readback destination too small: expected {} bytes, got {}",
                rect.byte_len(),
                dst.len()
            ));
        }
        // SAFETY: context is current (token); no pack buffer is bound, so the
        // read writes straight into `dst`, which is large enough.
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(dst)),
            );
            let error = self.gl.get_error();
            if error != glow::NO_ERROR {
                warn!("glReadPixels failed: 0x{:x}", error);
                return Err(format!("glReadPixels error 0x{:x}", error));
            }
        }
        Ok(())
    }
}
