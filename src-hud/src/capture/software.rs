//! In-memory transfer device.
//!
//! Emulates the pixel-buffer-object semantics of a GL driver without a GPU:
//! the framebuffer is stored bottom row first, readbacks copy it into
//! per-buffer storage, and map failures can be injected. The headless
//! harness renders into it and the tests drive the pipeline with it.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use super::types::RenderContext;
use super::{CaptureRect, TransferDevice, BYTES_PER_PIXEL};

/// Software render target with emulated transfer buffers.
#[derive(Debug)]
pub struct SoftwareDevice {
    owner: ThreadId,
    context_lost: bool,
    width: u32,
    height: u32,
    /// RGBA pixels, bottom row first
    framebuffer: Vec<u8>,
    /// Buffer id → contents of the last readback (None until written)
    buffers: HashMap<u32, Option<Vec<u8>>>,
    next_id: u32,
    buffer_limit: Option<usize>,
    failing_maps: u32,
    map_calls: u64,
}

impl SoftwareDevice {
    /// Create a device whose context is current on the calling thread.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            owner: thread::current().id(),
            context_lost: false,
            width,
            height,
            framebuffer: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            buffers: HashMap::new(),
            next_id: 1,
            buffer_limit: None,
            failing_maps: 0,
            map_calls: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resize the render target, clearing it.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.framebuffer = vec![0; width as usize * height as usize * BYTES_PER_PIXEL];
    }

    /// Fill the whole framebuffer with one colour.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.framebuffer.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Replace the framebuffer with an image given top row first.
    pub fn present(&mut self, top_down: &[u8]) -> Result<(), String> {
        if top_down.len() != self.framebuffer.len() {
            return Err(format!(
                "Image size mismatch: expected {} bytes, got {}",
                self.framebuffer.len(),
                top_down.len()
            ));
        }
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let height = self.height as usize;
        for (y, row) in top_down.chunks_exact(row_bytes).enumerate() {
            let gl_row = height - 1 - y;
            self.framebuffer[gl_row * row_bytes..(gl_row + 1) * row_bytes].copy_from_slice(row);
        }
        Ok(())
    }

    /// Paint a rectangle given in top-down coordinates.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let x_end = x.saturating_add(width).min(self.width) as usize;
        let y_end = y.saturating_add(height).min(self.height);
        for top_row in y..y_end {
            let gl_row = (self.height - 1 - top_row) as usize;
            let row = &mut self.framebuffer[gl_row * row_bytes..(gl_row + 1) * row_bytes];
            for px in row[x as usize * BYTES_PER_PIXEL..x_end * BYTES_PER_PIXEL]
                .chunks_exact_mut(BYTES_PER_PIXEL)
            {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Make the next `count` map attempts fail.
    pub fn fail_next_maps(&mut self, count: u32) {
        self.failing_maps = count;
    }

    /// Cap the number of buffers that can exist at once.
    pub fn limit_buffers(&mut self, limit: usize) {
        self.buffer_limit = Some(limit);
    }

    /// Simulate losing (or regaining) the rendering context.
    pub fn set_context_lost(&mut self, lost: bool) {
        self.context_lost = lost;
    }

    /// Map attempts made so far, failed ones included.
    pub fn map_calls(&self) -> u64 {
        self.map_calls
    }

    /// Number of buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn copy_region(&self, rect: CaptureRect, dst: &mut [u8]) -> Result<(), String> {
        let x_end = rect.x as i64 + rect.width as i64;
        let y_end = rect.y as i64 + rect.height as i64;
        if rect.x < 0 || rect.y < 0 || x_end > self.width as i64 || y_end > self.height as i64 {
            return Err(format!(
                "Readback rectangle {:?} outside {}x{} target",
                rect, self.width, self.height
            ));
        }
        if dst.len() < rect.byte_len() {
            return Err(format!(
                "Readback destination too small: expected {} bytes, got {}",
                rect.byte_len(),
                dst.len()
            ));
        }

        let fb_row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let row_bytes = rect.row_bytes();
        let x_offset = rect.x as usize * BYTES_PER_PIXEL;
        for row in 0..rect.height as usize {
            let src = (rect.y as usize + row) * fb_row_bytes + x_offset;
            dst[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&self.framebuffer[src..src + row_bytes]);
        }
        Ok(())
    }
}

impl TransferDevice for SoftwareDevice {
    type Buffer = u32;

    fn current_context(&self) -> Option<RenderContext> {
        if self.context_lost || thread::current().id() != self.owner {
            return None;
        }
        // SAFETY: there is no real GL context; the token only pins callers to
        // the thread that created the device.
        Some(unsafe { RenderContext::assume_current() })
    }

    fn output_size(&self, _cx: &RenderContext) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_buffer(&mut self, _cx: &RenderContext) -> Result<u32, String> {
        if let Some(limit) = self.buffer_limit {
            if self.buffers.len() >= limit {
                return Err(format!("Buffer limit of {} reached", limit));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, None);
        Ok(id)
    }

    fn delete_buffer(&mut self, _cx: &RenderContext, buffer: u32) {
        self.buffers.remove(&buffer);
    }

    fn issue_readback(
        &mut self,
        _cx: &RenderContext,
        buffer: u32,
        rect: CaptureRect,
    ) -> Result<(), String> {
        if !self.buffers.contains_key(&buffer) {
            return Err(format!("Unknown buffer {}", buffer));
        }
        let mut data = vec![0u8; rect.byte_len()];
        self.copy_region(rect, &mut data)?;
        self.buffers.insert(buffer, Some(data));
        Ok(())
    }

    fn read_mapped(
        &mut self,
        _cx: &RenderContext,
        buffer: u32,
        len: usize,
        read: &mut dyn FnMut(&[u8]),
    ) -> bool {
        self.map_calls += 1;
        if self.failing_maps > 0 {
            self.failing_maps -= 1;
            return false;
        }
        match self.buffers.get(&buffer) {
            Some(Some(data)) if data.len() >= len => {
                read(&data[..len]);
                true
            }
            _ => false,
        }
    }

    fn read_pixels(
        &mut self,
        _cx: &RenderContext,
        rect: CaptureRect,
        dst: &mut [u8],
    ) -> Result<(), String> {
        self.copy_region(rect, dst)
    }
}
