//! Capture driver: owns the transfer device and its buffer pipeline.

use tracing::debug;

use super::error::PipelineError;
use super::pipeline::{flip_rows_into, BufferPipeline, PipelineDepth, RetryPolicy};
use super::types::{Harvest, RenderContext};
use super::{CaptureRect, TransferDevice};

/// Runs one pipeline step per call against the device's render target.
///
/// Also provides the blocking single-shot readback used when the pipeline has
/// nothing to harvest yet, or when pipelined capture is disabled.
#[derive(Debug)]
pub struct CaptureDriver<D: TransferDevice> {
    device: D,
    pipeline: BufferPipeline<D>,
    /// Scratch space for blocking readbacks (bottom row first)
    staging: Vec<u8>,
}

impl<D: TransferDevice> CaptureDriver<D> {
    pub fn new(device: D, depth: PipelineDepth, retry: RetryPolicy) -> Self {
        Self {
            device,
            pipeline: BufferPipeline::new(depth, retry),
            staging: Vec::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pipeline(&self) -> &BufferPipeline<D> {
        &self.pipeline
    }

    /// Token for the current thread, or `NoContext`.
    pub fn context(&self) -> Result<RenderContext, PipelineError> {
        self.device.current_context().ok_or(PipelineError::NoContext)
    }

    /// Full render target as a capture rectangle.
    pub fn output_rect(&self, cx: &RenderContext) -> CaptureRect {
        let (width, height) = self.device.output_size(cx);
        CaptureRect::from_size(width, height)
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_initialized()
    }

    /// Whether the pipeline buffers match the current render target.
    pub fn matches_output(&self, cx: &RenderContext) -> bool {
        self.pipeline.is_initialized() && self.pipeline.rect() == self.output_rect(cx)
    }

    /// (Re)allocate the pipeline for the current render target size.
    pub fn initialize(&mut self, cx: &RenderContext) -> Result<CaptureRect, PipelineError> {
        let rect = self.output_rect(cx);
        self.pipeline.initialize(&mut self.device, cx, rect)?;
        Ok(rect)
    }

    pub fn shutdown(&mut self, cx: &RenderContext) {
        self.pipeline.shutdown(&mut self.device, cx);
        self.staging = Vec::new();
    }

    /// One pipelined readback step into `out` (top row first).
    pub fn step(&mut self, cx: &RenderContext, out: &mut [u8]) -> Result<Harvest, PipelineError> {
        self.pipeline.step(&mut self.device, cx, out)
    }

    /// Blocking readback of `rect` into `out` (top row first).
    ///
    /// Stalls until the GPU has finished the frame; only used when no
    /// pipelined data is available.
    pub fn read_blocking(
        &mut self,
        cx: &RenderContext,
        rect: CaptureRect,
        out: &mut [u8],
    ) -> Result<(), PipelineError> {
        let len = rect.byte_len();
        if out.len() < len {
            return Err(PipelineError::BufferTooSmall {
                needed: len,
                got: out.len(),
            });
        }

        if self.staging.len() != len {
            self.staging.clear();
            self.staging
                .try_reserve_exact(len)
                .map_err(|e| PipelineError::AllocationFailed(e.to_string()))?;
            self.staging.resize(len, 0);
        }

        self.device
            .read_pixels(cx, rect, &mut self.staging)
            .map_err(PipelineError::Transfer)?;
        flip_rows_into(&self.staging, out, rect.row_bytes(), rect.height as usize);

        debug!("Blocking readback of {}x{} complete", rect.width, rect.height);
        Ok(())
    }
}
