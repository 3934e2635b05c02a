//! Pipelined asynchronous readback through rotating transfer buffers.
//!
//! Each [`BufferPipeline::step`] issues a readback of the current frame into
//! one buffer and harvests the buffer written `N-1` steps earlier, where `N`
//! is the pipeline depth. The GPU gets `N-1` frames to finish a transfer
//! before the CPU touches it, so the render loop never stalls on a readback.
//!
//! Slot roles rotate with the frame counter: at call `k` the write slot is
//! `k % N` and the read slot is `(k - (N-1)) % N`, which is always the slot
//! written `N-1` calls earlier. A failed harvest does not disturb the
//! rotation; the next call still reads the correct slot.
//!
//! Every fresh harvest is also copied into a host-side frame. The write
//! rotation reuses the slot of the last harvest on the very next call, so
//! the fallback serves that copy rather than mapping a slot again.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::PipelineError;
use super::types::{Harvest, RenderContext};
use super::{CaptureRect, TransferDevice};

/// Number of map attempts before falling back to the last good frame.
pub const MAP_ATTEMPTS: u32 = 3;

/// Pause between two map attempts.
pub const MAP_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Number of transfer buffers in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineDepth {
    /// Two buffers, one frame of latency
    Double,
    /// Three buffers, two frames of latency
    #[default]
    Triple,
}

impl PipelineDepth {
    pub fn buffers(self) -> usize {
        match self {
            PipelineDepth::Double => 2,
            PipelineDepth::Triple => 3,
        }
    }

    /// Calls between issuing a transfer and harvesting it.
    pub fn latency(self) -> u64 {
        self.buffers() as u64 - 1
    }
}

/// Bounded retry budget for mapping a transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total map attempts on the expected buffer (at least 1)
    pub attempts: u32,
    /// Sleep between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAP_ATTEMPTS,
            delay: MAP_RETRY_DELAY,
        }
    }
}

/// What a transfer buffer currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Never written since initialization
    Idle,
    /// Readback issued at call `issued_at`, not yet harvested
    Pending { issued_at: u64 },
    /// Readback issued at call `issued_at` and copied out successfully
    Harvested { issued_at: u64 },
}

impl SlotState {
    fn issued_at(self) -> Option<u64> {
        match self {
            SlotState::Idle => None,
            SlotState::Pending { issued_at } | SlotState::Harvested { issued_at } => {
                Some(issued_at)
            }
        }
    }
}

#[derive(Debug)]
struct Slot<B> {
    buffer: B,
    state: SlotState,
}

/// Host-side copy of the last successful harvest.
#[derive(Debug, Default)]
struct LastGood {
    /// Call at which the copied transfer was issued
    frame: Option<u64>,
    /// Top row first
    pixels: Vec<u8>,
}

/// Rotating set of GPU transfer buffers with a last-known-good fallback.
///
/// The pipeline exclusively owns its buffers; they never leave it. All
/// methods take the device and a [`RenderContext`] so they can only run on
/// the render thread.
#[derive(Debug)]
pub struct BufferPipeline<D: TransferDevice> {
    depth: PipelineDepth,
    retry: RetryPolicy,
    slots: Vec<Slot<D::Buffer>>,
    rect: CaptureRect,
    frame_count: u64,
    last_good: LastGood,
}

impl<D: TransferDevice> BufferPipeline<D> {
    /// Create an uninitialized pipeline.
    pub fn new(depth: PipelineDepth, retry: RetryPolicy) -> Self {
        Self {
            depth,
            retry: RetryPolicy {
                attempts: retry.attempts.max(1),
                delay: retry.delay,
            },
            slots: Vec::new(),
            rect: CaptureRect::default(),
            frame_count: 0,
            last_good: LastGood::default(),
        }
    }

    pub fn depth(&self) -> PipelineDepth {
        self.depth
    }

    pub fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Rectangle the buffers are sized for.
    pub fn rect(&self) -> CaptureRect {
        self.rect
    }

    /// Number of steps since initialization.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Call at which the cached last-good frame was issued.
    pub fn last_good_frame(&self) -> Option<u64> {
        self.last_good.frame
    }

    pub fn has_valid_last_frame(&self) -> bool {
        self.last_good.frame.is_some()
    }

    /// Allocate the transfer buffers for `rect`.
    ///
    /// Buffers from a previous initialization are released first, so this is
    /// also the resize path.
    pub fn initialize(
        &mut self,
        device: &mut D,
        cx: &RenderContext,
        rect: CaptureRect,
    ) -> Result<(), PipelineError> {
        if self.is_initialized() {
            self.shutdown(device, cx);
        }

        if rect.is_empty() {
            return Err(PipelineError::AllocationFailed(format!(
                "empty capture rectangle {}x{}",
                rect.width, rect.height
            )));
        }

        let mut slots = Vec::with_capacity(self.depth.buffers());
        for _ in 0..self.depth.buffers() {
            match device.create_buffer(cx) {
                Ok(buffer) => slots.push(Slot {
                    buffer,
                    state: SlotState::Idle,
                }),
                Err(e) => {
                    for slot in slots {
                        device.delete_buffer(cx, slot.buffer);
                    }
                    return Err(PipelineError::AllocationFailed(e));
                }
            }
        }

        self.slots = slots;
        self.rect = rect;
        self.frame_count = 0;
        self.last_good.frame = None;

        info!(
            "Capture pipeline initialized: {} buffers, {}x{}",
            self.slots.len(),
            rect.width,
            rect.height
        );
        Ok(())
    }

    /// Release all buffers and reset the cursor. No-op when never initialized.
    pub fn shutdown(&mut self, device: &mut D, cx: &RenderContext) {
        if !self.slots.is_empty() {
            for slot in self.slots.drain(..) {
                device.delete_buffer(cx, slot.buffer);
            }
            debug!("Capture pipeline buffers released");
        }
        self.frame_count = 0;
        self.last_good = LastGood::default();
    }

    /// Issue a readback of the current frame and harvest an older one.
    ///
    /// `out` receives the harvested frame top row first and must hold at least
    /// `rect().byte_len()` bytes. Returns [`Harvest::Priming`] without touching
    /// `out` until `N-1` transfers are in flight.
    pub fn step(
        &mut self,
        device: &mut D,
        cx: &RenderContext,
        out: &mut [u8],
    ) -> Result<Harvest, PipelineError> {
        if !self.is_initialized() {
            return Err(PipelineError::NotInitialized);
        }

        let needed = self.rect.byte_len();
        if out.len() < needed {
            return Err(PipelineError::BufferTooSmall {
                needed,
                got: out.len(),
            });
        }

        let n = self.slots.len() as u64;
        let write = (self.frame_count % n) as usize;

        device
            .issue_readback(cx, self.slots[write].buffer, self.rect)
            .map_err(PipelineError::Transfer)?;
        self.slots[write].state = SlotState::Pending {
            issued_at: self.frame_count,
        };

        let latency = self.depth.latency();
        let result = if self.frame_count < latency {
            debug!(frame = self.frame_count, "Capture pipeline priming");
            Ok(Harvest::Priming)
        } else {
            let read = ((self.frame_count - latency) % n) as usize;
            self.harvest(device, cx, read, out)
        };

        self.frame_count += 1;
        result
    }

    /// Map `read` with retries, falling back to the cached last good frame.
    fn harvest(
        &mut self,
        device: &mut D,
        cx: &RenderContext,
        read: usize,
        out: &mut [u8],
    ) -> Result<Harvest, PipelineError> {
        let attempts = self.retry.attempts;
        for attempt in 1..=attempts {
            if self.map_slot(device, cx, read, out) {
                let issued_at = self.slots[read].state.issued_at().unwrap_or(0);
                self.slots[read].state = SlotState::Harvested { issued_at };
                self.remember(issued_at, out)?;
                return Ok(Harvest::Fresh { frame: issued_at });
            }

            if attempt < attempts {
                warn!("Buffer mapping failed, retrying ({}/{})...", attempt, attempts);
                thread::sleep(self.retry.delay);
            } else {
                warn!("Buffer mapping failed after {} attempts", attempts);
            }
        }

        let Some(frame) = self.last_good.frame else {
            warn!("No previous good frame available");
            return Err(PipelineError::NoDataAvailable);
        };

        let len = self.last_good.pixels.len();
        out[..len].copy_from_slice(&self.last_good.pixels);
        info!("Using last successful frame from call {}", frame);
        Ok(Harvest::Stale { frame })
    }

    /// Copy a fresh harvest into the last-good frame.
    fn remember(&mut self, frame: u64, harvested: &[u8]) -> Result<(), PipelineError> {
        let len = self.rect.byte_len();
        let cache = &mut self.last_good.pixels;
        if cache.len() != len {
            cache.clear();
            cache
                .try_reserve_exact(len)
                .map_err(|e| PipelineError::AllocationFailed(e.to_string()))?;
            cache.resize(len, 0);
        }
        cache.copy_from_slice(&harvested[..len]);
        self.last_good.frame = Some(frame);
        Ok(())
    }

    fn map_slot(&self, device: &mut D, cx: &RenderContext, slot: usize, out: &mut [u8]) -> bool {
        let row_bytes = self.rect.row_bytes();
        let height = self.rect.height as usize;
        let len = self.rect.byte_len();
        device.read_mapped(cx, self.slots[slot].buffer, len, &mut |src| {
            flip_rows_into(src, out, row_bytes, height)
        })
    }
}

/// Copy `height` rows of `row_bytes` from bottom-up `src` into top-down `dst`.
///
/// Destination row `height - 1 - y` receives source row `y`.
pub fn flip_rows_into(src: &[u8], dst: &mut [u8], row_bytes: usize, height: usize) {
    for y in 0..height {
        let flipped = height - 1 - y;
        let src_row = &src[y * row_bytes..(y + 1) * row_bytes];
        dst[flipped * row_bytes..(flipped + 1) * row_bytes].copy_from_slice(src_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SoftwareDevice;

    const W: u32 = 4;
    const H: u32 = 3;

    fn no_delay() -> RetryPolicy {
        RetryPolicy {
            attempts: MAP_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }

    fn setup(depth: PipelineDepth) -> (SoftwareDevice, BufferPipeline<SoftwareDevice>, RenderContext) {
        let mut device = SoftwareDevice::new(W, H);
        let cx = device.current_context().unwrap();
        let mut pipeline = BufferPipeline::new(depth, no_delay());
        pipeline
            .initialize(&mut device, &cx, CaptureRect::from_size(W, H))
            .unwrap();
        (device, pipeline, cx)
    }

    /// Paint the whole framebuffer with `marker` in every byte.
    fn paint(device: &mut SoftwareDevice, marker: u64) {
        device.clear([marker as u8; 4]);
    }

    #[test]
    fn test_triple_harvest_lags_two_calls() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];

        for k in 0..10u64 {
            paint(&mut device, k + 1);
            let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
            if k < 2 {
                assert_eq!(harvest, Harvest::Priming);
            } else {
                assert_eq!(harvest, Harvest::Fresh { frame: k - 2 });
                assert!(out.iter().all(|&b| b == (k - 2 + 1) as u8));
            }
        }
        assert_eq!(pipeline.frame_count(), 10);
    }

    #[test]
    fn test_double_harvest_lags_one_call() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Double);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];

        paint(&mut device, 1);
        assert_eq!(
            pipeline.step(&mut device, &cx, &mut out).unwrap(),
            Harvest::Priming
        );
        for k in 1..6u64 {
            paint(&mut device, k + 1);
            let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
            assert_eq!(harvest, Harvest::Fresh { frame: k - 1 });
            assert_eq!(out[0], k as u8);
        }
    }

    #[test]
    fn test_priming_leaves_output_untouched() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0xAAu8; CaptureRect::from_size(W, H).byte_len()];
        paint(&mut device, 7);

        pipeline.step(&mut device, &cx, &mut out).unwrap();
        pipeline.step(&mut device, &cx, &mut out).unwrap();

        assert!(out.iter().all(|&b| b == 0xAA));
        assert!(!pipeline.has_valid_last_frame());
    }

    #[test]
    fn test_flip_moves_first_row_to_bottom() {
        let row_bytes = W as usize * 4;
        let mut src = vec![0u8; row_bytes * H as usize];
        src[..4].copy_from_slice(&[9, 8, 7, 6]);
        let mut dst = vec![0u8; src.len()];

        flip_rows_into(&src, &mut dst, row_bytes, H as usize);

        let bottom_left = (H as usize - 1) * row_bytes;
        assert_eq!(&dst[bottom_left..bottom_left + 4], &[9, 8, 7, 6]);
        assert_eq!(&dst[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_harvest_preserves_orientation() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Double);
        let rect = CaptureRect::from_size(W, H);
        let mut image = vec![0u8; rect.byte_len()];
        image[..4].copy_from_slice(&[255, 1, 2, 3]);
        device.present(&image).unwrap();

        let mut out = vec![0u8; rect.byte_len()];
        pipeline.step(&mut device, &cx, &mut out).unwrap();
        pipeline.step(&mut device, &cx, &mut out).unwrap();

        // Top-left of the presented image is top-left of the harvested one
        assert_eq!(&out[..4], &[255, 1, 2, 3]);
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_retry_recovers_within_budget() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];
        for k in 0..2 {
            paint(&mut device, k + 1);
            pipeline.step(&mut device, &cx, &mut out).unwrap();
        }

        device.fail_next_maps(MAP_ATTEMPTS - 1);
        paint(&mut device, 3);
        let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();

        assert_eq!(harvest, Harvest::Fresh { frame: 0 });
        assert_eq!(out[0], 1);
    }

    #[test]
    fn test_fallback_serves_cached_frame() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];
        for k in 0..3 {
            paint(&mut device, k + 1);
            pipeline.step(&mut device, &cx, &mut out).unwrap();
        }
        // Call 2 harvested the transfer from call 0, painted with 1
        assert_eq!(pipeline.last_good_frame(), Some(0));
        assert!(out.iter().all(|&b| b == 1));

        // Call 3 writes into the slot call 0 used, then every map fails
        device.fail_next_maps(MAP_ATTEMPTS);
        out.fill(0);
        paint(&mut device, 4);
        let maps_before = device.map_calls();
        let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();

        assert_eq!(harvest, Harvest::Stale { frame: 0 });
        assert!(out.iter().all(|&b| b == 1));
        // The fallback is served from host memory, not by mapping again
        assert_eq!(device.map_calls() - maps_before, MAP_ATTEMPTS as u64);
        assert_eq!(pipeline.last_good_frame(), Some(0));

        // Rotation is unaffected: the next call reads the transfer from call 2
        paint(&mut device, 5);
        let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
        assert_eq!(harvest, Harvest::Fresh { frame: 2 });
        assert!(out.iter().all(|&b| b == 3));
        assert_eq!(pipeline.last_good_frame(), Some(2));
    }

    #[test]
    fn test_total_failure_without_fallback() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];
        for k in 0..2 {
            paint(&mut device, k + 1);
            pipeline.step(&mut device, &cx, &mut out).unwrap();
        }

        device.fail_next_maps(MAP_ATTEMPTS);
        let result = pipeline.step(&mut device, &cx, &mut out);

        assert_eq!(result, Err(PipelineError::NoDataAvailable));
        assert_eq!(pipeline.frame_count(), 3);
        assert!(!pipeline.has_valid_last_frame());

        // Next call harvests the transfer issued at call 1
        let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
        assert_eq!(harvest, Harvest::Fresh { frame: 1 });
        assert_eq!(out[0], 2);
    }

    #[test]
    fn test_repeated_failures_keep_serving_cached_frame() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Double);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];
        for k in 0..2 {
            paint(&mut device, k + 1);
            pipeline.step(&mut device, &cx, &mut out).unwrap();
        }
        assert_eq!(pipeline.last_good_frame(), Some(0));

        for marker in [9, 10] {
            device.fail_next_maps(MAP_ATTEMPTS);
            paint(&mut device, marker);
            out.fill(0);
            let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
            assert_eq!(harvest, Harvest::Stale { frame: 0 });
            assert!(out.iter().all(|&b| b == 1));
        }

        // Call 4 harvests the transfer issued at call 3
        paint(&mut device, 11);
        let harvest = pipeline.step(&mut device, &cx, &mut out).unwrap();
        assert_eq!(harvest, Harvest::Fresh { frame: 3 });
        assert!(out.iter().all(|&b| b == 10));
    }

    #[test]
    fn test_shutdown_then_initialize_resets_cursor() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        let mut out = vec![0u8; CaptureRect::from_size(W, H).byte_len()];
        for k in 0..5 {
            paint(&mut device, k + 1);
            pipeline.step(&mut device, &cx, &mut out).unwrap();
        }
        assert!(pipeline.has_valid_last_frame());

        pipeline.shutdown(&mut device, &cx);
        assert_eq!(pipeline.frame_count(), 0);
        assert!(!pipeline.has_valid_last_frame());
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(
            pipeline.step(&mut device, &cx, &mut out),
            Err(PipelineError::NotInitialized)
        );

        pipeline
            .initialize(&mut device, &cx, CaptureRect::from_size(W, H))
            .unwrap();
        out.fill(0);
        assert_eq!(
            pipeline.step(&mut device, &cx, &mut out).unwrap(),
            Harvest::Priming
        );
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_shutdown_without_initialize_is_noop() {
        let mut device = SoftwareDevice::new(W, H);
        let cx = device.current_context().unwrap();
        let mut pipeline: BufferPipeline<SoftwareDevice> =
            BufferPipeline::new(PipelineDepth::Triple, no_delay());

        pipeline.shutdown(&mut device, &cx);
        pipeline.shutdown(&mut device, &cx);

        assert!(!pipeline.is_initialized());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_reinitialize_releases_stale_buffers() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Triple);
        assert_eq!(device.live_buffers(), 3);

        pipeline
            .initialize(&mut device, &cx, CaptureRect::from_size(2, 2))
            .unwrap();

        assert_eq!(device.live_buffers(), 3);
        assert_eq!(pipeline.rect(), CaptureRect::from_size(2, 2));
    }

    #[test]
    fn test_rejects_small_destination() {
        let (mut device, mut pipeline, cx) = setup(PipelineDepth::Double);
        let mut out = vec![0u8; 8];
        assert_eq!(
            pipeline.step(&mut device, &cx, &mut out),
            Err(PipelineError::BufferTooSmall {
                needed: CaptureRect::from_size(W, H).byte_len(),
                got: 8
            })
        );
        assert_eq!(pipeline.frame_count(), 0);
    }

    #[test]
    fn test_allocation_failure_releases_partial_buffers() {
        let mut device = SoftwareDevice::new(W, H);
        let cx = device.current_context().unwrap();
        device.limit_buffers(2);
        let mut pipeline = BufferPipeline::new(PipelineDepth::Triple, no_delay());

        let result = pipeline.initialize(&mut device, &cx, CaptureRect::from_size(W, H));

        assert!(matches!(result, Err(PipelineError::AllocationFailed(_))));
        assert_eq!(device.live_buffers(), 0);
        assert!(!pipeline.is_initialized());
    }
}
