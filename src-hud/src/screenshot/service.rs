//! Render-thread side of the screenshot path.
//!
//! [`ScreenshotService`] owns the capture driver and is stepped once per
//! frame by the render loop: [`ScreenshotService::step_frame`] advances the
//! readback pipeline, then [`ScreenshotService::process_pending_screenshots`]
//! encodes the latest harvest if a request is waiting. Other threads only
//! ever see a [`ScreenshotRequester`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use mirage_common::DisplaySettings;
use tracing::{debug, error, info, warn};

use super::naming::{resolve_output_path, timestamp_now};
use super::request::{RequestQueue, ScreenshotRequester};
use crate::capture::{
    CameraFrame, CameraSource, CaptureDriver, CaptureError, CaptureRect, Harvest, TransferDevice,
};
use crate::config::{HudConfig, OverlayCaptureMode, SnapshotConfig};
use crate::encoder::{CropMargins, ImageEncoder, ImageProcessParams};
use crate::notify::{viewing_completed_payload, Notifier, VIEWING_TOPIC};

/// A capture that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    /// Width of the written image
    pub width: u32,
    /// Height of the written image
    pub height: u32,
    /// The pixels came from the last good transfer buffer, not this frame
    pub stale: bool,
}

/// Drains screenshot requests and turns them into image files.
pub struct ScreenshotService<D: TransferDevice> {
    driver: CaptureDriver<D>,
    queue: Arc<RequestQueue>,
    output_dir: Arc<RwLock<PathBuf>>,
    display: DisplaySettings,
    snapshot: SnapshotConfig,
    overlay_mode: OverlayCaptureMode,
    camera: Arc<dyn CameraSource>,
    encoder: Box<dyn ImageEncoder>,
    notifier: Arc<dyn Notifier>,
    /// Top-down copy of the composited output
    scratch: Vec<u8>,
    /// Result of the last pipeline step; `scratch` holds its pixels
    latest: Option<Result<Harvest, CaptureError>>,
}

impl<D: TransferDevice> ScreenshotService<D> {
    /// Create the service on the render thread.
    pub fn new(
        device: D,
        config: &HudConfig,
        output_dir: PathBuf,
        camera: Arc<dyn CameraSource>,
        encoder: Box<dyn ImageEncoder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            driver: CaptureDriver::new(
                device,
                config.capture.depth,
                config.capture.retry_policy(),
            ),
            queue: Arc::new(RequestQueue::new()),
            output_dir: Arc::new(RwLock::new(output_dir)),
            display: config.display.clone(),
            snapshot: config.snapshot.clone(),
            overlay_mode: config.capture.overlay_mode,
            camera,
            encoder,
            notifier,
            scratch: Vec::new(),
            latest: None,
        }
    }

    /// Handle for submitting requests from other threads.
    pub fn requester(&self) -> ScreenshotRequester {
        ScreenshotRequester::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.output_dir),
            self.display.snapshot_overlay,
        )
    }

    pub fn driver(&self) -> &CaptureDriver<D> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut CaptureDriver<D> {
        &mut self.driver
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the base directory for generated filenames.
    pub fn set_output_dir(&self, dir: PathBuf) {
        info!("Screenshot directory set to {}", dir.display());
        *self.output_dir.write().unwrap_or_else(PoisonError::into_inner) = dir;
    }

    /// Allocate transfer buffers for the current render target.
    ///
    /// Call after the render surface is created and again after a resize.
    pub fn initialize_capture_pipeline(&mut self) -> Result<(), CaptureError> {
        let cx = self.driver.context()?;
        let rect = self.driver.initialize(&cx)?;
        self.latest = None;
        info!(
            "Capture pipeline ready: {}x{}, {:?} buffering",
            rect.width,
            rect.height,
            self.driver.pipeline().depth()
        );
        Ok(())
    }

    /// Release transfer buffers. Call before the render surface goes away.
    pub fn shutdown_capture_pipeline(&mut self) {
        match self.driver.context() {
            Ok(cx) => {
                self.driver.shutdown(&cx);
                self.scratch = Vec::new();
                self.latest = None;
            }
            Err(e) => warn!("Cannot release capture buffers: {}", e),
        }
    }

    /// Advance the readback pipeline by one frame.
    ///
    /// Call once per render-loop iteration after the frame is drawn and
    /// before [`process_pending_screenshots`](Self::process_pending_screenshots).
    /// Reallocates the buffers when the render target changed size. Does
    /// nothing in blocking overlay mode.
    pub fn step_frame(&mut self) {
        if self.overlay_mode != OverlayCaptureMode::Pipelined {
            return;
        }
        let result = self.advance_pipeline();
        if let Err(e) = &result {
            debug!("Capture pipeline step failed: {}", e);
        }
        self.latest = Some(result);
    }

    fn advance_pipeline(&mut self) -> Result<Harvest, CaptureError> {
        let cx = self.driver.context()?;
        if !self.driver.matches_output(&cx) {
            let rect = self.driver.initialize(&cx)?;
            debug!("Capture pipeline sized to {}x{}", rect.width, rect.height);
        }
        let rect = self.driver.output_rect(&cx);
        self.reserve_scratch(rect)?;
        Ok(self.driver.step(&cx, &mut self.scratch)?)
    }

    /// Run the pending request, if any. Called once per render-loop iteration.
    ///
    /// Returns `None` when nothing was pending.
    pub fn process_pending_screenshots(
        &mut self,
        no_camera_mode: bool,
    ) -> Option<Result<CaptureOutcome, CaptureError>> {
        let request = self.queue.drain()?;

        let path = resolve_output_path(
            request.path.as_deref(),
            request.source,
            &self.output_dir(),
            &timestamp_now(),
        );
        info!(
            "Taking screenshot: {} (source: {}, overlay: {}, full res: {})",
            path.display(),
            request.source,
            request.with_overlay,
            request.full_resolution
        );

        let result = self.capture(
            request.with_overlay,
            no_camera_mode,
            request.full_resolution,
            &path,
        );

        match &result {
            Ok(outcome) => {
                info!("Screenshot saved to: {}", outcome.path.display());
                if request.source.is_remote() {
                    let payload = viewing_completed_payload(&outcome.path);
                    debug!("Sending: {}", payload);
                    self.notifier.notify(VIEWING_TOPIC, &payload);
                }
            }
            Err(e) => error!("Screenshot from {} failed: {}", request.source, e),
        }

        Some(result)
    }

    /// Capture one image to `path`.
    pub fn capture(
        &mut self,
        with_overlay: bool,
        no_camera_mode: bool,
        full_resolution: bool,
        path: &Path,
    ) -> Result<CaptureOutcome, CaptureError> {
        if with_overlay {
            self.capture_overlay(full_resolution, path)
        } else {
            self.capture_camera(no_camera_mode, full_resolution, path)
        }
    }

    fn target_size(&self, full_size: (u32, u32), full_resolution: bool) -> ((u32, u32), u8) {
        if full_resolution {
            (full_size, self.snapshot.full_quality)
        } else {
            (
                (self.snapshot.width, self.snapshot.height),
                self.snapshot.quality,
            )
        }
    }

    /// Composited output, left eye only.
    fn capture_overlay(
        &mut self,
        full_resolution: bool,
        path: &Path,
    ) -> Result<CaptureOutcome, CaptureError> {
        let cx = self.driver.context()?;
        let rect = self.driver.output_rect(&cx);
        if rect.is_empty() {
            return Err(CaptureError::InvalidParameters(
                "Render target has no pixels".to_string(),
            ));
        }
        self.reserve_scratch(rect)?;

        let stale = match self.overlay_mode {
            OverlayCaptureMode::Blocking => {
                self.driver.read_blocking(&cx, rect, &mut self.scratch)?;
                false
            }
            OverlayCaptureMode::Pipelined => {
                // A harvest only describes `scratch` while the buffers still
                // match the render target
                let current = self.driver.matches_output(&cx);
                match &self.latest {
                    Some(Ok(harvest)) if current && harvest.has_data() => {
                        if let Harvest::Stale { frame } = harvest {
                            warn!("Capturing last good frame from pipeline call {}", frame);
                        }
                        harvest.is_stale()
                    }
                    Some(Err(CaptureError::TransferNotReady)) if current => {
                        return Err(CaptureError::TransferNotReady);
                    }
                    _ => {
                        debug!("No pipelined frame available, using blocking readback");
                        self.driver.read_blocking(&cx, rect, &mut self.scratch)?;
                        false
                    }
                }
            }
        };

        let eye_width = rect.width / 2;
        let ((width, height), quality) =
            self.target_size((eye_width, rect.height), full_resolution);
        let params = ImageProcessParams {
            pixels: &self.scratch[..rect.byte_len()],
            width: rect.width,
            height: rect.height,
            crop: CropMargins {
                right: rect.width - eye_width,
                ..Default::default()
            },
            target_width: width,
            target_height: height,
            quality,
            path,
        };
        self.encoder.encode_and_save(&params)?;

        Ok(CaptureOutcome {
            path: path.to_path_buf(),
            width,
            height,
            stale,
        })
    }

    /// Raw camera or recording frame, trimmed by the camera margin on both sides.
    fn capture_camera(
        &mut self,
        no_camera_mode: bool,
        full_resolution: bool,
        path: &Path,
    ) -> Result<CaptureOutcome, CaptureError> {
        let crop_x = self.display.cam_crop_x;
        let snapshot = (self.snapshot.width, self.snapshot.height);
        let (full_quality, quality) = (self.snapshot.full_quality, self.snapshot.quality);
        let encoder = &self.encoder;
        let mut written = None;

        self.camera
            .with_latest_frame(no_camera_mode, &mut |frame: CameraFrame<'_>| {
                let (size, quality) = if full_resolution {
                    (
                        (
                            frame.width.saturating_sub(crop_x.saturating_mul(2)),
                            frame.height,
                        ),
                        full_quality,
                    )
                } else {
                    (snapshot, quality)
                };
                let params = ImageProcessParams {
                    pixels: frame.pixels,
                    width: frame.width,
                    height: frame.height,
                    crop: CropMargins {
                        left: crop_x,
                        right: crop_x,
                        ..Default::default()
                    },
                    target_width: size.0,
                    target_height: size.1,
                    quality,
                    path,
                };
                encoder.encode_and_save(&params)?;
                written = Some(size);
                Ok(())
            })?;

        let (width, height) = written.ok_or(CaptureError::NoFrameAvailable)?;
        Ok(CaptureOutcome {
            path: path.to_path_buf(),
            width,
            height,
            stale: false,
        })
    }

    fn reserve_scratch(&mut self, rect: CaptureRect) -> Result<(), CaptureError> {
        let len = rect.byte_len();
        if self.scratch.len() != len {
            self.scratch.clear();
            self.scratch
                .try_reserve_exact(len)
                .map_err(|e| CaptureError::AllocationFailed(e.to_string()))?;
            self.scratch.resize(len, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SharedVideoOutput, SoftwareDevice};
    use crate::encoder::JpegFileEncoder;
    use crate::notify::{BroadcastNotifier, Notification};
    use crate::screenshot::{RejectReason, SubmitOutcome};
    use mirage_common::ScreenshotSource;
    use std::fs;
    use tokio::sync::broadcast::{error::TryRecvError, Receiver};

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const YELLOW: [u8; 4] = [255, 255, 0, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    /// Centre pixel of a written JPEG, compared with some slack for the codec.
    fn assert_center_is(path: &Path, rgba: [u8; 4]) {
        let decoded = image::open(path).unwrap().to_rgb8();
        let (w, h) = decoded.dimensions();
        let px = decoded.get_pixel(w / 2, h / 2);
        let close = (0..3).all(|c| (px[c] as i16 - rgba[c] as i16).abs() < 40);
        assert!(close, "expected {:?}, got {:?}", rgba, px);
    }

    /// Draw one solid frame and advance the pipeline.
    fn render_frame(h: &mut Harness, rgba: [u8; 4]) {
        h.service.driver_mut().device_mut().clear(rgba);
        h.service.step_frame();
    }

    struct Harness {
        service: ScreenshotService<SoftwareDevice>,
        video: Arc<SharedVideoOutput>,
        rx: Receiver<Notification>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn test_config() -> HudConfig {
        let mut config = HudConfig::default();
        config.capture.retry_delay_ms = 0;
        config.snapshot.width = 16;
        config.snapshot.height = 16;
        config
    }

    fn harness_with(name: &str, config: HudConfig, encoder: Box<dyn ImageEncoder>) -> Harness {
        let dir = std::env::temp_dir().join(format!(
            "mirage-screenshot-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        // Stereo target: two 32x32 eyes, left red, right blue
        let mut device = SoftwareDevice::new(64, 32);
        device.fill_rect(0, 0, 32, 32, RED);
        device.fill_rect(32, 0, 32, 32, BLUE);

        let video = Arc::new(SharedVideoOutput::new());
        let notifier = BroadcastNotifier::new(8);
        let rx = notifier.subscribe();

        let service = ScreenshotService::new(
            device,
            &config,
            dir.clone(),
            video.clone(),
            encoder,
            Arc::new(notifier),
        );
        Harness {
            service,
            video,
            rx,
            dir,
        }
    }

    fn harness(name: &str) -> Harness {
        harness_with(name, test_config(), Box::new(JpegFileEncoder::new()))
    }

    fn jpg_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|e| e == "jpg").unwrap_or(false))
            .collect();
        files.sort();
        files
    }

    fn publish_camera(video: &SharedVideoOutput, width: u32, height: u32) {
        let pixels = RED.repeat((width * height) as usize);
        video.publish_camera_frame(width, height, pixels).unwrap();
    }

    struct FailingEncoder;

    impl ImageEncoder for FailingEncoder {
        fn encode_and_save(&self, _params: &ImageProcessParams<'_>) -> Result<(), CaptureError> {
            Err(CaptureError::EncodeFailed("disk full".to_string()))
        }
    }

    #[test]
    fn test_mqtt_snapshot_writes_one_file_and_notifies() {
        let mut h = harness("mqtt");
        publish_camera(&h.video, 40, 20);
        let requester = h.service.requester();

        assert!(requester
            .submit_screenshot(false, false, None, ScreenshotSource::Mqtt)
            .is_accepted());
        let outcome = h.service.process_pending_screenshots(false).unwrap().unwrap();

        let files = jpg_files(&h.dir);
        assert_eq!(files, vec![outcome.path.clone()]);
        let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("snapshot-"), "{}", name);
        assert_eq!((outcome.width, outcome.height), (16, 16));

        let message = h.rx.try_recv().unwrap();
        assert_eq!(message.topic, VIEWING_TOPIC);
        let payload: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(payload["value"], &*outcome.path.to_string_lossy());
        assert!(matches!(h.rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_back_to_back_submits_capture_once() {
        let mut h = harness("busy");
        publish_camera(&h.video, 40, 20);
        let requester = h.service.requester();

        assert!(requester
            .submit_screenshot(false, false, None, ScreenshotSource::Mqtt)
            .is_accepted());
        assert_eq!(
            requester.submit_screenshot(true, true, None, ScreenshotSource::Manual),
            SubmitOutcome::Rejected(RejectReason::Busy)
        );

        assert!(h.service.process_pending_screenshots(false).unwrap().is_ok());
        assert!(h.service.process_pending_screenshots(false).is_none());
        assert_eq!(jpg_files(&h.dir).len(), 1);
    }

    #[test]
    fn test_manual_overlay_capture_is_left_eye() {
        let mut h = harness("overlay");
        let requester = h.service.requester();

        assert!(requester
            .submit_screenshot(true, true, None, ScreenshotSource::Manual)
            .is_accepted());
        let outcome = h.service.process_pending_screenshots(true).unwrap().unwrap();

        assert_eq!((outcome.width, outcome.height), (32, 32));
        assert!(!outcome.stale);
        let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("screenshot-"), "{}", name);

        let decoded = image::open(&outcome.path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        let center = decoded.get_pixel(16, 16);
        assert!(center[0] > 200 && center[2] < 60, "expected red, got {:?}", center);

        // Manual captures never notify
        assert!(matches!(h.rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_overlay_keeps_top_row_on_top() {
        let mut h = harness("orientation");
        {
            let device = h.service.driver_mut().device_mut();
            device.clear(BLUE);
            device.fill_rect(0, 0, 64, 8, RED);
        }
        let path = h.dir.join("top.jpg");
        h.service.capture(true, false, true, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgb8();
        let top = decoded.get_pixel(16, 2);
        let bottom = decoded.get_pixel(16, 29);
        assert!(top[0] > 200 && top[2] < 60, "expected red top, got {:?}", top);
        assert!(bottom[2] > 200 && bottom[0] < 60, "expected blue bottom, got {:?}", bottom);
    }

    #[test]
    fn test_pipelined_capture_lags_by_pipeline_latency() {
        let mut h = harness("pipelined");
        let colors = [RED, BLUE, GREEN, YELLOW, WHITE];

        for (k, &color) in colors.iter().enumerate() {
            render_frame(&mut h, color);
            let path = h.dir.join(format!("frame-{}.jpg", k));
            let outcome = h.service.capture(true, false, true, &path).unwrap();
            assert!(!outcome.stale);

            // While priming the frame is read back directly; after that the
            // capture shows the frame drawn two steps earlier
            let expected = if k < 2 { color } else { colors[k - 2] };
            assert_center_is(&path, expected);
        }
        assert_eq!(h.service.driver().pipeline().frame_count(), 5);
    }

    #[test]
    fn test_pipeline_advances_without_requests() {
        let mut h = harness("idle-frames");
        for color in [RED, RED, RED, BLUE, GREEN, YELLOW] {
            render_frame(&mut h, color);
        }
        assert_eq!(h.service.driver().pipeline().frame_count(), 6);

        // The request sees the latest harvest, not one from an earlier capture
        let path = h.dir.join("latest.jpg");
        h.service.capture(true, false, true, &path).unwrap();
        assert_center_is(&path, BLUE);
    }

    #[test]
    fn test_stale_fallback_is_reported() {
        let mut h = harness("stale");
        for color in [RED, GREEN, BLUE] {
            render_frame(&mut h, color);
        }

        // Every retry on the expected buffer fails; the cached frame is used
        h.service.driver_mut().device_mut().fail_next_maps(3);
        render_frame(&mut h, YELLOW);
        let path = h.dir.join("frame.jpg");
        let outcome = h.service.capture(true, false, true, &path).unwrap();
        assert!(outcome.stale);
        assert_center_is(&path, RED);
    }

    #[test]
    fn test_map_failure_without_fallback() {
        let mut h = harness("not-ready");
        let path = h.dir.join("frame.jpg");
        render_frame(&mut h, RED);
        render_frame(&mut h, GREEN);

        h.service.driver_mut().device_mut().fail_next_maps(3);
        render_frame(&mut h, BLUE);
        assert_eq!(
            h.service.capture(true, false, false, &path),
            Err(CaptureError::TransferNotReady)
        );
        // The pipeline recovers on the next frame
        render_frame(&mut h, YELLOW);
        let outcome = h.service.capture(true, false, true, &path).unwrap();
        assert!(!outcome.stale);
        assert_center_is(&path, GREEN);
    }

    #[test]
    fn test_blocking_mode_skips_pipeline() {
        let mut config = test_config();
        config.capture.overlay_mode = OverlayCaptureMode::Blocking;
        let mut h = harness_with("blocking", config, Box::new(JpegFileEncoder::new()));

        h.service.step_frame();
        let path = h.dir.join("frame.jpg");
        let outcome = h.service.capture(true, false, true, &path).unwrap();
        assert_eq!((outcome.width, outcome.height), (32, 32));
        assert!(!h.service.driver().is_initialized());
    }

    #[test]
    fn test_context_lost_fails_without_notification() {
        let mut h = harness("context");
        h.service.initialize_capture_pipeline().unwrap();
        h.service.driver_mut().device_mut().set_context_lost(true);

        let requester = h.service.requester();
        assert!(requester
            .submit_screenshot(true, false, None, ScreenshotSource::Mqtt)
            .is_accepted());
        assert_eq!(
            h.service.process_pending_screenshots(false),
            Some(Err(CaptureError::ContextUnavailable))
        );
        assert!(jpg_files(&h.dir).is_empty());
        assert!(matches!(h.rx.try_recv(), Err(TryRecvError::Empty)));

        // Pipeline stays usable once the context is back
        h.service.driver_mut().device_mut().set_context_lost(false);
        assert!(requester
            .submit_screenshot(true, false, None, ScreenshotSource::Mqtt)
            .is_accepted());
        assert!(h.service.process_pending_screenshots(false).unwrap().is_ok());
        assert!(h.rx.try_recv().is_ok());
    }

    #[test]
    fn test_no_camera_frame() {
        let mut h = harness("no-camera");
        let path = h.dir.join("raw.jpg");

        assert_eq!(
            h.service.capture(false, false, false, &path),
            Err(CaptureError::NoFrameAvailable)
        );

        publish_camera(&h.video, 40, 20);
        assert_eq!(
            h.service.capture(false, true, false, &path),
            Err(CaptureError::NoFrameAvailable)
        );

        // The recording buffer is used even in no-camera mode
        h.video
            .publish_recording_frame(40, 20, BLUE.repeat(800))
            .unwrap();
        assert!(h.service.capture(false, true, false, &path).is_ok());
    }

    #[test]
    fn test_camera_full_resolution_trims_margins() {
        let mut config = test_config();
        config.display.cam_crop_x = 4;
        let mut h = harness_with("camera-full", config, Box::new(JpegFileEncoder::new()));
        publish_camera(&h.video, 40, 20);

        let path = h.dir.join("raw.jpg");
        let outcome = h.service.capture(false, false, true, &path).unwrap();
        assert_eq!((outcome.width, outcome.height), (32, 20));

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 20));
    }

    #[test]
    fn test_encoder_failure_suppresses_notification() {
        let mut h = harness_with("encode-fail", test_config(), Box::new(FailingEncoder));
        publish_camera(&h.video, 40, 20);
        let requester = h.service.requester();

        assert!(requester
            .submit_screenshot(false, false, None, ScreenshotSource::Mqtt)
            .is_accepted());
        assert_eq!(
            h.service.process_pending_screenshots(false),
            Some(Err(CaptureError::EncodeFailed("disk full".to_string())))
        );
        assert!(matches!(h.rx.try_recv(), Err(TryRecvError::Empty)));
        // The slot is free again
        assert!(!requester.is_pending());
    }

    #[test]
    fn test_snapshot_template_gets_fresh_timestamp() {
        let mut h = harness("template");
        publish_camera(&h.video, 40, 20);
        let requested = h.dir.join("snapshot-19990101_000000.jpg");

        assert!(h
            .service
            .requester()
            .submit_screenshot(false, false, Some(&requested), ScreenshotSource::Mqtt)
            .is_accepted());
        let outcome = h.service.process_pending_screenshots(false).unwrap().unwrap();

        assert_ne!(outcome.path, requested);
        assert_eq!(outcome.path.parent(), Some(h.dir.as_path()));
        let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("snapshot-") && !name.contains("1999"), "{}", name);
    }

    #[test]
    fn test_explicit_path_is_kept() {
        let mut h = harness("explicit");
        publish_camera(&h.video, 40, 20);
        let requested = h.dir.join("custom.jpg");

        assert!(h
            .service
            .requester()
            .submit_screenshot(false, true, Some(&requested), ScreenshotSource::Manual)
            .is_accepted());
        let outcome = h.service.process_pending_screenshots(false).unwrap().unwrap();
        assert_eq!(outcome.path, requested);
        assert!(requested.exists());
    }

    #[test]
    fn test_trigger_snapshot_follows_output_dir() {
        let mut h = harness("output-dir");
        publish_camera(&h.video, 40, 20);
        let moved = h.dir.join("moved");
        h.service.set_output_dir(moved.clone());

        assert!(h.service.requester().trigger_snapshot(None).is_accepted());
        let outcome = h.service.process_pending_screenshots(false).unwrap().unwrap();
        assert_eq!(outcome.path.parent(), Some(moved.as_path()));
        assert!(outcome.path.exists());
        assert!(h.rx.try_recv().is_ok());
    }

    #[test]
    fn test_resize_reinitializes_pipeline() {
        let mut h = harness("resize");
        h.service.initialize_capture_pipeline().unwrap();
        h.service.step_frame();
        h.service.driver_mut().device_mut().resize(32, 16);

        // Buffers still sized for the old target are not used for the capture
        let path = h.dir.join("before-step.jpg");
        let outcome = h.service.capture(true, false, true, &path).unwrap();
        assert_eq!((outcome.width, outcome.height), (16, 16));

        h.service.step_frame();
        let path = h.dir.join("resized.jpg");
        let outcome = h.service.capture(true, false, true, &path).unwrap();
        assert_eq!((outcome.width, outcome.height), (16, 16));
        assert_eq!(
            h.service.driver().pipeline().rect(),
            CaptureRect::from_size(32, 16)
        );

        h.service.shutdown_capture_pipeline();
        assert!(!h.service.driver().is_initialized());
        assert_eq!(h.service.driver().device().live_buffers(), 0);
    }
}
