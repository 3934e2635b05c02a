//! Single-slot screenshot request mailbox.
//!
//! Any thread may submit; only the render thread drains. The slot holds at
//! most one request: a submission while one is pending is rejected, never
//! queued and never merged into the pending one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use mirage_common::security::{validate_capture_path, validate_capture_path_within, PathError};
use mirage_common::{CaptureKind, ScreenshotSource};
use tracing::{debug, warn};

use super::naming::{capture_path, timestamp_now};

/// One pending capture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenshotRequest {
    /// Capture the composited output instead of the raw camera frame
    pub with_overlay: bool,
    /// Native resolution instead of the snapshot thumbnail size
    pub full_resolution: bool,
    /// Explicit output file; generated at capture time when None
    pub path: Option<PathBuf>,
    pub source: ScreenshotSource,
}

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Another request is already pending
    Busy,
    /// The explicit output path failed validation
    InvalidPath(PathError),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Busy => write!(f, "A screenshot request is already pending"),
            RejectReason::InvalidPath(e) => write!(f, "Invalid output path: {}", e),
        }
    }
}

/// Result of a submission.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Mutex-guarded slot holding at most one request.
#[derive(Debug, Default)]
pub struct RequestQueue {
    slot: Mutex<Option<ScreenshotRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ScreenshotRequest>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `request` if the slot is empty.
    pub fn submit(&self, request: ScreenshotRequest) -> SubmitOutcome {
        let mut slot = self.lock();
        if slot.is_some() {
            drop(slot);
            warn!(
                "Screenshot request from {} rejected: another request is pending",
                request.source
            );
            return SubmitOutcome::Rejected(RejectReason::Busy);
        }
        debug!(
            "Queued screenshot request (source: {}, overlay: {}, full res: {})",
            request.source, request.with_overlay, request.full_resolution
        );
        *slot = Some(request);
        SubmitOutcome::Accepted
    }

    /// Take the pending request, leaving the slot empty.
    pub fn drain(&self) -> Option<ScreenshotRequest> {
        self.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

/// Cloneable submission handle for threads other than the render thread.
#[derive(Debug, Clone)]
pub struct ScreenshotRequester {
    queue: Arc<RequestQueue>,
    output_dir: Arc<RwLock<PathBuf>>,
    snapshot_overlay: bool,
}

impl ScreenshotRequester {
    pub(crate) fn new(
        queue: Arc<RequestQueue>,
        output_dir: Arc<RwLock<PathBuf>>,
        snapshot_overlay: bool,
    ) -> Self {
        Self {
            queue,
            output_dir,
            snapshot_overlay,
        }
    }

    /// Ask the render thread for a capture.
    ///
    /// An explicit `path` is validated before the queue is touched, so a bad
    /// path never occupies the slot. Remote paths must stay inside the output
    /// directory; relative ones are resolved against it.
    pub fn submit_screenshot(
        &self,
        with_overlay: bool,
        full_resolution: bool,
        path: Option<&Path>,
        source: ScreenshotSource,
    ) -> SubmitOutcome {
        let path = match path.map(|p| self.check_path(p, source)).transpose() {
            Ok(path) => path,
            Err(e) => return SubmitOutcome::Rejected(RejectReason::InvalidPath(e)),
        };
        self.queue.submit(ScreenshotRequest {
            with_overlay,
            full_resolution,
            path,
            source,
        })
    }

    fn check_path(&self, path: &Path, source: ScreenshotSource) -> Result<PathBuf, PathError> {
        let checked = if source.is_remote() {
            validate_capture_path_within(path, &self.output_dir())
        } else {
            validate_capture_path(path).map(|()| path.to_path_buf())
        };
        checked.map_err(|e| {
            warn!("Rejected screenshot path {:?} from {}: {}", path, source, e);
            e
        })
    }

    /// Queue a remote-triggered snapshot named after `datetime`.
    ///
    /// A fresh timestamp is used when `datetime` is missing or empty. The
    /// overlay flag follows the display's snapshot setting.
    pub fn trigger_snapshot(&self, datetime: Option<&str>) -> SubmitOutcome {
        let timestamp = match datetime {
            Some(dt) if !dt.is_empty() => dt.to_string(),
            _ => timestamp_now(),
        };
        let path = capture_path(&self.output_dir(), CaptureKind::Snapshot, &timestamp);
        self.submit_screenshot(
            self.snapshot_overlay,
            false,
            Some(&path),
            ScreenshotSource::Mqtt,
        )
    }

    /// Queue a periodic reduced-size snapshot.
    pub fn request_periodic_snapshot(&self) -> SubmitOutcome {
        self.submit_screenshot(self.snapshot_overlay, false, None, ScreenshotSource::Periodic)
    }

    pub fn is_pending(&self) -> bool {
        self.queue.is_pending()
    }

    fn output_dir(&self) -> PathBuf {
        self.output_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
