//! Output filenames.

use std::path::{Path, PathBuf};

use chrono::Local;
use mirage_common::{CaptureKind, ScreenshotSource};

/// strftime pattern of the timestamp embedded in capture filenames.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SNAPSHOT_PREFIX: &str = "snapshot-";

/// Local time formatted for a capture filename.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `<prefix>-<timestamp>.jpg`
pub fn capture_file_name(kind: CaptureKind, timestamp: &str) -> String {
    format!("{}-{}.jpg", kind.prefix(), timestamp)
}

pub fn capture_path(dir: &Path, kind: CaptureKind, timestamp: &str) -> PathBuf {
    dir.join(capture_file_name(kind, timestamp))
}

/// Whether `path` names a templated snapshot whose timestamp is refreshed at capture time.
pub fn is_snapshot_template(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(SNAPSHOT_PREFIX))
        .unwrap_or(false)
}

/// Final output path of a request drained at time `timestamp`.
///
/// Requests without a path get a fresh name under `base`. Snapshot templates
/// keep their directory but take the new timestamp. Any other explicit path
/// is used as given.
pub fn resolve_output_path(
    requested: Option<&Path>,
    source: ScreenshotSource,
    base: &Path,
    timestamp: &str,
) -> PathBuf {
    match requested {
        None => capture_path(base, source.capture_kind(), timestamp),
        Some(path) if is_snapshot_template(path) => {
            let dir = path.parent().unwrap_or(base);
            capture_path(dir, CaptureKind::Snapshot, timestamp)
        }
        Some(path) => path.to_path_buf(),
    }
}
