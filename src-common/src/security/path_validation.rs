//! Path validation for capture output files.
//!
//! Output paths may arrive from remote triggers (MQTT payloads), so they are
//! checked lexically before a request is accepted. Nothing here touches the
//! filesystem: the target file does not exist yet when a request is queued.

use std::path::{Component, Path, PathBuf};

/// Path validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path is empty
    Empty,
    /// Path contains directory traversal sequences (..)
    ContainsTraversal,
    /// Path contains null bytes
    ContainsNullByte,
    /// Path is outside the allowed base directory
    OutsideAllowedDirectory,
    /// Path is too long
    TooLong(usize),
    /// File extension is not an image type the encoder writes
    UnsupportedExtension(String),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => write!(f, "Path is empty"),
            PathError::ContainsTraversal => write!(f, "Path contains directory traversal"),
            PathError::ContainsNullByte => write!(f, "Path contains null byte"),
            PathError::OutsideAllowedDirectory => write!(f, "Path is outside allowed directory"),
            PathError::TooLong(len) => write!(f, "Path too long: {} chars", len),
            PathError::UnsupportedExtension(ext) => {
                write!(f, "Unsupported file extension: {:?}", ext)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Maximum path length in characters.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Extensions accepted for capture output files.
pub const CAPTURE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Validate a capture output file path.
///
/// Checks performed:
/// 1. Rejects empty paths and paths containing null bytes
/// 2. Rejects paths that are too long
/// 3. Rejects paths containing ".." components
/// 4. Requires a `.jpg`/`.jpeg` extension
pub fn validate_capture_path(path: &Path) -> Result<(), PathError> {
    let path_str = path.to_string_lossy();

    if path_str.is_empty() {
        return Err(PathError::Empty);
    }

    if path_str.contains('\0') {
        return Err(PathError::ContainsNullByte);
    }

    if path_str.len() > MAX_PATH_LENGTH {
        return Err(PathError::TooLong(path_str.len()));
    }

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathError::ContainsTraversal);
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !CAPTURE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(PathError::UnsupportedExtension(ext));
    }

    Ok(())
}

/// Validate a capture path and require it to live under `base`.
///
/// Relative paths are interpreted relative to `base`. Returns the joined path.
pub fn validate_capture_path_within(path: &Path, base: &Path) -> Result<PathBuf, PathError> {
    validate_capture_path(path)?;

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    if !joined.starts_with(base) {
        return Err(PathError::OutsideAllowedDirectory);
    }

    Ok(joined)
}
