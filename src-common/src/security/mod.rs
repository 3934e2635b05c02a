//! Validation of externally supplied input.

pub mod path_validation;

pub use path_validation::{validate_capture_path, validate_capture_path_within, PathError};
