//! Mirage common library
//!
//! Types shared between the HUD capture subsystem and its triggers, log
//! directory resolution, and validation of externally supplied paths.

pub mod logging;
pub mod security;
pub mod types;

pub use types::*;
