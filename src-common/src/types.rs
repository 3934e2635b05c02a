//! Shared types for the HUD capture subsystem.

use serde::{Deserialize, Serialize};

/// Bytes per pixel of every capture buffer (RGBA, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 4;

/// Origin of a screenshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotSource {
    /// Requested locally (key binding, command line)
    #[default]
    Manual,
    /// Requested over MQTT; the requester waits for a completion message
    Mqtt,
    /// Requested by the periodic snapshot trigger
    Periodic,
}

impl ScreenshotSource {
    /// Whether the origin expects a completion notification.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Mqtt)
    }

    /// Kind of file produced for requests of this origin.
    pub fn capture_kind(&self) -> CaptureKind {
        match self {
            Self::Manual => CaptureKind::Screenshot,
            Self::Mqtt | Self::Periodic => CaptureKind::Snapshot,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Mqtt => "mqtt",
            Self::Periodic => "periodic",
        }
    }
}

impl std::fmt::Display for ScreenshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of capture file, which decides the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// `screenshot-<timestamp>.jpg`
    Screenshot,
    /// `snapshot-<timestamp>.jpg`
    Snapshot,
}

impl CaptureKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Rectangle of the framebuffer, in GL window coordinates (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRect {
    /// Rectangle covering a whole surface of the given size.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Bytes in one row of RGBA pixels.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Bytes needed to hold the whole rectangle.
    pub fn byte_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Eye and camera geometry of the display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Width of one eye viewport in pixels
    #[serde(default = "default_eye_width")]
    pub eye_output_width: u32,
    /// Height of one eye viewport in pixels
    #[serde(default = "default_eye_height")]
    pub eye_output_height: u32,
    /// Width of the raw camera frame
    #[serde(default = "default_eye_width")]
    pub cam_input_width: u32,
    /// Height of the raw camera frame
    #[serde(default = "default_eye_height")]
    pub cam_input_height: u32,
    /// Horizontal margin trimmed from both sides of the camera frame
    #[serde(default)]
    pub cam_crop_x: u32,
    /// Whether triggered snapshots include the overlay
    #[serde(default)]
    pub snapshot_overlay: bool,
}

fn default_eye_width() -> u32 {
    1920
}

fn default_eye_height() -> u32 {
    1080
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            eye_output_width: default_eye_width(),
            eye_output_height: default_eye_height(),
            cam_input_width: default_eye_width(),
            cam_input_height: default_eye_height(),
            cam_crop_x: 0,
            snapshot_overlay: false,
        }
    }
}

impl DisplaySettings {
    /// Size of the composited stereo output (both eyes side by side).
    pub fn stereo_output_size(&self) -> (u32, u32) {
        (self.eye_output_width * 2, self.eye_output_height)
    }
}
