//! Configuration management for the Mirage HUD capture subsystem.
//!
//! Loads user configuration from platform-standard config directories:
//! - Linux: `~/.config/mirage/hud.json`
//! - macOS: `~/Library/Application Support/mirage/hud.json`
//! - Windows: `%APPDATA%\mirage\hud.json`

use directories::ProjectDirs;
use directories::UserDirs;
use mirage_common::DisplaySettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::capture::{PipelineDepth, RetryPolicy};

/// Upper bound on map attempts per harvest.
const MAX_MAP_ATTEMPTS: u32 = 5;
/// Upper bound on the sleep between map attempts.
const MAX_RETRY_DELAY_MS: u64 = 16;

/// How overlay (composited) captures read pixels back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlayCaptureMode {
    /// Rotating transfer buffers, blocking read only while priming
    #[default]
    Pipelined,
    /// Single-shot blocking readback on every capture
    Blocking,
}

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Custom output directory. If None, uses system default (Pictures folder).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// GPU capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default)]
    pub overlay_mode: OverlayCaptureMode,
    /// Number of rotating transfer buffers: double or triple.
    #[serde(default)]
    pub depth: PipelineDepth,
    /// Map attempts per harvest before falling back to the last good frame.
    #[serde(default = "default_map_attempts")]
    pub map_attempts: u32,
    /// Sleep between map attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_map_attempts() -> u32 {
    crate::capture::pipeline::MAP_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    crate::capture::pipeline::MAP_RETRY_DELAY.as_millis() as u64
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            overlay_mode: OverlayCaptureMode::default(),
            depth: PipelineDepth::default(),
            map_attempts: default_map_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl CaptureSettings {
    /// Retry policy with the configured values clamped so a harvest never
    /// waits long on the render thread.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.map_attempts.clamp(1, MAX_MAP_ATTEMPTS),
            delay: Duration::from_millis(self.retry_delay_ms.min(MAX_RETRY_DELAY_MS)),
        }
    }
}

/// Size and quality of the images written by the capture path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Width of reduced-size snapshots.
    #[serde(default = "default_snapshot_size")]
    pub width: u32,
    /// Height of reduced-size snapshots.
    #[serde(default = "default_snapshot_size")]
    pub height: u32,
    /// JPEG quality of reduced-size snapshots.
    #[serde(default = "default_snapshot_quality")]
    pub quality: u8,
    /// JPEG quality of full-resolution captures.
    #[serde(default = "default_full_quality")]
    pub full_quality: u8,
}

fn default_snapshot_size() -> u32 {
    512
}

fn default_snapshot_quality() -> u8 {
    90
}

fn default_full_quality() -> u8 {
    95
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            width: default_snapshot_size(),
            height: default_snapshot_size(),
            quality: default_snapshot_quality(),
            full_quality: default_full_quality(),
        }
    }
}

/// HUD capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HudConfig {
    /// Output settings group.
    #[serde(default)]
    pub output: OutputConfig,
    /// Eye and camera geometry.
    #[serde(default)]
    pub display: DisplaySettings,
    /// GPU capture settings group.
    #[serde(default)]
    pub capture: CaptureSettings,
    /// Snapshot size and quality.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Get the path to the config file.
pub fn get_config_path() -> Result<PathBuf, String> {
    let proj_dirs =
        ProjectDirs::from("", "", "mirage").ok_or("Could not determine config directory")?;

    let config_dir = proj_dirs.config_dir();
    Ok(config_dir.join("hud.json"))
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> HudConfig {
    match get_config_path() {
        Ok(path) => load_config_from(&path),
        Err(e) => {
            warn!("Failed to get config path: {}", e);
            HudConfig::default()
        }
    }
}

/// Load configuration from a specific file, with the same fallbacks as [`load_config`].
pub fn load_config_from(config_path: &Path) -> HudConfig {
    if !config_path.exists() {
        info!("No config file found at {:?}, using defaults", config_path);
        return HudConfig::default();
    }

    match fs::read_to_string(config_path) {
        Ok(contents) => match serde_json::from_str::<HudConfig>(&contents) {
            Ok(config) => {
                info!("Loaded config from {:?}", config_path);
                config
            }
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                HudConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}. Using defaults.", e);
            HudConfig::default()
        }
    }
}

/// Get the default output directory (`mirage` under the system Pictures folder).
pub fn get_default_output_dir() -> Result<PathBuf, String> {
    let user_dirs = UserDirs::new().ok_or("Could not determine user directories")?;

    let pictures = user_dirs
        .picture_dir()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| user_dirs.home_dir().join("Pictures"));

    Ok(pictures.join("mirage"))
}

/// Get the configured output directory, falling back to default if not set.
pub fn get_output_dir(config: &HudConfig) -> Result<PathBuf, String> {
    match &config.output.directory {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => get_default_output_dir(),
    }
}

/// Validate that a directory exists and is writable.
pub fn validate_directory(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err("Directory does not exist".to_string());
    }

    if !path.is_dir() {
        return Err("Path is not a directory".to_string());
    }

    let test_file = path.join(".mirage_write_test");
    match fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = fs::remove_file(test_file);
            Ok(())
        }
        Err(_) => Err("Directory is not writable".to_string()),
    }
}
