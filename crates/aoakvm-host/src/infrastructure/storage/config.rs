//! TOML configuration for the host application.
//!
//! Read from `--config <path>` or the platform config file:
//! - Windows:  `%APPDATA%\AOAKVM\config.toml`
//! - Linux:    `~/.config/aoakvm/config.toml`
//! - macOS:    `~/Library/Application Support/AOAKVM/config.toml`
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! [accessory]
//! manufacturer = "AOA-KVM"
//! model = "AOA-KVM Host"
//!
//! [usb]
//! bulk_timeout_ms = 200
//!
//! [video]
//! frame_queue_capacity = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aoakvm_core::{AccessoryIdentity, StatusScreen, DEFAULT_FRAME_RING_CAPACITY};

use crate::application::handshake::HandshakeSettings;
use crate::application::ingest::{IngestSettings, VIDEO_ENDPOINT};
use crate::application::session::SessionSettings;
use crate::infrastructure::video::AnnexBSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A configured value is outside its usable range.
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub accessory: AccessoryIdentity,
    #[serde(default)]
    pub screens: ScreensConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Status images.  Unset entries are shown as a logged placeholder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScreensConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_device: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoa_initialized: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_data: Option<PathBuf>,
}

impl ScreensConfig {
    pub fn path_for(&self, screen: StatusScreen) -> Option<&Path> {
        match screen {
            StatusScreen::WaitForDevice => self.wait_for_device.as_deref(),
            StatusScreen::AoaInitialized => self.aoa_initialized.as_deref(),
            StatusScreen::WaitForDataTransmission => self.wait_for_data.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_window_x")]
    pub x: i32,
    #[serde(default = "default_window_y")]
    pub y: i32,
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsbConfig {
    /// Interface claimed on the accessory.
    #[serde(default)]
    pub interface: u8,
    /// Bulk IN endpoint carrying the video stream.
    #[serde(default = "default_video_endpoint")]
    pub video_endpoint: u8,
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    #[serde(default = "default_bulk_timeout_ms")]
    pub bulk_timeout_ms: u64,
    /// Size of the ingestion scratch buffer in bytes.
    #[serde(default = "default_scratch_size")]
    pub scratch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_accessory_poll_interval_ms")]
    pub accessory_poll_interval_ms: u64,
    #[serde(default = "default_accessory_poll_attempts")]
    pub accessory_poll_attempts: u32,
    #[serde(default = "default_frame_poll_interval_ms")]
    pub frame_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    /// Frame ring capacity; at most `capacity - 1` frames wait for the renderer.
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
    /// Bytes read while looking for the first SPS.
    #[serde(default = "default_probe_size")]
    pub probe_size: usize,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_title() -> String {
    "AOA-KVM".to_string()
}
fn default_window_x() -> i32 {
    100
}
fn default_window_y() -> i32 {
    100
}
fn default_window_width() -> u32 {
    1280
}
fn default_window_height() -> u32 {
    720
}
fn default_video_endpoint() -> u8 {
    VIDEO_ENDPOINT
}
fn default_control_timeout_ms() -> u64 {
    1000
}
fn default_bulk_timeout_ms() -> u64 {
    200
}
fn default_scratch_size() -> usize {
    16 * 1024
}
fn default_scan_interval_ms() -> u64 {
    100
}
fn default_accessory_poll_interval_ms() -> u64 {
    20
}
fn default_accessory_poll_attempts() -> u32 {
    10
}
fn default_frame_poll_interval_ms() -> u64 {
    1
}
fn default_frame_queue_capacity() -> usize {
    DEFAULT_FRAME_RING_CAPACITY
}
fn default_probe_size() -> usize {
    1024 * 1024
}
fn default_read_chunk() -> usize {
    4096
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            x: default_window_x(),
            y: default_window_y(),
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            interface: 0,
            video_endpoint: default_video_endpoint(),
            control_timeout_ms: default_control_timeout_ms(),
            bulk_timeout_ms: default_bulk_timeout_ms(),
            scratch_size: default_scratch_size(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            accessory_poll_interval_ms: default_accessory_poll_interval_ms(),
            accessory_poll_attempts: default_accessory_poll_attempts(),
            frame_poll_interval_ms: default_frame_poll_interval_ms(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: default_frame_queue_capacity(),
            probe_size: default_probe_size(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl AppConfig {
    /// Rejects values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.video.frame_queue_capacity < 2 {
            return invalid("video.frame_queue_capacity", "must be at least 2");
        }
        if self.video.read_chunk == 0 {
            return invalid("video.read_chunk", "must be non-zero");
        }
        if self.video.probe_size < self.video.read_chunk {
            return invalid("video.probe_size", "must be at least video.read_chunk");
        }
        if self.usb.scratch_size == 0 {
            return invalid("usb.scratch_size", "must be non-zero");
        }
        if self.usb.video_endpoint & 0x80 == 0 {
            return invalid("usb.video_endpoint", "must be an IN endpoint (bit 7 set)");
        }
        if self.timing.accessory_poll_attempts == 0 {
            return invalid("timing.accessory_poll_attempts", "must be non-zero");
        }
        for screen in [
            StatusScreen::WaitForDevice,
            StatusScreen::AoaInitialized,
            StatusScreen::WaitForDataTransmission,
        ] {
            if let Some(path) = self.screens.path_for(screen) {
                if !path.is_file() {
                    return Err(ConfigError::Invalid {
                        field: "screens",
                        reason: format!("{} does not exist", path.display()),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn handshake_settings(&self) -> HandshakeSettings {
        HandshakeSettings {
            identity: self.accessory.clone(),
            interface: self.usb.interface,
            control_timeout: Duration::from_millis(self.usb.control_timeout_ms),
            accessory_poll_attempts: self.timing.accessory_poll_attempts,
            accessory_poll_interval: Duration::from_millis(self.timing.accessory_poll_interval_ms),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ingest: IngestSettings {
                endpoint: self.usb.video_endpoint,
                bulk_timeout: Duration::from_millis(self.usb.bulk_timeout_ms),
                scratch_size: self.usb.scratch_size,
            },
            control_timeout: Duration::from_millis(self.usb.control_timeout_ms),
            scan_interval: Duration::from_millis(self.timing.scan_interval_ms),
            frame_poll_interval: Duration::from_millis(self.timing.frame_poll_interval_ms),
        }
    }

    pub fn decoder_settings(&self) -> AnnexBSettings {
        AnnexBSettings {
            probe_size: self.video.probe_size,
            read_chunk: self.video.read_chunk,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the platform config file, or defaults if it does not exist yet.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("AOAKVM"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("aoakvm"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("AOAKVM"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
