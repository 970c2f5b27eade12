//! Configuration management for playcast

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::AudioBackend;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Frame and audio sampling configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Encoding and session policy
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Authorization collaborator settings
    #[serde(default)]
    pub account: AccountConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Expected frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Expected frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Target frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Lower the frame rate while the encoder is behind
    #[serde(default)]
    pub adaptive_cadence: bool,

    /// Floor for adaptive cadence
    #[serde(default = "default_min_fps")]
    pub min_fps: u32,

    /// Audio engine to record from
    #[serde(default)]
    pub audio_backend: AudioBackend,

    #[serde(default = "default_sample_rate")]
    pub audio_sample_rate: u32,

    #[serde(default = "default_channels")]
    pub audio_channels: u16,

    /// Whether the face-cam overlay may be started during a session
    #[serde(default)]
    pub face_cam_enabled: bool,

    /// Per-stream buffer before the oldest samples are dropped
    #[serde(default = "default_max_buffered_samples")]
    pub max_buffered_samples: usize,

    /// Minimum CPU cores for capture to be supported
    #[serde(default = "default_min_cpu_cores")]
    pub min_cpu_cores: usize,

    /// Minimum host OS major version (0 = any)
    #[serde(default)]
    pub min_os_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory for encoded recordings
    #[serde(default = "default_recording_output_directory_option")]
    pub output_directory: Option<PathBuf>,

    /// Start uploading as soon as a recording is finalized
    #[serde(default)]
    pub upload_on_stop: bool,

    /// Upper bound on waiting for the encoder to finish the file
    #[serde(default = "default_finalize_timeout_ms")]
    pub finalize_timeout_ms: u64,

    /// How long the encoder holds samples to fix out-of-order arrival
    #[serde(default = "default_reorder_window_ms")]
    pub reorder_window_ms: u64,

    /// Storage budget per recording (0 = unlimited)
    #[serde(default)]
    pub max_artifact_bytes: u64,

    /// Write a PNG thumbnail when a recording is finalized
    #[serde(default = "default_true")]
    pub thumbnail_on_stop: bool,

    #[serde(default = "default_thumbnail_max_width")]
    pub thumbnail_max_width: u32,

    /// Samples queued between the capture pump and the encoder thread
    #[serde(default = "default_encoder_queue_depth")]
    pub encoder_queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Base URL of the video API
    pub api_endpoint: Option<String>,

    /// Consecutive failed attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Bytes sent per resumable chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,

    /// Maximum concurrent uploads
    #[serde(default = "default_max_uploads")]
    pub max_concurrent_uploads: usize,

    /// Whether to delete local files after successful upload
    #[serde(default)]
    pub delete_after_upload: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Redirect URI registered for the authorization flow
    pub redirect_uri: Option<String>,
}

// Default value functions
fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_min_fps() -> u32 {
    10
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_max_buffered_samples() -> usize {
    8
}

fn default_min_cpu_cores() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_finalize_timeout_ms() -> u64 {
    10_000
}

fn default_reorder_window_ms() -> u64 {
    100
}

fn default_thumbnail_max_width() -> u32 {
    320
}

fn default_encoder_queue_depth() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024
}

fn default_max_uploads() -> usize {
    2
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_recording_output_directory() -> PathBuf {
    std::env::temp_dir().join("playcast-recordings")
}

fn default_recording_output_directory_option() -> Option<PathBuf> {
    Some(default_recording_output_directory())
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            adaptive_cadence: false,
            min_fps: default_min_fps(),
            audio_backend: AudioBackend::default(),
            audio_sample_rate: default_sample_rate(),
            audio_channels: default_channels(),
            face_cam_enabled: false,
            max_buffered_samples: default_max_buffered_samples(),
            min_cpu_cores: default_min_cpu_cores(),
            min_os_version: 0,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: Some(default_recording_output_directory()),
            upload_on_stop: false,
            finalize_timeout_ms: default_finalize_timeout_ms(),
            reorder_window_ms: default_reorder_window_ms(),
            max_artifact_bytes: 0,
            thumbnail_on_stop: true,
            thumbnail_max_width: default_thumbnail_max_width(),
            encoder_queue_depth: default_encoder_queue_depth(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            max_attempts: default_max_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            chunk_size_bytes: default_chunk_size(),
            max_concurrent_uploads: default_max_uploads(),
            delete_after_upload: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            recording: RecordingConfig::default(),
            upload: UploadConfig::default(),
            account: AccountConfig::default(),
            config_path: None,
        }
    }
}

impl CaptureConfig {
    /// Interval between frame samples at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl RecordingConfig {
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    pub fn reorder_window(&self) -> Duration {
        Duration::from_millis(self.reorder_window_ms)
    }
}

impl UploadConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::from_path(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "playcast", "recorder")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Directory encoded recordings are written to
    pub fn output_directory(&self) -> PathBuf {
        self.recording
            .output_directory
            .clone()
            .unwrap_or_else(default_recording_output_directory)
    }

    /// Check if uploads can be attempted at all
    pub fn upload_configured(&self) -> bool {
        self.upload.api_endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [capture]
            fps = 60
            audio_backend = "open_al"

            [upload]
            api_endpoint = "https://api.example.com"
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.fps, 60);
        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.capture.audio_backend, AudioBackend::OpenAl);
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.base_retry_delay_ms, 1_000);
        assert!(config.recording.thumbnail_on_stop);
        assert!(config.upload_configured());
    }

    #[test]
    fn save_and_reload_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.config_path = Some(path.clone());
        config.recording.upload_on_stop = true;
        config.save().unwrap();

        let loaded = Config::from_path(&path).unwrap();
        assert!(loaded.recording.upload_on_stop);
        assert_eq!(loaded.config_path().unwrap(), path);
    }
}
