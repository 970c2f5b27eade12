//! The one active recording attempt

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::capture::{AudioBackend, SessionClock};
use crate::config::Config;
use crate::data::DeveloperMetadata;
use crate::encoder::{EncoderHandle, EncoderSettings};

use super::pump::{Pump, PumpSources};

/// Capture settings frozen when the session starts
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub frame_interval: Duration,
    pub audio_backend: AudioBackend,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.capture.width,
            height: config.capture.height,
            frame_interval: config.capture.frame_interval(),
            audio_backend: config.capture.audio_backend,
        }
    }
}

/// Owned exclusively by the controller; dropped when the session ends
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: SessionConfig,
    pub metadata: DeveloperMetadata,
    pub(super) clock: SessionClock,
    pub(super) sources: PumpSources,
    pub(super) encoder: EncoderHandle,
    pub(super) pump: Option<Pump>,
}

impl Session {
    pub(super) fn encoder_settings(
        id: Uuid,
        started_at: DateTime<Utc>,
        config: &Config,
    ) -> EncoderSettings {
        EncoderSettings {
            session_id: id,
            started_at,
            output_dir: config.output_directory(),
            nominal_frame_interval: config.capture.frame_interval(),
            reorder_window: config.recording.reorder_window(),
            max_bytes: config.recording.max_artifact_bytes,
            queue_depth: config.recording.encoder_queue_depth,
        }
    }

    /// Elapsed active time
    pub fn elapsed(&self) -> Duration {
        self.clock.now()
    }
}
