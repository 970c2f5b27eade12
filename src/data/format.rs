//! Finished recording artifacts

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DeveloperMetadata;

/// File extension of encoded recordings
pub const ARTIFACT_EXTENSION: &str = "playcast";

/// A finished, immutable recording ready for upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaArtifact {
    /// Identifier of the session that produced it; upload events are keyed by it
    pub id: Uuid,

    /// Path to the encoded file
    pub path: PathBuf,

    /// Media duration
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// File size in bytes
    pub size_bytes: u64,

    /// Hex SHA-256 of the file contents
    pub checksum: String,

    /// Number of video frames written
    pub video_frames: u64,

    /// Wall clock time the session started
    pub started_at: DateTime<Utc>,

    /// Developer metadata captured with the session
    #[serde(default)]
    pub metadata: DeveloperMetadata,
}

impl MediaArtifact {
    /// Size in megabytes, for log lines
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Path of the PNG thumbnail written next to the artifact
    pub fn thumbnail_path(&self) -> PathBuf {
        self.path.with_extension("thumb.png")
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
