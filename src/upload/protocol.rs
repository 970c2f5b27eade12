//! Resumable upload protocol
//!
//! A video is created with one `POST {endpoint}/videos`, then its bytes are
//! sent as `PUT` chunks carrying `Content-Range`. The server acknowledges a
//! partial upload with `308` and a `Range: bytes=0-N` header, and completes
//! the upload with `200`/`201`. After a failure the committed offset is
//! recovered with an empty `PUT` carrying `Content-Range: bytes */total`.
//!
//! Chunk bodies are streamed from disk so large recordings never sit in RAM.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Body, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::account::AccessToken;
use crate::config::UploadConfig;
use crate::data::DeveloperMetadata;

use super::retry::{classify_status, Disposition};

const ARTIFACT_CONTENT_TYPE: &str = "application/vnd.playcast";

/// Body of the create-video request
#[derive(Debug, Serialize)]
pub struct CreateVideoRequest<'a> {
    pub session_id: Uuid,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub checksum_sha256: &'a str,
    pub thumbnail_time_ms: u64,
    pub metadata: &'a DeveloperMetadata,
    pub device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreatedVideo {
    pub video_id: String,
    pub upload_url: String,
}

/// The server-side video produced by a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVideo {
    pub video_id: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Server state after a chunk or offset query
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    Incomplete { committed: u64 },
    Complete(RemoteVideo),
}

/// A failed protocol step, classified for the retry loop
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Permanent(String),

    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn disposition(&self) -> Disposition {
        match self {
            TransferError::Transient(_) => Disposition::Transient,
            TransferError::Unauthorized(_) => Disposition::Unauthorized,
            TransferError::Permanent(_) | TransferError::Io(_) => Disposition::Permanent,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_decode() {
            TransferError::Permanent(e.to_string())
        } else {
            TransferError::Transient(e.to_string())
        }
    }
}

/// HTTP client for the resumable protocol
#[derive(Clone)]
pub struct ResumableClient {
    client: Client,
    api_endpoint: Option<String>,
}

impl ResumableClient {
    pub fn new(config: &UploadConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            api_endpoint: config.api_endpoint.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_endpoint.is_some()
    }

    /// Register a video and obtain its upload URL
    pub async fn create_video(
        &self,
        token: &AccessToken,
        request: &CreateVideoRequest<'_>,
    ) -> Result<CreatedVideo, TransferError> {
        let endpoint = self
            .api_endpoint
            .as_deref()
            .ok_or_else(|| TransferError::Permanent("API endpoint not configured".to_string()))?;
        let url = format!("{}/videos", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.secret())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let created: CreatedVideo = response.json().await?;
        debug!("Created video {} for session {}", created.video_id, request.session_id);
        Ok(created)
    }

    /// Stream `len` bytes of `path` starting at `offset`
    pub async fn send_chunk(
        &self,
        upload_url: &str,
        token: &AccessToken,
        path: &Path,
        offset: u64,
        len: u64,
        total: u64,
    ) -> Result<ChunkStatus, TransferError> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let body = Body::wrap_stream(ReaderStream::new(file.take(len)));

        let last = (offset + len).saturating_sub(1);
        let response = self
            .client
            .put(upload_url)
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, ARTIFACT_CONTENT_TYPE)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, last, total))
            .body(body)
            .send()
            .await?;

        chunk_status(response).await
    }

    /// Ask the server how many bytes it has committed
    pub async fn query_offset(
        &self,
        upload_url: &str,
        token: &AccessToken,
        total: u64,
    ) -> Result<ChunkStatus, TransferError> {
        let response = self
            .client
            .put(upload_url)
            .bearer_auth(token.secret())
            .header(CONTENT_LENGTH, 0)
            .header(CONTENT_RANGE, format!("bytes */{}", total))
            .send()
            .await?;

        chunk_status(response).await
    }
}

async fn chunk_status(response: Response) -> Result<ChunkStatus, TransferError> {
    match response.status() {
        StatusCode::PERMANENT_REDIRECT => Ok(ChunkStatus::Incomplete {
            committed: committed_bytes(response.headers()),
        }),
        s if s.is_success() => {
            let remote: RemoteVideo = response.json().await?;
            if remote.video_id.is_empty() {
                return Err(TransferError::Permanent(
                    "server completed the upload without a video id".to_string(),
                ));
            }
            Ok(ChunkStatus::Complete(remote))
        }
        _ => Err(status_error(response).await),
    }
}

/// Parse `Range: bytes=0-N` into the committed byte count
fn committed_bytes(headers: &HeaderMap) -> u64 {
    headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
        .and_then(|range| range.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

async fn status_error(response: Response) -> TransferError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("server returned {}", status)
    } else {
        format!("server returned {}: {}", status, body.trim())
    };

    match classify_status(status) {
        Disposition::Transient => TransferError::Transient(message),
        Disposition::Unauthorized => TransferError::Unauthorized(message),
        Disposition::Permanent => TransferError::Permanent(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn range_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(committed_bytes(&headers), 0);

        headers.insert(RANGE, HeaderValue::from_static("bytes=0-1023"));
        assert_eq!(committed_bytes(&headers), 1024);

        headers.insert(RANGE, HeaderValue::from_static("garbage"));
        assert_eq!(committed_bytes(&headers), 0);
    }

    #[test]
    fn create_request_serialization() {
        let metadata = DeveloperMetadata::default();
        let request = CreateVideoRequest {
            session_id: Uuid::nil(),
            size_bytes: 42,
            duration_ms: 1_000,
            checksum_sha256: "abc",
            thumbnail_time_ms: 333,
            metadata: &metadata,
            device_id: "device",
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["size_bytes"], 42);
        assert_eq!(json["thumbnail_time_ms"], 333);
        assert_eq!(json["checksum_sha256"], "abc");
    }
}
