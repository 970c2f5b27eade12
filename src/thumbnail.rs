//! Representative still images for finished recordings
//!
//! The same frame is used whichever form the host asks for: the video frame
//! nearest one third into the recording. The upload request carries that
//! offset so the server-side thumbnail matches the local one.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::data::{MediaArtifact, PixelFormat, Track};
use crate::encoder::container::ContainerReader;
use crate::error::CaptureError;
use crate::events::{Event, EventBus};

/// Offset of the representative frame within a recording
pub fn representative_time(duration: Duration) -> Duration {
    duration / 3
}

/// A thumbnail in one of its interchangeable forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    File(PathBuf),
    Url(String),
    Texture { texture_id: u32, portrait: bool },
}

impl Thumbnail {
    /// Deliver the matching thumbnail-ready callback
    pub fn announce(&self, events: &EventBus) {
        match self {
            Thumbnail::File(path) => events.emit(Event::ThumbnailReadyAtFilePath(path)),
            Thumbnail::Url(url) => events.emit(Event::ThumbnailReadyAtUrl(url)),
            Thumbnail::Texture {
                texture_id,
                portrait,
            } => events.emit(Event::ThumbnailReadyAtTextureId {
                texture_id: *texture_id,
                portrait: *portrait,
            }),
        }
    }
}

/// Host hook that turns RGBA pixels into a GPU texture
pub trait TextureUploader: Send + Sync {
    fn upload_rgba(&self, width: u32, height: u32, rgba: &[u8]) -> Result<u32, CaptureError>;
}

#[derive(Clone)]
pub struct ThumbnailExtractor {
    max_width: u32,
    textures: Option<Arc<dyn TextureUploader>>,
    client: reqwest::Client,
}

impl ThumbnailExtractor {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            textures: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_texture_uploader(mut self, textures: Arc<dyn TextureUploader>) -> Self {
        self.textures = Some(textures);
        self
    }

    /// Decode the representative frame of a local recording
    pub fn representative_frame(&self, artifact: &MediaArtifact) -> Result<RgbaImage, CaptureError> {
        let mut reader = ContainerReader::open(&artifact.path)?;
        let video = reader
            .footer()
            .video
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("recording has no video track".into()))?;

        let target_us = representative_time(artifact.duration).as_micros() as u64;
        let entry = reader
            .entries(Track::Video)
            .min_by_key(|entry| entry.pts_us.abs_diff(target_us))
            .cloned()
            .ok_or_else(|| CaptureError::InvalidState("recording has no video frames".into()))?;
        debug!("Thumbnail frame at {} us (target {} us)", entry.pts_us, target_us);

        let mut pixels = reader.read_payload(&entry)?;
        if video.format == PixelFormat::Bgra8 {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }

        let frame = RgbaImage::from_raw(video.width, video.height, pixels)
            .ok_or_else(|| CaptureError::UnsupportedSample("frame size mismatch".into()))?;
        Ok(self.fit(frame))
    }

    /// Write a PNG next to the recording
    pub fn extract_to_file(&self, artifact: &MediaArtifact) -> Result<Thumbnail, CaptureError> {
        let frame = self.representative_frame(artifact)?;
        let path = artifact.thumbnail_path();
        save_png(&frame, &path)?;
        info!("Thumbnail written to {:?}", path);
        Ok(Thumbnail::File(path))
    }

    /// Upload the representative frame through the host's texture hook
    pub fn extract_texture(&self, artifact: &MediaArtifact) -> Result<Thumbnail, CaptureError> {
        let textures = self.textures.as_ref().ok_or(CaptureError::Unsupported)?;
        let frame = self.representative_frame(artifact)?;
        let texture_id = textures.upload_rgba(frame.width(), frame.height(), frame.as_raw())?;
        Ok(Thumbnail::Texture {
            texture_id,
            portrait: frame.height() > frame.width(),
        })
    }

    /// Download a server-side thumbnail into a local PNG
    pub async fn fetch_remote(&self, url: &str, dest: &Path) -> Result<Thumbnail, CaptureError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CaptureError::Upload(format!("thumbnail download failed: {}", e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CaptureError::Upload(format!("thumbnail download failed: {}", e)))?;

        let image = image::load_from_memory(&bytes)
            .map_err(|e| CaptureError::UnsupportedSample(format!("remote thumbnail: {}", e)))?
            .to_rgba8();
        save_png(&self.fit(image), dest)?;
        Ok(Thumbnail::File(dest.to_path_buf()))
    }

    fn fit(&self, frame: RgbaImage) -> RgbaImage {
        if frame.width() <= self.max_width {
            return frame;
        }
        let height = (frame.height() as u64 * self.max_width as u64 / frame.width() as u64).max(1);
        image::imageops::resize(&frame, self.max_width, height as u32, FilterType::Triangle)
    }
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<(), CaptureError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CaptureError::Encoder(format!("failed to encode thumbnail: {}", e)))?;
    std::fs::write(path, bytes)?;
    Ok(())
}
