//! Encoder: turns the sample streams of one session into a finished file
//!
//! The encoder owns every format decision. It accepts video, audio and
//! face-cam samples in roughly increasing presentation order, fixes bounded
//! jitter, and writes them to a single container. See [`container`] for the
//! file layout.

pub mod container;
mod reorder;
mod worker;

pub use worker::{EncoderHandle, EncoderInput, SubmitError};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::{
    AudioChunk, DeveloperMetadata, FrameSample, MediaArtifact, MediaSample, Track,
    ARTIFACT_EXTENSION,
};
use crate::error::CaptureError;

use container::{
    AudioTrackInfo, ContainerFooter, ContainerHeader, ContainerWriter, IndexEntry, VideoTrackInfo,
};
use reorder::{Offer, ReorderBuffer};

/// Per-session encoder settings
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    /// Frame interval assumed for the last frame when computing duration
    pub nominal_frame_interval: Duration,
    pub reorder_window: Duration,
    /// Storage budget in bytes, zero for none
    pub max_bytes: u64,
    /// Samples queued between the pump and the encoder thread
    pub queue_depth: usize,
}

impl EncoderSettings {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.session_id, ARTIFACT_EXTENSION))
    }
}

/// Synchronous encoder for one session
pub struct Encoder {
    settings: EncoderSettings,
    path: PathBuf,
    writer: ContainerWriter,
    reorder: ReorderBuffer,
    index: Vec<IndexEntry>,
    video: Option<VideoTrackInfo>,
    face_cam: Option<VideoTrackInfo>,
    audio: Option<AudioTrackInfo>,
    first_video_pts: Option<Duration>,
    last_video_pts: Option<Duration>,
    last_frame_interval: Duration,
    audio_end: Duration,
    video_frames: u64,
    late_dropped: u64,
    face_cam_unaligned: u64,
}

impl Encoder {
    /// Create the output file and write the container header
    pub fn create(settings: EncoderSettings) -> Result<Self, CaptureError> {
        std::fs::create_dir_all(&settings.output_dir)?;
        let path = settings.output_path();
        let header = ContainerHeader {
            session_id: settings.session_id,
            started_at: settings.started_at,
        };
        let writer = ContainerWriter::create(&path, &header, settings.max_bytes)?;
        debug!("Encoder writing to {:?}", path);

        Ok(Self {
            reorder: ReorderBuffer::new(settings.reorder_window),
            last_frame_interval: settings.nominal_frame_interval,
            settings,
            path,
            writer,
            index: Vec::new(),
            video: None,
            face_cam: None,
            audio: None,
            first_video_pts: None,
            last_video_pts: None,
            audio_end: Duration::ZERO,
            video_frames: 0,
            late_dropped: 0,
            face_cam_unaligned: 0,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Validate and queue a sample, writing whatever leaves the reorder window
    pub fn push(&mut self, sample: MediaSample) -> Result<(), CaptureError> {
        self.validate(&sample)?;

        if let Offer::Late(sample) = self.reorder.offer(sample) {
            self.late_dropped += 1;
            debug!(
                "Dropped late {:?} sample at {:?} ({} late so far)",
                sample.track(),
                sample.pts(),
                self.late_dropped
            );
            return Ok(());
        }

        while let Some(ready) = self.reorder.pop_ready() {
            self.write(ready)?;
        }
        Ok(())
    }

    /// Flush every held sample and write the footer
    pub fn finish(mut self, metadata: DeveloperMetadata) -> Result<MediaArtifact, CaptureError> {
        debug!("Flushing {} held samples", self.reorder.len());
        while let Some(sample) = self.reorder.pop() {
            self.write(sample)?;
        }

        let video_end = self
            .last_video_pts
            .map(|pts| pts + self.last_frame_interval)
            .unwrap_or(Duration::ZERO);
        let duration = video_end.max(self.audio_end);

        let footer = ContainerFooter {
            duration_us: duration.as_micros() as u64,
            video: self.video,
            face_cam: self.face_cam,
            audio: self.audio,
            index: std::mem::take(&mut self.index),
            metadata: metadata.clone(),
            late_dropped: self.late_dropped,
        };
        let (size_bytes, checksum) = self.writer.finish(&footer)?;

        if self.face_cam_unaligned > 0 {
            debug!(
                "Discarded {} face cam frames captured before the first video frame",
                self.face_cam_unaligned
            );
        }
        info!(
            "Encoded {} frames, {:?}, {} bytes to {:?}",
            self.video_frames, duration, size_bytes, self.path
        );

        Ok(MediaArtifact {
            id: self.settings.session_id,
            path: self.path,
            duration,
            size_bytes,
            checksum,
            video_frames: self.video_frames,
            started_at: self.settings.started_at,
            metadata,
        })
    }

    /// Drop the partial file
    pub fn abort(self) {
        let path = self.path.clone();
        drop(self.writer);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove partial recording {:?}: {}", path, e);
        } else {
            debug!("Removed partial recording {:?}", path);
        }
    }

    fn validate(&mut self, sample: &MediaSample) -> Result<(), CaptureError> {
        match sample {
            MediaSample::Video(frame) => check_frame(frame, &mut self.video, "video"),
            MediaSample::FaceCam(frame) => check_frame(frame, &mut self.face_cam, "face cam"),
            MediaSample::Audio(chunk) => check_audio(chunk, &mut self.audio),
        }
    }

    fn write(&mut self, sample: MediaSample) -> Result<(), CaptureError> {
        let pts_us = sample.pts().as_micros() as u64;
        let entry = match sample {
            MediaSample::Video(frame) => {
                if let Some(last) = self.last_video_pts {
                    let interval = frame.pts.saturating_sub(last);
                    if !interval.is_zero() {
                        self.last_frame_interval = interval;
                    }
                }
                self.first_video_pts.get_or_insert(frame.pts);
                self.last_video_pts = Some(frame.pts);
                self.video_frames += 1;
                self.writer
                    .write_record(Track::Video, pts_us, &frame.frame.data)?
            }
            MediaSample::FaceCam(frame) => {
                // Overlay starts no earlier than the first video frame
                let aligned = self
                    .first_video_pts
                    .map(|first| frame.pts >= first)
                    .unwrap_or(false);
                if !aligned {
                    self.face_cam_unaligned += 1;
                    return Ok(());
                }
                self.writer
                    .write_record(Track::FaceCam, pts_us, &frame.frame.data)?
            }
            MediaSample::Audio(chunk) => {
                self.audio_end = self.audio_end.max(chunk.end_pts());
                let bytes: Vec<u8> = chunk
                    .samples
                    .iter()
                    .flat_map(|s| s.to_le_bytes())
                    .collect();
                self.writer.write_record(Track::Audio, pts_us, &bytes)?
            }
        };
        self.index.push(entry);
        Ok(())
    }
}

fn check_frame(
    sample: &FrameSample,
    track: &mut Option<VideoTrackInfo>,
    name: &str,
) -> Result<(), CaptureError> {
    let frame = &sample.frame;
    if frame.width == 0 || frame.height == 0 {
        return Err(CaptureError::UnsupportedSample(format!("{} frame has no pixels", name)));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(CaptureError::UnsupportedSample(format!(
            "{} frame is {} bytes, expected {} for {}x{}",
            name,
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        )));
    }

    let info = VideoTrackInfo {
        width: frame.width,
        height: frame.height,
        format: frame.format,
    };
    match track {
        Some(existing) if *existing != info => Err(CaptureError::UnsupportedSample(format!(
            "{} format changed mid-session from {}x{} {:?} to {}x{} {:?}",
            name,
            existing.width,
            existing.height,
            existing.format,
            info.width,
            info.height,
            info.format
        ))),
        Some(_) => Ok(()),
        None => {
            *track = Some(info);
            Ok(())
        }
    }
}

fn check_audio(chunk: &AudioChunk, track: &mut Option<AudioTrackInfo>) -> Result<(), CaptureError> {
    if chunk.channels == 0 || chunk.sample_rate == 0 {
        return Err(CaptureError::UnsupportedSample("audio chunk without format".into()));
    }
    if chunk.samples.len() % chunk.channels as usize != 0 {
        return Err(CaptureError::UnsupportedSample(format!(
            "audio chunk of {} samples is not interleaved for {} channels",
            chunk.samples.len(),
            chunk.channels
        )));
    }

    let info = AudioTrackInfo {
        sample_rate: chunk.sample_rate,
        channels: chunk.channels,
    };
    match track {
        Some(existing) if *existing != info => Err(CaptureError::UnsupportedSample(format!(
            "audio format changed mid-session from {} Hz/{} ch to {} Hz/{} ch",
            existing.sample_rate, existing.channels, info.sample_rate, info.channels
        ))),
        Some(_) => Ok(()),
        None => {
            *track = Some(info);
            Ok(())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::data::METADATA_SCORE;
    use container::ContainerReader;

    #[test]
    fn jittered_frames_come_out_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();

        for ms in [0, 20, 10, 30, 50, 40, 60, 80, 70, 90] {
            encoder.push(MediaSample::Video(frame_at(ms, 2, 2))).unwrap();
        }
        let artifact = encoder.finish(DeveloperMetadata::new()).unwrap();
        assert_eq!(artifact.video_frames, 10);
        assert_eq!(artifact.duration, Duration::from_millis(100));

        let reader = ContainerReader::open(&artifact.path).unwrap();
        let pts: Vec<u64> = reader.entries(Track::Video).map(|e| e.pts_us).collect();
        assert!(pts.windows(2).all(|w| w[0] <= w[1]), "{:?}", pts);
        assert_eq!(pts.len(), 10);
    }

    #[test]
    fn frames_behind_the_window_are_dropped_not_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();

        for ms in [0, 10, 20, 30, 40, 50, 60] {
            encoder.push(MediaSample::Video(frame_at(ms, 2, 2))).unwrap();
        }
        // 30ms window: everything up to 30ms is already written
        encoder.push(MediaSample::Video(frame_at(5, 2, 2))).unwrap();
        let artifact = encoder.finish(DeveloperMetadata::new()).unwrap();

        let reader = ContainerReader::open(&artifact.path).unwrap();
        assert_eq!(reader.footer().late_dropped, 1);
        assert_eq!(artifact.video_frames, 7);
    }

    #[test]
    fn video_only_output_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        encoder.push(MediaSample::Video(frame_at(0, 4, 2))).unwrap();

        let mut metadata = DeveloperMetadata::new();
        metadata.merge([(METADATA_SCORE, 3)]);
        let artifact = encoder.finish(metadata).unwrap();

        let reader = ContainerReader::open(&artifact.path).unwrap();
        assert!(reader.footer().audio.is_none());
        assert_eq!(reader.footer().video.unwrap().width, 4);
        assert_eq!(reader.footer().metadata.len(), 1);
        assert_eq!(artifact.checksum.len(), 64);
    }

    #[test]
    fn duration_covers_audio_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        encoder.push(MediaSample::Video(frame_at(0, 2, 2))).unwrap();
        encoder.push(MediaSample::Audio(audio_at(0, 250))).unwrap();

        let artifact = encoder.finish(DeveloperMetadata::new()).unwrap();
        assert_eq!(artifact.duration, Duration::from_millis(250));
    }

    #[test]
    fn resolution_change_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        encoder.push(MediaSample::Video(frame_at(0, 2, 2))).unwrap();

        let err = encoder
            .push(MediaSample::Video(frame_at(10, 4, 4)))
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedSample(_)));
    }

    #[test]
    fn truncated_frame_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        let mut frame = frame_at(0, 2, 2);
        frame.frame.data.pop();

        let err = encoder.push(MediaSample::Video(frame)).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::EncoderFailure);
    }

    #[test]
    fn face_cam_before_first_video_frame_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        encoder.push(MediaSample::FaceCam(frame_at(0, 2, 2))).unwrap();
        encoder.push(MediaSample::FaceCam(frame_at(10, 2, 2))).unwrap();
        encoder.push(MediaSample::Video(frame_at(20, 2, 2))).unwrap();
        encoder.push(MediaSample::FaceCam(frame_at(25, 2, 2))).unwrap();
        encoder.push(MediaSample::Video(frame_at(30, 2, 2))).unwrap();

        let artifact = encoder.finish(DeveloperMetadata::new()).unwrap();
        let reader = ContainerReader::open(&artifact.path).unwrap();
        let face_cam: Vec<u64> = reader.entries(Track::FaceCam).map(|e| e.pts_us).collect();
        assert_eq!(face_cam, vec![25_000]);
    }

    #[test]
    fn abort_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Encoder::create(settings(dir.path())).unwrap();
        encoder.push(MediaSample::Video(frame_at(0, 2, 2))).unwrap();
        let path = encoder.path().clone();
        assert!(path.exists());

        encoder.abort();
        assert!(!path.exists());
    }
}
