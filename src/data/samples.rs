//! Sample types handed from the samplers to the encoder
//!
//! Samples are moved, never shared: once a sampler hands one over it no
//! longer has access to the buffer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// A raw frame as delivered by the host surface
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Expected byte length for the declared geometry
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// A timestamped frame owned by whoever holds it
#[derive(Debug)]
pub struct FrameSample {
    /// Presentation time on the session clock
    pub pts: Duration,
    pub frame: RawFrame,
}

/// Interleaved signed 16-bit PCM with its presentation time
#[derive(Debug)]
pub struct AudioChunk {
    pub pts: Duration,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length of this chunk
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.frame_count() as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// End of this chunk on the session clock
    pub fn end_pts(&self) -> Duration {
        self.pts + self.duration()
    }
}

/// Encoder tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Track {
    Video = 0,
    Audio = 1,
    FaceCam = 2,
}

/// Anything the encoder accepts
#[derive(Debug)]
pub enum MediaSample {
    Video(FrameSample),
    Audio(AudioChunk),
    FaceCam(FrameSample),
}

impl MediaSample {
    pub fn pts(&self) -> Duration {
        match self {
            MediaSample::Video(f) | MediaSample::FaceCam(f) => f.pts,
            MediaSample::Audio(a) => a.pts,
        }
    }

    pub fn track(&self) -> Track {
        match self {
            MediaSample::Video(_) => Track::Video,
            MediaSample::Audio(_) => Track::Audio,
            MediaSample::FaceCam(_) => Track::FaceCam,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_duration_uses_frames_not_samples() {
        let chunk = AudioChunk {
            pts: Duration::from_millis(500),
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0; 48_000],
        };
        assert_eq!(chunk.frame_count(), 24_000);
        assert_eq!(chunk.duration(), Duration::from_millis(500));
        assert_eq!(chunk.end_pts(), Duration::from_secs(1));
    }
}
