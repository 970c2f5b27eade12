//! Audio sampling from the selected audio engine

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::AudioChunk;

use super::queue::SampleQueue;
use super::{SamplerConfig, SessionClock, StartOutcome, StopOutcome};

/// Which audio engine a session records from, resolved once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackend {
    /// Video-only recording
    None,
    /// Legacy OpenAL mixer
    OpenAl,
    /// Legacy CocosDenshion background music engine
    CocosDenshion,
    /// AVFoundation audio engine
    #[default]
    AvFoundation,
}

/// Interleaved PCM read from an audio engine
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// An audio engine the host exposes for recording
///
/// `read` must not block; `None` means no new audio since the last call.
pub trait AudioSource: Send + Sync {
    fn backend(&self) -> AudioBackend;

    fn read(&self) -> Option<PcmBuffer>;
}

/// Upper bound on reads per capture call, so a chatty source can't starve the pump
const MAX_READS_PER_CAPTURE: usize = 16;

struct AudioSamplerState {
    clock: Option<SessionClock>,
    first_pts: Option<Duration>,
    frames_total: u64,
    queue: SampleQueue<AudioChunk>,
}

/// Samples PCM from one audio engine
#[derive(Clone)]
pub struct AudioSampler {
    source: Arc<dyn AudioSource>,
    state: Arc<Mutex<AudioSamplerState>>,
}

impl AudioSampler {
    pub fn new(source: Arc<dyn AudioSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(AudioSamplerState {
                clock: None,
                first_pts: None,
                frames_total: 0,
                queue: SampleQueue::new(1),
            })),
        }
    }

    /// Pick the source for `backend` out of the ones the host registered
    pub fn resolve(backend: AudioBackend, sources: &[Arc<dyn AudioSource>]) -> Option<Self> {
        if backend == AudioBackend::None {
            return None;
        }
        let source = sources.iter().find(|s| s.backend() == backend)?;
        Some(Self::new(source.clone()))
    }

    pub fn backend(&self) -> AudioBackend {
        self.source.backend()
    }

    pub fn start(&self, config: &SamplerConfig) -> StartOutcome {
        let Ok(mut state) = self.state.lock() else {
            return StartOutcome::AlreadyRunning;
        };
        if state.clock.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        state.clock = Some(config.clock.clone());
        state.first_pts = None;
        state.frames_total = 0;
        state.queue = SampleQueue::new(config.max_buffered);
        debug!("Audio sampler started ({:?})", self.source.backend());
        StartOutcome::Started
    }

    pub fn stop(&self) -> StopOutcome {
        let Ok(mut state) = self.state.lock() else {
            return StopOutcome::NotRunning;
        };
        if state.clock.take().is_none() {
            return StopOutcome::NotRunning;
        }
        debug!(
            "Audio sampler stopped after {} frames ({} chunks dropped)",
            state.frames_total,
            state.queue.dropped()
        );
        StopOutcome::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.clock.is_some())
            .unwrap_or(false)
    }

    /// Drain whatever the engine has produced since the last call
    ///
    /// Timestamps follow the sample count from the first chunk, so audio
    /// stays gapless regardless of when the pump happens to run.
    pub fn capture(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let Some(clock) = state.clock.clone() else {
            return 0;
        };
        if clock.is_paused() {
            return 0;
        }

        let mut captured = 0;
        for _ in 0..MAX_READS_PER_CAPTURE {
            let Some(buffer) = self.source.read() else {
                break;
            };
            if buffer.channels == 0 || buffer.sample_rate == 0 {
                continue;
            }

            let first_pts = *state.first_pts.get_or_insert_with(|| clock.now());
            let offset = Duration::from_nanos(
                state.frames_total * 1_000_000_000 / buffer.sample_rate as u64,
            );
            let chunk = AudioChunk {
                pts: first_pts + offset,
                sample_rate: buffer.sample_rate,
                channels: buffer.channels,
                samples: buffer.samples,
            };
            state.frames_total += chunk.frame_count() as u64;

            if state.queue.push(chunk) {
                warn!(
                    "Encoder behind, dropped oldest audio chunk ({} total)",
                    state.queue.dropped()
                );
            }
            captured += 1;
        }
        captured
    }

    pub fn next(&self) -> Option<AudioChunk> {
        self.state.lock().ok()?.queue.pop()
    }

    pub fn discard(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::ToneSource;

    #[test]
    fn resolves_only_the_selected_backend() {
        let sources: Vec<Arc<dyn AudioSource>> = vec![
            Arc::new(ToneSource::new(AudioBackend::OpenAl, 44_100, 2, 441)),
            Arc::new(ToneSource::new(AudioBackend::AvFoundation, 44_100, 2, 441)),
        ];

        let sampler = AudioSampler::resolve(AudioBackend::AvFoundation, &sources).unwrap();
        assert_eq!(sampler.backend(), AudioBackend::AvFoundation);
        assert!(AudioSampler::resolve(AudioBackend::CocosDenshion, &sources).is_none());
        assert!(AudioSampler::resolve(AudioBackend::None, &sources).is_none());
    }

    #[test]
    fn timestamps_follow_sample_count() {
        let source = Arc::new(ToneSource::new(AudioBackend::OpenAl, 1_000, 1, 100));
        source.set_pending(3);
        let sampler = AudioSampler::new(source);
        sampler.start(&SamplerConfig::new(SessionClock::start(), 8));

        assert_eq!(sampler.capture(), 3);
        let a = sampler.next().unwrap();
        let b = sampler.next().unwrap();
        let c = sampler.next().unwrap();
        assert_eq!(b.pts - a.pts, Duration::from_millis(100));
        assert_eq!(c.pts - b.pts, Duration::from_millis(100));
        assert_eq!(c.end_pts() - a.pts, Duration::from_millis(300));
    }
}
