//! Capture pump: samples the sources on a cadence and feeds the encoder
//!
//! Runs as a tokio task, never on the host's render or audio thread. Every
//! hand-off to the encoder is a non-blocking `try_send`; when the encoder
//! queue has no room the samples stay in the samplers, whose bounded buffers
//! drop the oldest.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{AudioSampler, FaceCamSource, FrameSampler};
use crate::data::MediaSample;
use crate::encoder::{EncoderInput, SubmitError};

/// Why the pump exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    Stopped,
    EncoderClosed,
}

/// Frame interval policy
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub nominal: Duration,
    /// Slowest interval adaptive cadence may back off to
    pub slowest: Duration,
    pub adaptive: bool,
}

impl Cadence {
    /// Interval to use next, given the current one and the encoder queue fill
    pub fn adjust(&self, current: Duration, fill: f64) -> Duration {
        if !self.adaptive {
            return self.nominal;
        }
        if fill > 0.5 {
            (current * 2).min(self.slowest.max(self.nominal))
        } else if fill < 0.25 {
            self.nominal
        } else {
            current
        }
    }
}

#[derive(Clone)]
pub struct PumpSources {
    pub frames: FrameSampler,
    pub audio: Option<AudioSampler>,
    pub face_cam: Option<FaceCamSource>,
}

impl PumpSources {
    fn capture(&self) {
        self.frames.capture();
        if let Some(audio) = &self.audio {
            audio.capture();
        }
        if let Some(face_cam) = &self.face_cam {
            face_cam.capture();
        }
    }

    fn next(&self) -> Option<MediaSample> {
        if let Some(frame) = self.frames.next() {
            return Some(MediaSample::Video(frame));
        }
        if let Some(chunk) = self.audio.as_ref().and_then(|a| a.next()) {
            return Some(MediaSample::Audio(chunk));
        }
        self.face_cam
            .as_ref()
            .and_then(|f| f.next())
            .map(MediaSample::FaceCam)
    }

    /// Hand buffered samples to the encoder while it has room
    fn drain(&self, input: &EncoderInput) -> Result<usize, PumpExit> {
        let mut sent = 0;
        while input.capacity() > 0 {
            let Some(sample) = self.next() else {
                break;
            };
            match input.submit(sample) {
                Ok(()) => sent += 1,
                Err(SubmitError::Full(sample)) => {
                    debug!("Encoder queue full, dropped {:?} sample", sample.track());
                    break;
                }
                Err(SubmitError::Finalizing(_)) => return Err(PumpExit::Stopped),
                Err(SubmitError::Closed(_)) => return Err(PumpExit::EncoderClosed),
            }
        }
        Ok(sent)
    }

    /// Wait for room and hand over everything still buffered
    pub async fn flush(&self, input: &EncoderInput) -> usize {
        let mut sent = 0;
        while let Some(sample) = self.next() {
            if input.send(sample).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    }

    pub fn discard(&self) {
        self.frames.discard();
        if let Some(audio) = &self.audio {
            audio.discard();
        }
    }
}

/// Handle to a running pump task
pub struct Pump {
    cancel: CancellationToken,
    task: JoinHandle<PumpExit>,
}

impl Pump {
    pub fn spawn(sources: PumpSources, input: EncoderInput, cadence: Cadence) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_pump(sources, input, cadence, cancel.clone()));
        Self { cancel, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the pump to exit without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the pump and wait for its last tick to finish
    pub async fn stop(self) -> PumpExit {
        self.cancel.cancel();
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Capture pump ended abnormally: {}", e);
                PumpExit::Stopped
            }
        }
    }
}

async fn run_pump(
    sources: PumpSources,
    input: EncoderInput,
    cadence: Cadence,
    cancel: CancellationToken,
) -> PumpExit {
    let mut interval = cadence.nominal;
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpExit::Stopped,
            _ = ticker.tick() => {}
        }

        sources.capture();
        if let Err(exit) = sources.drain(&input) {
            if exit == PumpExit::EncoderClosed {
                warn!("Encoder stopped accepting samples");
            }
            return exit;
        }

        let next = cadence.adjust(interval, input.fill());
        if next != interval {
            info!(
                "Capture cadence {:?} -> {:?} (encoder queue {:.0}% full)",
                interval,
                next,
                input.fill() * 100.0
            );
            interval = next;
            ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
    }
}
