//! Optional face-cam overlay capture
//!
//! Runs as its own session: the host UI may toggle it at any time during or
//! outside a recording, so it reports its own started/stopped events.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::data::{FrameSample, RawFrame};
use crate::error::CaptureError;
use crate::events::{Event, EventBus};

use super::queue::SampleQueue;
use super::{SamplerConfig, SessionClock, StartOutcome, StopOutcome};

/// Front camera (and microphone) exposed by the host
pub trait CameraDevice: Send + Sync {
    /// Acquire the device; may fail if permission is missing
    fn open(&self) -> Result<(), CaptureError>;

    fn close(&self);

    /// Latest camera frame, `None` if nothing new. Must not block.
    fn grab_frame(&self) -> Option<RawFrame>;
}

struct FaceCamState {
    clock: Option<SessionClock>,
    queue: SampleQueue<FrameSample>,
}

/// Face-cam capture session
#[derive(Clone)]
pub struct FaceCamSource {
    device: Arc<dyn CameraDevice>,
    events: EventBus,
    state: Arc<Mutex<FaceCamState>>,
}

impl FaceCamSource {
    pub fn new(device: Arc<dyn CameraDevice>, events: EventBus) -> Self {
        Self {
            device,
            events,
            state: Arc::new(Mutex::new(FaceCamState {
                clock: None,
                queue: SampleQueue::new(1),
            })),
        }
    }

    /// Open the camera and start stamping frames against `config.clock`
    pub fn start(&self, config: &SamplerConfig) -> Result<StartOutcome, CaptureError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CaptureError::InvalidState("face cam state poisoned".into()))?;
            if state.clock.is_some() {
                return Ok(StartOutcome::AlreadyRunning);
            }

            self.device.open()?;
            state.clock = Some(config.clock.clone());
            state.queue = SampleQueue::new(config.max_buffered);
        }

        info!("Face cam session started");
        self.events.emit(Event::FaceCamSessionStarted);
        Ok(StartOutcome::Started)
    }

    pub fn stop(&self) -> StopOutcome {
        {
            let Ok(mut state) = self.state.lock() else {
                return StopOutcome::NotRunning;
            };
            if state.clock.take().is_none() {
                return StopOutcome::NotRunning;
            }
            state.queue.clear();
        }

        self.device.close();
        info!("Face cam session stopped");
        self.events.emit(Event::FaceCamSessionStopped);
        StopOutcome::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.clock.is_some())
            .unwrap_or(false)
    }

    /// Re-point a running face cam at a new session clock
    ///
    /// Used when a recording starts while the face cam is already on, so both
    /// streams share one timeline.
    pub fn attach_clock(&self, clock: SessionClock) {
        if let Ok(mut state) = self.state.lock() {
            if state.clock.is_some() {
                state.clock = Some(clock);
                state.queue.clear();
            }
        }
    }

    pub fn capture(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(clock) = state.clock.clone() else {
            return false;
        };
        if clock.is_paused() {
            return false;
        }
        let Some(frame) = self.device.grab_frame() else {
            return false;
        };

        let sample = FrameSample {
            pts: clock.now(),
            frame,
        };
        if state.queue.push(sample) {
            warn!("Dropped oldest face cam frame ({} total)", state.queue.dropped());
        }
        true
    }

    pub fn next(&self) -> Option<FrameSample> {
        self.state.lock().ok()?.queue.pop()
    }
}
