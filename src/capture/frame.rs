//! Frame sampling from the host's rendering surface

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::data::{FrameSample, RawFrame};

use super::queue::SampleQueue;
use super::{SamplerConfig, SessionClock, StartOutcome, StopOutcome};

/// The host's rendering surface
///
/// `grab_frame` is called from the capture pump, never from the render
/// thread, and must return immediately. `None` means no new frame since the
/// last call.
pub trait FrameSurface: Send + Sync {
    fn grab_frame(&self) -> Option<RawFrame>;
}

struct FrameSamplerState {
    clock: Option<SessionClock>,
    queue: SampleQueue<FrameSample>,
}

/// Samples frames at the instants the capture pump requests
#[derive(Clone)]
pub struct FrameSampler {
    surface: Arc<dyn FrameSurface>,
    state: Arc<Mutex<FrameSamplerState>>,
}

impl FrameSampler {
    pub fn new(surface: Arc<dyn FrameSurface>) -> Self {
        Self {
            surface,
            state: Arc::new(Mutex::new(FrameSamplerState {
                clock: None,
                queue: SampleQueue::new(1),
            })),
        }
    }

    pub fn start(&self, config: &SamplerConfig) -> StartOutcome {
        let Ok(mut state) = self.state.lock() else {
            return StartOutcome::AlreadyRunning;
        };
        if state.clock.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        state.clock = Some(config.clock.clone());
        state.queue = SampleQueue::new(config.max_buffered);
        debug!("Frame sampler started (buffer {})", config.max_buffered);
        StartOutcome::Started
    }

    /// Stop sampling; buffered frames stay available through `next()`
    pub fn stop(&self) -> StopOutcome {
        let Ok(mut state) = self.state.lock() else {
            return StopOutcome::NotRunning;
        };
        if state.clock.take().is_none() {
            return StopOutcome::NotRunning;
        }
        debug!("Frame sampler stopped ({} frames dropped)", state.queue.dropped());
        StopOutcome::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.clock.is_some())
            .unwrap_or(false)
    }

    /// Grab the current surface contents, stamped with the session clock
    ///
    /// Returns true if a frame was buffered.
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
        let Some(frame) = self.surface.grab_frame() else {
            return false;
        };

        let sample = FrameSample {
            pts: clock.now(),
            frame,
        };
        if state.queue.push(sample) {
            warn!(
                "Encoder behind, dropped oldest frame ({} total)",
                state.queue.dropped()
            );
        }
        true
    }

    /// Pull the oldest buffered frame; `None` when nothing new is available
    pub fn next(&self) -> Option<FrameSample> {
        self.state.lock().ok()?.queue.pop()
    }

    /// Discard anything still buffered
    pub fn discard(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
        }
    }

    pub fn buffered(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|s| s.queue.dropped()).unwrap_or(0)
    }
}
