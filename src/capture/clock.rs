//! Session clock shared by every stream of one recording
//!
//! Paused time is excluded, so presentation timestamps stay contiguous across
//! background/foreground transitions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct ClockState {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

/// Monotonic clock, cheap to clone
#[derive(Debug, Clone)]
pub struct SessionClock {
    state: Arc<Mutex<ClockState>>,
}

impl SessionClock {
    /// Start a clock at zero
    pub fn start() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                started: Instant::now(),
                paused_at: None,
                paused_total: Duration::ZERO,
            })),
        }
    }

    /// Active time since the clock started
    pub fn now(&self) -> Duration {
        let Ok(state) = self.state.lock() else {
            return Duration::ZERO;
        };
        let reference = state.paused_at.unwrap_or_else(Instant::now);
        reference
            .saturating_duration_since(state.started)
            .saturating_sub(state.paused_total)
    }

    pub fn pause(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.paused_at.is_none() {
                state.paused_at = Some(Instant::now());
            }
        }
    }

    pub fn resume(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(paused_at) = state.paused_at.take() {
                state.paused_total += Instant::now().saturating_duration_since(paused_at);
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.paused_at.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_excluded() {
        let clock = SessionClock::start();
        tokio::time::advance(Duration::from_secs(2)).await;
        clock.pause();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.now(), Duration::from_secs(2));

        clock.resume();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(clock.now(), Duration::from_secs(3));
        assert!(!clock.is_paused());
    }
}
