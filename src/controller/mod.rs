//! Capture lifecycle: one session at a time, from ready to uploaded
//!
//! ```text
//! Idle -> ReadyForRecording -> Recording <-> Paused
//!                                  |
//!                               Stopped -> (Uploading) -> Idle
//! ```
//!
//! `Canceled` and `Failed` are passed through on the way back to `Idle`.
//! Whenever capability was confirmed the controller then moves on to
//! `ReadyForRecording` again.

mod machine;
mod pump;
mod session;

pub use machine::CaptureController;
pub use pump::Cadence;
pub use session::{Session, SessionConfig};

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    ReadyForRecording,
    Recording,
    Paused,
    Stopped,
    Uploading,
    Canceled,
    Failed,
}

impl State {
    /// A session or upload currently owns the controller
    pub fn is_active(self) -> bool {
        matches!(self, State::Recording | State::Paused | State::Uploading)
    }

    pub fn is_recording(self) -> bool {
        matches!(self, State::Recording | State::Paused)
    }
}
