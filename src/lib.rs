//! playcast
//!
//! In-game gameplay recording: sample the host's frames, audio and optional
//! face cam, encode them off the game loop into a single artifact, extract a
//! thumbnail, and upload the result with resumable transfers.

pub mod account;
pub mod capability;
pub mod capture;
pub mod config;
pub mod controller;
pub mod data;
pub mod encoder;
pub mod error;
pub mod events;
pub mod logging;
pub mod thumbnail;
pub mod upload;

pub use capability::is_supported;
pub use config::Config;
pub use controller::{CaptureController, State};
pub use error::{CaptureError, ErrorCode, ERROR_DOMAIN};
pub use events::{CaptureObserver, Event, EventBus, Notification};
