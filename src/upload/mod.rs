//! Resumable upload of finished recordings

mod manager;
mod protocol;
mod retry;

pub use manager::{UploadEvent, UploadJob, UploadManager, UploadOutcome, UploadPhase, UploadStatus};
pub use protocol::RemoteVideo;
pub use retry::RetryPolicy;
