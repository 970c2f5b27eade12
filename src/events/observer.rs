use std::path::Path;

use uuid::Uuid;

use crate::error::CaptureError;

/// Rich lifecycle callbacks
///
/// Every method has a no-op default; implement only the ones you care about.
/// Callbacks run on the thread that produced the event and must not block.
pub trait CaptureObserver: Send + Sync {
    fn shown(&self) {}

    fn hidden(&self) {}

    /// Capture capability became known
    fn ready_for_recording(&self, _enabled: bool) {}

    fn recording_started(&self) {}

    fn recording_stopped(&self) {}

    fn face_cam_session_started(&self) {}

    fn face_cam_session_stopped(&self) {}

    fn upload_did_start(&self, _artifact_id: Uuid) {}

    /// Progress in `[0, 1]`, never decreasing for one upload
    fn upload_did_progress(&self, _artifact_id: Uuid, _progress: f64) {}

    fn upload_did_complete(&self, _artifact_id: Uuid, _remote_id: &str) {}

    /// Terminal failure or cancellation of an upload
    fn upload_did_fail(&self, _artifact_id: Uuid, _error: &CaptureError) {}

    fn thumbnail_ready_at_file_path(&self, _path: &Path) {}

    fn thumbnail_ready_at_url(&self, _url: &str) {}

    fn thumbnail_ready_at_texture_id(&self, _texture_id: u32, _portrait: bool) {}

    /// A session ended on a fatal error or a cancellation
    fn session_failed(&self, _error: &CaptureError) {}
}
