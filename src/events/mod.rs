//! Lifecycle events: one rich observer plus broadcast notifications
//!
//! Every component holds a clone of [`EventBus`]. Events are delivered on the
//! thread that produced the transition: the observer callback runs first, any
//! broadcast notification goes out after it.

mod observer;

pub use observer::CaptureObserver;

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::CaptureError;

/// Cross-cutting account notifications, deliverable to any number of listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    AccountDidChange,
    DidFailToRequestAccess,
}

/// Lifecycle events routed to the observer
#[derive(Debug)]
pub enum Event<'a> {
    Shown,
    Hidden,
    ReadyForRecording(bool),
    RecordingStarted,
    RecordingStopped,
    FaceCamSessionStarted,
    FaceCamSessionStopped,
    UploadDidStart(Uuid),
    UploadDidProgress(Uuid, f64),
    UploadDidComplete(Uuid, &'a str),
    UploadDidFail(Uuid, &'a CaptureError),
    ThumbnailReadyAtFilePath(&'a Path),
    ThumbnailReadyAtUrl(&'a str),
    ThumbnailReadyAtTextureId { texture_id: u32, portrait: bool },
    SessionFailed(&'a CaptureError),
}

const NOTIFICATION_CAPACITY: usize = 16;

/// Process-wide event fan-out
#[derive(Clone)]
pub struct EventBus {
    observer: Arc<RwLock<Option<Arc<dyn CaptureObserver>>>>,
    notifications: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            observer: Arc::new(RwLock::new(None)),
            notifications,
        }
    }

    /// Install the single observer, replacing any previous one
    pub fn set_observer(&self, observer: Arc<dyn CaptureObserver>) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = Some(observer);
        }
    }

    pub fn clear_observer(&self) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = None;
        }
    }

    /// Listen for broadcast notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Deliver an event to the observer, if any
    pub fn emit(&self, event: Event<'_>) {
        let observer = match self.observer.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(observer) = observer else {
            debug!("No observer for {:?}", event);
            return;
        };

        match event {
            Event::Shown => observer.shown(),
            Event::Hidden => observer.hidden(),
            Event::ReadyForRecording(enabled) => observer.ready_for_recording(enabled),
            Event::RecordingStarted => observer.recording_started(),
            Event::RecordingStopped => observer.recording_stopped(),
            Event::FaceCamSessionStarted => observer.face_cam_session_started(),
            Event::FaceCamSessionStopped => observer.face_cam_session_stopped(),
            Event::UploadDidStart(id) => observer.upload_did_start(id),
            Event::UploadDidProgress(id, progress) => observer.upload_did_progress(id, progress),
            Event::UploadDidComplete(id, remote_id) => observer.upload_did_complete(id, remote_id),
            Event::UploadDidFail(id, error) => observer.upload_did_fail(id, error),
            Event::ThumbnailReadyAtFilePath(path) => observer.thumbnail_ready_at_file_path(path),
            Event::ThumbnailReadyAtUrl(url) => observer.thumbnail_ready_at_url(url),
            Event::ThumbnailReadyAtTextureId { texture_id, portrait } => {
                observer.thumbnail_ready_at_texture_id(texture_id, portrait)
            }
            Event::SessionFailed(error) => observer.session_failed(error),
        }
    }

    /// Deliver an observer event and then a notification, in that order
    pub fn emit_then_notify(&self, event: Event<'_>, notification: Notification) {
        self.emit(event);
        self.notify(notification);
    }

    /// Broadcast a notification; fire-and-forget
    pub fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("No listeners for {:?}", notification);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingObserver;
    use super::*;

    struct OnlyStarted(std::sync::Mutex<u32>);

    impl CaptureObserver for OnlyStarted {
        fn recording_started(&self) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn missing_callbacks_are_no_ops() {
        let bus = EventBus::new();
        let observer = Arc::new(OnlyStarted(std::sync::Mutex::new(0)));
        bus.set_observer(observer.clone());

        bus.emit(Event::Shown);
        bus.emit(Event::UploadDidProgress(Uuid::new_v4(), 0.5));
        bus.emit(Event::RecordingStarted);

        assert_eq!(*observer.0.lock().unwrap(), 1);
    }

    #[test]
    fn emitting_without_observer_or_listeners_is_silent() {
        let bus = EventBus::new();
        bus.emit(Event::RecordingStopped);
        bus.notify(Notification::AccountDidChange);
    }

    #[tokio::test]
    async fn observer_runs_before_broadcast() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());
        bus.set_observer(observer.clone());
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit_then_notify(Event::Hidden, Notification::DidFailToRequestAccess);

        // The observer already saw its callback by the time listeners read
        assert_eq!(observer.events(), vec!["hidden".to_string()]);
        assert_eq!(first.recv().await.unwrap(), Notification::DidFailToRequestAccess);
        assert_eq!(second.recv().await.unwrap(), Notification::DidFailToRequestAccess);
    }
}
