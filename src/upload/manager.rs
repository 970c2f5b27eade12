//! Background upload jobs
//!
//! Each upload runs as its own tokio task, bounded by a semaphore so that only
//! `max_concurrent_uploads` transfers are on the wire at once. Recording never
//! waits on any of this.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::account::AccessToken;
use crate::config::UploadConfig;
use crate::data::MediaArtifact;
use crate::error::{CaptureError, ErrorCode};
use crate::events::{Event, EventBus, Notification};
use crate::thumbnail::representative_time;

use super::protocol::{ChunkStatus, CreateVideoRequest, RemoteVideo, ResumableClient, TransferError};
use super::retry::{Disposition, RetryPolicy};

/// Per-job events, keyed by the artifact id
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started {
        artifact_id: Uuid,
    },
    Progress {
        artifact_id: Uuid,
        fraction: f64,
    },
    Completed {
        artifact_id: Uuid,
        remote: RemoteVideo,
    },
    Failed {
        artifact_id: Uuid,
        code: ErrorCode,
        message: String,
    },
    Canceled {
        artifact_id: Uuid,
    },
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Completed { .. } | UploadEvent::Failed { .. } | UploadEvent::Canceled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Queued,
    Transferring,
    Completed,
    Failed,
    Canceled,
}

/// Snapshot of a job's transport state
#[derive(Debug, Clone)]
pub struct UploadStatus {
    pub phase: UploadPhase,
    pub upload_url: Option<String>,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub retries: u32,
}

impl UploadStatus {
    fn new(total_bytes: u64) -> Self {
        Self {
            phase: UploadPhase::Queued,
            upload_url: None,
            bytes_sent: 0,
            total_bytes,
            retries: 0,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.phase == UploadPhase::Completed { 1.0 } else { 0.0 };
        }
        (self.bytes_sent as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Terminal result; the artifact is always handed back
#[derive(Debug)]
pub enum UploadOutcome {
    Completed {
        artifact: MediaArtifact,
        remote: RemoteVideo,
    },
    Failed {
        artifact: MediaArtifact,
        error: CaptureError,
    },
    Canceled {
        artifact: MediaArtifact,
    },
}

impl UploadOutcome {
    pub fn artifact(&self) -> &MediaArtifact {
        match self {
            UploadOutcome::Completed { artifact, .. }
            | UploadOutcome::Failed { artifact, .. }
            | UploadOutcome::Canceled { artifact } => artifact,
        }
    }
}

/// Handle to one in-flight upload
pub struct UploadJob {
    artifact: MediaArtifact,
    status: watch::Receiver<UploadStatus>,
    events: Option<mpsc::UnboundedReceiver<UploadEvent>>,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<UploadOutcome>,
}

impl UploadJob {
    pub fn artifact_id(&self) -> Uuid {
        self.artifact.id
    }

    /// Current progress fraction in [0, 1]
    pub fn progress(&self) -> f64 {
        self.status.borrow().fraction()
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    /// Watch the status as it changes
    pub fn watch_status(&self) -> watch::Receiver<UploadStatus> {
        self.status.clone()
    }

    /// Take the event stream; only the first caller gets it
    pub fn events(&mut self) -> Option<UnboundedReceiverStream<UploadEvent>> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    /// Request cancellation; no bytes are sent once it is observed
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Non-blocking check for the terminal outcome
    pub fn try_outcome(&mut self) -> Option<UploadOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(self.lost_outcome()),
        }
    }

    pub async fn wait(mut self) -> UploadOutcome {
        match (&mut self.outcome).await {
            Ok(outcome) => outcome,
            Err(_) => self.lost_outcome(),
        }
    }

    fn lost_outcome(&self) -> UploadOutcome {
        UploadOutcome::Failed {
            artifact: self.artifact.clone(),
            error: CaptureError::Upload("upload task ended unexpectedly".to_string()),
        }
    }
}

/// Publishes progress to the job's watchers, its event stream and the bus
struct Reporter {
    artifact_id: Uuid,
    status: watch::Sender<UploadStatus>,
    events: mpsc::UnboundedSender<UploadEvent>,
    bus: EventBus,
}

impl Reporter {
    fn send(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }

    fn started(&self) {
        self.status.send_modify(|s| s.phase = UploadPhase::Transferring);
        self.bus.emit(Event::UploadDidStart(self.artifact_id));
        self.send(UploadEvent::Started {
            artifact_id: self.artifact_id,
        });
    }

    fn upload_url(&self, url: &str) {
        self.status.send_modify(|s| s.upload_url = Some(url.to_string()));
    }

    fn retried(&self) {
        self.status.send_modify(|s| s.retries += 1);
    }

    /// Report committed bytes; the reported fraction never goes backwards
    fn committed(&self, bytes: u64) {
        let mut advanced = None;
        self.status.send_if_modified(|s| {
            if bytes <= s.bytes_sent {
                return false;
            }
            s.bytes_sent = bytes.min(s.total_bytes);
            advanced = Some(s.fraction());
            true
        });

        if let Some(fraction) = advanced {
            self.bus.emit(Event::UploadDidProgress(self.artifact_id, fraction));
            self.send(UploadEvent::Progress {
                artifact_id: self.artifact_id,
                fraction,
            });
        }
    }

    fn finish(&self, outcome: &UploadOutcome) {
        let id = self.artifact_id;
        match outcome {
            UploadOutcome::Completed { remote, .. } => {
                self.status.send_modify(|s| s.phase = UploadPhase::Completed);
                self.bus.emit(Event::UploadDidComplete(id, &remote.video_id));
                if let Some(url) = remote.thumbnail_url.as_deref() {
                    self.bus.emit(Event::ThumbnailReadyAtUrl(url));
                }
                self.send(UploadEvent::Completed {
                    artifact_id: id,
                    remote: remote.clone(),
                });
            }
            UploadOutcome::Failed { error, .. } => {
                self.status.send_modify(|s| s.phase = UploadPhase::Failed);
                if matches!(error, CaptureError::Unauthorized(_)) {
                    self.bus.emit_then_notify(
                        Event::UploadDidFail(id, error),
                        Notification::DidFailToRequestAccess,
                    );
                } else {
                    self.bus.emit(Event::UploadDidFail(id, error));
                }
                self.send(UploadEvent::Failed {
                    artifact_id: id,
                    code: error.code(),
                    message: error.to_string(),
                });
            }
            UploadOutcome::Canceled { .. } => {
                self.status.send_modify(|s| s.phase = UploadPhase::Canceled);
                self.bus.emit(Event::UploadDidFail(id, &CaptureError::ExportCanceled));
                self.send(UploadEvent::Canceled { artifact_id: id });
            }
        }
    }
}

/// Starts and bounds upload jobs
#[derive(Clone)]
pub struct UploadManager {
    client: ResumableClient,
    policy: RetryPolicy,
    chunk_size: u64,
    delete_after_upload: bool,
    permits: Arc<Semaphore>,
    device_id: Arc<str>,
    events: EventBus,
}

impl UploadManager {
    pub fn new(config: &UploadConfig, events: EventBus) -> Self {
        Self {
            client: ResumableClient::new(config),
            policy: RetryPolicy::from_config(config),
            chunk_size: config.chunk_size_bytes.max(1),
            delete_after_upload: config.delete_after_upload,
            permits: Arc::new(Semaphore::new(config.max_concurrent_uploads.max(1))),
            device_id: device_id().into(),
            events,
        }
    }

    /// Check if an API endpoint is configured
    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// Start uploading `artifact` in the background
    pub fn upload(&self, artifact: MediaArtifact, token: Option<AccessToken>) -> UploadJob {
        let (status_tx, status_rx) = watch::channel(UploadStatus::new(artifact.size_bytes));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let job = UploadJob {
            artifact: artifact.clone(),
            status: status_rx,
            events: Some(event_rx),
            cancel: cancel.clone(),
            outcome: outcome_rx,
        };

        let manager = self.clone();
        tokio::spawn(async move {
            let reporter = Reporter {
                artifact_id: artifact.id,
                status: status_tx,
                events: event_tx,
                bus: manager.events.clone(),
            };
            reporter.started();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = manager.run(&artifact, token.as_ref(), &reporter) => Some(result),
            };

            let outcome = match result {
                Some(Ok(remote)) => {
                    info!(
                        "Uploaded recording {} as {} ({:.2} MB)",
                        artifact.id,
                        remote.video_id,
                        artifact.size_mb()
                    );
                    if manager.delete_after_upload {
                        match tokio::fs::remove_file(&artifact.path).await {
                            Ok(()) => debug!("Deleted uploaded file {:?}", artifact.path),
                            Err(e) => warn!("Failed to delete uploaded file {:?}: {}", artifact.path, e),
                        }
                    }
                    UploadOutcome::Completed { artifact, remote }
                }
                Some(Err(error)) => {
                    if error.is_user_cancellation() {
                        info!("Upload of {} not started: {}", artifact.id, error);
                    } else {
                        error!("Upload of {} failed: {}", artifact.id, error);
                    }
                    UploadOutcome::Failed { artifact, error }
                }
                None => {
                    info!("Upload of {} canceled", artifact.id);
                    UploadOutcome::Canceled { artifact }
                }
            };

            reporter.finish(&outcome);
            let _ = outcome_tx.send(outcome);
        });

        job
    }

    async fn run(
        &self,
        artifact: &MediaArtifact,
        token: Option<&AccessToken>,
        reporter: &Reporter,
    ) -> Result<RemoteVideo, CaptureError> {
        let token = token.ok_or(CaptureError::LoginCanceled)?;
        if !token.is_valid() {
            return Err(CaptureError::Unauthorized("access token expired".to_string()));
        }

        let total = tokio::fs::metadata(&artifact.path).await?.len();
        if total != artifact.size_bytes {
            return Err(CaptureError::Upload(format!(
                "artifact changed on disk: expected {} bytes, found {}",
                artifact.size_bytes, total
            )));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CaptureError::Upload("upload manager shut down".to_string()))?;

        let key = artifact.id.to_string();
        let request = CreateVideoRequest {
            session_id: artifact.id,
            size_bytes: total,
            duration_ms: artifact.duration.as_millis() as u64,
            checksum_sha256: &artifact.checksum,
            thumbnail_time_ms: representative_time(artifact.duration).as_millis() as u64,
            metadata: &artifact.metadata,
            device_id: &self.device_id,
        };

        info!("Uploading recording {} ({:.2} MB)", artifact.id, artifact.size_mb());

        let mut failures = 0;
        let created = loop {
            match self.client.create_video(token, &request).await {
                Ok(created) => break created,
                Err(e) => failures = self.after_failure(e, failures, &key, reporter).await?,
            }
        };
        reporter.upload_url(&created.upload_url);

        let mut failures = 0;
        let mut committed = 0u64;
        let mut resync = false;
        loop {
            let step = if resync {
                self.client
                    .query_offset(&created.upload_url, token, total)
                    .await
            } else {
                let len = self.chunk_size.min(total - committed);
                debug!("Sending bytes {}..{} of {}", committed, committed + len, total);
                self.client
                    .send_chunk(&created.upload_url, token, &artifact.path, committed, len, total)
                    .await
            };

            match step {
                Ok(ChunkStatus::Complete(remote)) => {
                    reporter.committed(total);
                    return Ok(remote);
                }
                Ok(ChunkStatus::Incomplete { committed: acked }) => {
                    let acked = acked.min(total);
                    if !resync && acked <= committed {
                        let stalled = TransferError::Transient(format!(
                            "server committed nothing past byte {}",
                            committed
                        ));
                        failures = self.after_failure(stalled, failures, &key, reporter).await?;
                        continue;
                    }
                    if acked > committed {
                        failures = 0;
                    }
                    if acked >= total {
                        return Err(CaptureError::Upload(
                            "server acknowledged every byte without completing".to_string(),
                        ));
                    }
                    committed = acked;
                    resync = false;
                    reporter.committed(committed);
                }
                Err(e) => {
                    failures = self.after_failure(e, failures, &key, reporter).await?;
                    resync = true;
                }
            }
        }
    }

    /// Back off after a failed step, or give up
    async fn after_failure(
        &self,
        error: TransferError,
        failures: u32,
        key: &str,
        reporter: &Reporter,
    ) -> Result<u32, CaptureError> {
        match error.disposition() {
            Disposition::Unauthorized => Err(CaptureError::Unauthorized(error.to_string())),
            Disposition::Permanent => Err(CaptureError::Upload(error.to_string())),
            Disposition::Transient => {
                let failures = failures + 1;
                if !self.policy.should_retry(failures) {
                    return Err(CaptureError::Upload(format!(
                        "giving up after {} attempts: {}",
                        failures, error
                    )));
                }

                let delay = self.policy.delay_for(key, failures);
                warn!(
                    "Upload step failed (attempt {}), retrying in {:?}: {}",
                    failures, delay, error
                );
                reporter.retried();
                tokio::time::sleep(delay).await;
                Ok(failures)
            }
        }
    }
}

/// Stable, non-reversible identifier for this machine
fn device_id() -> String {
    let raw = match machine_uid::get() {
        Ok(id) => id,
        Err(e) => {
            debug!("Machine id unavailable: {}", e);
            "unknown".to_string()
        }
    };
    hex::encode(&Sha256::digest(raw.as_bytes())[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DeveloperMetadata;
    use crate::events::testing::RecordingObserver;
    use crate::events::CaptureObserver;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const MIB: u64 = 1024 * 1024;

    fn artifact_of_size(dir: &Path, size: u64) -> MediaArtifact {
        let path = dir.join("session.playcast");
        std::fs::File::create(&path).unwrap().set_len(size).unwrap();
        MediaArtifact {
            id: Uuid::new_v4(),
            path,
            duration: Duration::from_secs(30),
            size_bytes: size,
            checksum: "00".repeat(32),
            video_frames: 900,
            started_at: chrono::Utc::now(),
            metadata: DeveloperMetadata::default(),
        }
    }

    fn config(server: &MockServer) -> UploadConfig {
        UploadConfig {
            api_endpoint: Some(server.uri()),
            max_attempts: 3,
            base_retry_delay_ms: 5,
            max_retry_delay_ms: 20,
            chunk_size_bytes: 5 * MIB,
            ..Default::default()
        }
    }

    fn token() -> Option<AccessToken> {
        Some(AccessToken::new("token", None))
    }

    async fn mount_create(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "video_id": "vid-123",
                "upload_url": format!("{}/upload/vid-123", server.uri()),
            })))
            .mount(server)
            .await;
    }

    /// Resumable endpoint that fails the chunk starting at `fail_at` once
    struct ResumableServer {
        total: u64,
        fail_at: u64,
        state: Mutex<(u64, bool)>,
    }

    impl ResumableServer {
        fn ack(committed: u64) -> ResponseTemplate {
            let template = ResponseTemplate::new(308);
            if committed == 0 {
                template
            } else {
                template.insert_header("Range", format!("bytes=0-{}", committed - 1).as_str())
            }
        }
    }

    impl Respond for ResumableServer {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let mut state = self.state.lock().unwrap();
            let range = request
                .headers
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            if range.starts_with("bytes */") {
                return Self::ack(state.0);
            }

            let Some((start, end)) = range
                .strip_prefix("bytes ")
                .and_then(|r| r.split_once('/'))
                .and_then(|(span, _)| span.split_once('-'))
                .and_then(|(a, b)| Some((a.parse::<u64>().ok()?, b.parse::<u64>().ok()?)))
            else {
                return ResponseTemplate::new(400);
            };

            if start != state.0 || request.body.len() as u64 != end - start + 1 {
                return ResponseTemplate::new(400);
            }
            if start == self.fail_at && !state.1 {
                state.1 = true;
                return ResponseTemplate::new(503);
            }

            state.0 = end + 1;
            if state.0 == self.total {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "video_id": "vid-123",
                    "thumbnail_url": "https://cdn.example.com/vid-123.jpg",
                }))
            } else {
                Self::ack(state.0)
            }
        }
    }

    #[tokio::test]
    async fn transient_failure_at_forty_percent_resumes_to_completion() {
        let server = MockServer::start().await;
        let total = 50 * MIB;
        mount_create(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/vid-123"))
            .respond_with(ResumableServer {
                total,
                fail_at: 20 * MIB,
                state: Mutex::new((0, false)),
            })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_of_size(dir.path(), total);
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());
        bus.set_observer(observer.clone());

        let manager = UploadManager::new(&config(&server), bus);
        let mut job = manager.upload(artifact.clone(), token());
        let mut events = job.events().unwrap();

        let outcome = job.wait().await;
        let UploadOutcome::Completed { artifact: returned, remote } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(returned.id, artifact.id);
        assert_eq!(remote.video_id, "vid-123");
        assert!(returned.path.exists());

        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(UploadEvent::Started { .. })));
        assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(seen.last().unwrap().is_terminal());

        let fractions: Vec<f64> = seen
            .iter()
            .filter_map(|e| match e {
                UploadEvent::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fractions.last().copied(), Some(1.0));

        let observed = observer.events();
        assert_eq!(observed.first().map(String::as_str), Some("upload_start"));
        assert!(observed.contains(&"upload_complete:vid-123".to_string()));
        assert!(observed.contains(&"thumbnail_url:https://cdn.example.com/vid-123.jpg".to_string()));
    }

    #[tokio::test]
    async fn rejected_credential_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let mut notifications = bus.subscribe();
        let manager = UploadManager::new(&config(&server), bus);

        let outcome = manager
            .upload(artifact_of_size(dir.path(), 1024), token())
            .wait()
            .await;
        let UploadOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.code(), ErrorCode::FileUploadError);
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::DidFailToRequestAccess
        );
    }

    /// Records whether the access-failure broadcast had already arrived
    /// when the failure callback ran
    struct FailureOrder {
        notifications: Mutex<tokio::sync::broadcast::Receiver<Notification>>,
        broadcast_first: Mutex<Option<bool>>,
    }

    impl CaptureObserver for FailureOrder {
        fn upload_did_fail(&self, _artifact_id: Uuid, _error: &CaptureError) {
            let early = self.notifications.lock().unwrap().try_recv().is_ok();
            *self.broadcast_first.lock().unwrap() = Some(early);
        }
    }

    async fn failure_order_for(server: &MockServer, token: AccessToken) -> Option<bool> {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let mut after = bus.subscribe();
        let observer = Arc::new(FailureOrder {
            notifications: Mutex::new(bus.subscribe()),
            broadcast_first: Mutex::new(None),
        });
        bus.set_observer(observer.clone());

        let outcome = UploadManager::new(&config(server), bus)
            .upload(artifact_of_size(dir.path(), 1024), Some(token))
            .wait()
            .await;
        assert!(matches!(outcome, UploadOutcome::Failed { .. }));
        assert_eq!(after.recv().await.unwrap(), Notification::DidFailToRequestAccess);

        let order = *observer.broadcast_first.lock().unwrap();
        order
    }

    #[tokio::test]
    async fn access_failure_reaches_observer_before_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let rejected = failure_order_for(&server, AccessToken::new("token", None)).await;
        assert_eq!(rejected, Some(false));

        let expired = AccessToken::new("token", Some(chrono::Utc::now() - chrono::Duration::hours(1)));
        assert_eq!(failure_order_for(&server, expired).await, Some(false));
    }

    #[tokio::test]
    async fn acknowledgements_without_progress_back_off_and_give_up() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/vid-123"))
            .respond_with(ResponseTemplate::new(308))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = UploadManager::new(&config(&server), EventBus::new());
        let job = manager.upload(artifact_of_size(dir.path(), 1024), token());
        let status = job.watch_status();

        let outcome = tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .expect("upload never reached a terminal state");
        let UploadOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(error.code(), ErrorCode::FileUploadError);
        assert_eq!(status.borrow().retries, 2);
        assert_eq!(status.borrow().bytes_sent, 0);
    }

    #[tokio::test]
    async fn missing_credential_is_login_cancel() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadManager::new(&config(&server), EventBus::new());

        let outcome = manager.upload(artifact_of_size(dir.path(), 16), None).wait().await;
        let UploadOutcome::Failed { error, artifact } = outcome else {
            panic!("expected failure");
        };
        assert!(error.is_canceled());
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = UploadManager::new(&config(&server), EventBus::new());
        let mut job = manager.upload(artifact_of_size(dir.path(), 1024), token());
        let status = job.watch_status();
        let mut events = job.events().unwrap();

        let outcome = job.wait().await;
        assert!(matches!(outcome, UploadOutcome::Failed { .. }));
        assert_eq!(status.borrow().retries, 2);
        assert_eq!(status.borrow().phase, UploadPhase::Failed);

        let mut terminal = 0;
        while let Some(event) = events.next().await {
            if event.is_terminal() {
                terminal += 1;
            }
        }
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_transfer_and_keeps_artifact() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/vid-123"))
            .respond_with(ResponseTemplate::new(308).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver::default());
        bus.set_observer(observer.clone());
        let manager = UploadManager::new(&config(&server), bus);

        let mut job = manager.upload(artifact_of_size(dir.path(), 1024), token());
        let mut status = job.watch_status();
        let mut events = job.events().unwrap();
        status
            .wait_for(|s| s.upload_url.is_some())
            .await
            .unwrap();
        job.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .unwrap();
        let UploadOutcome::Canceled { artifact } = outcome else {
            panic!("expected cancel");
        };
        assert!(artifact.path.exists());

        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            seen.push(event);
        }
        assert!(matches!(seen.last(), Some(UploadEvent::Canceled { .. })));
        assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(observer.events().contains(&"upload_failed:101".to_string()));
    }
}
