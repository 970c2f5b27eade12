//! Capture controller
//!
//! Owns the single active [`Session`], the encoder thread behind it and the
//! upload job that follows. It is an ordinary owned value: hosts (and tests)
//! may create as many independent controllers as they like.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::account::{AccessToken, AccountStore};
use crate::capability::HostInfo;
use crate::capture::{
    AudioBackend, AudioSampler, AudioSource, CameraDevice, FaceCamSource, FrameSampler,
    FrameSurface, HostEvent, SamplerConfig, SessionClock, StartOutcome, StopOutcome,
};
use crate::config::Config;
use crate::data::{DeveloperMetadata, MediaArtifact, MetadataValue};
use crate::encoder::EncoderHandle;
use crate::error::CaptureError;
use crate::events::{Event, EventBus};
use crate::thumbnail::{TextureUploader, ThumbnailExtractor};
use crate::upload::{RemoteVideo, UploadJob, UploadManager, UploadOutcome};

use super::pump::{Cadence, Pump, PumpSources};
use super::session::{Session, SessionConfig};
use super::State;

/// Drives sampling, encoding and upload for one host
pub struct CaptureController {
    config: Config,
    events: EventBus,
    accounts: AccountStore,
    host: HostInfo,
    surface: Arc<dyn FrameSurface>,
    audio_sources: Vec<Arc<dyn AudioSource>>,
    face_cam: Option<FaceCamSource>,
    uploads: UploadManager,
    thumbnails: ThumbnailExtractor,
    state: watch::Sender<State>,
    capability: Option<bool>,
    visible: bool,
    session: Option<Session>,
    pending_metadata: DeveloperMetadata,
    last_recording: Option<MediaArtifact>,
    last_remote: Option<RemoteVideo>,
    last_error: Option<CaptureError>,
    upload: Option<UploadJob>,
}

impl CaptureController {
    pub fn new(config: Config, surface: Arc<dyn FrameSurface>, events: EventBus) -> Self {
        let (state, _) = watch::channel(State::Idle);
        Self {
            accounts: AccountStore::new(&config.account, events.clone()),
            uploads: UploadManager::new(&config.upload, events.clone()),
            thumbnails: ThumbnailExtractor::new(config.recording.thumbnail_max_width),
            host: HostInfo::detect(),
            surface,
            audio_sources: Vec::new(),
            face_cam: None,
            state,
            capability: None,
            visible: false,
            session: None,
            pending_metadata: DeveloperMetadata::new(),
            last_recording: None,
            last_remote: None,
            last_error: None,
            upload: None,
            config,
            events,
        }
    }

    /// Register an audio engine; the configured backend picks one per session
    pub fn with_audio_source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.audio_sources.push(source);
        self
    }

    pub fn with_camera(mut self, device: Arc<dyn CameraDevice>) -> Self {
        self.face_cam = Some(FaceCamSource::new(device, self.events.clone()));
        self
    }

    pub fn with_accounts(mut self, accounts: AccountStore) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn with_texture_uploader(mut self, textures: Arc<dyn TextureUploader>) -> Self {
        self.thumbnails = ThumbnailExtractor::new(self.config.recording.thumbnail_max_width)
            .with_texture_uploader(textures);
        self
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn thumbnails(&self) -> &ThumbnailExtractor {
        &self.thumbnails
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn last_recording(&self) -> Option<&MediaArtifact> {
        self.last_recording.as_ref()
    }

    pub fn last_remote(&self) -> Option<&RemoteVideo> {
        self.last_remote.as_ref()
    }

    /// Error from the most recent background failure or cancel
    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }

    pub fn upload_progress(&self) -> Option<f64> {
        self.upload.as_ref().map(UploadJob::progress)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether this host can record at all; no side effects
    pub fn is_capture_supported(&self) -> bool {
        self.host.supports(&self.config.capture)
    }

    /// Check capability and announce whether recording is available
    pub fn prepare(&mut self) -> bool {
        let supported = self.is_capture_supported();
        self.capability = Some(supported);

        match (supported, self.state()) {
            (true, State::Idle) => self.transition(State::ReadyForRecording),
            (false, State::ReadyForRecording) => self.transition(State::Idle),
            _ => {}
        }
        if !supported {
            warn!(
                "Capture unsupported on this host ({:?}, need {} cores, OS {})",
                self.host, self.config.capture.min_cpu_cores, self.config.capture.min_os_version
            );
        }

        self.events.emit(Event::ReadyForRecording(supported));
        supported
    }

    pub fn show(&mut self) {
        self.visible = true;
        self.events.emit(Event::Shown);
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.events.emit(Event::Hidden);
    }

    /// Report whether `url` belongs to the authorization flow
    pub fn handle_redirect_url(&self, url: &str) -> bool {
        self.accounts.handle_redirect_url(url)
    }

    /// Merge developer metadata into the current session
    ///
    /// Outside a session the values are kept for the next one.
    pub fn merge_session_developer_data<I, K, V>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        match self.session.as_mut() {
            Some(session) => session.metadata.merge(data),
            None => self.pending_metadata.merge(data),
        }
    }

    pub fn session_metadata(&self) -> &DeveloperMetadata {
        self.session
            .as_ref()
            .map(|s| &s.metadata)
            .unwrap_or(&self.pending_metadata)
    }

    /// Start recording a new session
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<Uuid, CaptureError> {
        match self.state() {
            State::Recording | State::Paused => return Err(CaptureError::AlreadyActive("recording")),
            State::Uploading => return Err(CaptureError::AlreadyActive("uploading")),
            State::ReadyForRecording => {}
            other => {
                return Err(CaptureError::InvalidState(format!(
                    "cannot start recording while {:?}",
                    other
                )))
            }
        }
        tokio::runtime::Handle::try_current()
            .map_err(|_| CaptureError::InvalidState("recording needs a tokio runtime".into()))?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let settings = Session::encoder_settings(id, started_at, &self.config);
        let output = settings.output_path();
        let encoder = match EncoderHandle::spawn(settings) {
            Ok(encoder) => encoder,
            Err(e) => {
                error!("Failed to start encoder: {}", e);
                self.events.emit(Event::SessionFailed(&e));
                return Err(e);
            }
        };

        let clock = SessionClock::start();
        let sampler_config = SamplerConfig::new(clock.clone(), self.config.capture.max_buffered_samples);

        let frames = FrameSampler::new(self.surface.clone());
        frames.start(&sampler_config);

        let backend = self.config.capture.audio_backend;
        let audio = AudioSampler::resolve(backend, &self.audio_sources);
        match &audio {
            Some(audio) => {
                audio.start(&sampler_config);
            }
            None if backend != AudioBackend::None => {
                warn!("No audio source for {:?}, recording video only", backend);
            }
            None => {}
        }

        if let Some(face_cam) = &self.face_cam {
            face_cam.attach_clock(clock.clone());
        }

        let sources = PumpSources {
            frames,
            audio,
            face_cam: self.face_cam.clone(),
        };
        let capture = &self.config.capture;
        let cadence = Cadence {
            nominal: capture.frame_interval(),
            slowest: Duration::from_secs_f64(1.0 / capture.min_fps.clamp(1, capture.fps.max(1)) as f64),
            adaptive: capture.adaptive_cadence,
        };
        let pump = Pump::spawn(sources.clone(), encoder.input(), cadence);

        self.session = Some(Session {
            id,
            started_at,
            config: SessionConfig::from_config(&self.config),
            metadata: std::mem::take(&mut self.pending_metadata),
            clock,
            sources,
            encoder,
            pump: Some(pump),
        });
        self.last_error = None;

        info!("Recording started: session={}, output={:?}", id, output);
        self.transition(State::Recording);
        self.events.emit(Event::RecordingStarted);
        Ok(id)
    }

    /// Stop sampling, flush, and wait (bounded) for the finished recording
    pub async fn stop(&mut self) -> Result<MediaArtifact, CaptureError> {
        if !self.state().is_recording() {
            return Err(CaptureError::InvalidState("no recording in progress".into()));
        }
        let Some(mut session) = self.session.take() else {
            return Err(CaptureError::InvalidState("no recording in progress".into()));
        };

        info!("Stopping recording {} after {:?}", session.id, session.elapsed());
        session.clock.resume();
        if let Some(pump) = session.pump.take() {
            pump.stop().await;
        }
        session.sources.frames.stop();
        if let Some(audio) = &session.sources.audio {
            audio.stop();
        }

        let flushed = session.sources.flush(&session.encoder.input()).await;
        debug!("Flushed {} buffered samples", flushed);

        self.transition(State::Stopped);
        self.events.emit(Event::RecordingStopped);

        let timeout = self.config.recording.finalize_timeout();
        let artifact = match session.encoder.finalize(session.metadata, timeout).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        info!(
            "Recording finalized: {:?} ({:.2} MB, {:?}, {} frames)",
            artifact.path,
            artifact.size_mb(),
            artifact.duration,
            artifact.video_frames
        );
        self.last_recording = Some(artifact.clone());

        if self.config.recording.thumbnail_on_stop {
            match self.thumbnails.extract_to_file(&artifact) {
                Ok(thumbnail) => thumbnail.announce(&self.events),
                Err(e) => warn!("Failed to extract thumbnail: {}", e),
            }
        }

        if self.config.recording.upload_on_stop && self.uploads.is_configured() {
            let token = self.accounts.token();
            if let Err(e) = self.begin_upload(artifact.clone(), token) {
                warn!("Could not start upload: {}", e);
                self.settle();
            }
        } else {
            self.settle();
        }

        Ok(artifact)
    }

    /// Cancel whatever is in progress
    ///
    /// A recording is discarded outright. An upload is asked to stop; its
    /// outcome arrives through [`poll`](Self::poll) or
    /// [`wait_for_upload`](Self::wait_for_upload).
    pub fn cancel(&mut self) -> Result<(), CaptureError> {
        match self.state() {
            State::Recording | State::Paused => {
                let Some(mut session) = self.session.take() else {
                    return Err(CaptureError::InvalidState("no recording in progress".into()));
                };
                if let Some(pump) = session.pump.take() {
                    pump.cancel();
                }
                session.sources.frames.stop();
                if let Some(audio) = &session.sources.audio {
                    audio.stop();
                }
                session.sources.discard();
                session.encoder.abort();

                info!("Recording {} canceled", session.id);
                let error = CaptureError::ExportCanceled;
                self.transition(State::Canceled);
                self.events.emit(Event::SessionFailed(&error));
                self.last_error = Some(error);
                self.settle();
                Ok(())
            }
            State::Uploading => {
                if let Some(job) = &self.upload {
                    info!("Canceling upload of {}", job.artifact_id());
                    job.cancel();
                }
                Ok(())
            }
            other => Err(CaptureError::InvalidState(format!(
                "nothing to cancel while {:?}",
                other
            ))),
        }
    }

    pub fn pause(&mut self) -> Result<(), CaptureError> {
        match self.state() {
            State::Recording => {
                if let Some(session) = &self.session {
                    session.clock.pause();
                }
                self.transition(State::Paused);
                Ok(())
            }
            State::Paused => Ok(()),
            other => Err(CaptureError::InvalidState(format!("cannot pause while {:?}", other))),
        }
    }

    pub fn resume(&mut self) -> Result<(), CaptureError> {
        match self.state() {
            State::Paused => {
                if let Some(session) = &self.session {
                    session.clock.resume();
                }
                self.transition(State::Recording);
                Ok(())
            }
            State::Recording => Ok(()),
            other => Err(CaptureError::InvalidState(format!("cannot resume while {:?}", other))),
        }
    }

    /// React to the host application's lifecycle
    pub async fn on_host_event(&mut self, event: HostEvent) -> Result<(), CaptureError> {
        debug!("Host event: {:?}", event);
        match event {
            HostEvent::DidEnterBackground if self.state() == State::Recording => self.pause(),
            HostEvent::WillEnterForeground if self.state() == State::Paused => self.resume(),
            HostEvent::WillTerminate => {
                self.stop_face_cam();
                if self.state().is_recording() {
                    self.stop().await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Start the face-cam overlay, on the session clock if recording
    pub fn start_face_cam(&mut self) -> Result<StartOutcome, CaptureError> {
        if !self.config.capture.face_cam_enabled {
            return Err(CaptureError::Unsupported);
        }
        let face_cam = self.face_cam.as_ref().ok_or(CaptureError::Unsupported)?;
        let clock = self
            .session
            .as_ref()
            .map(|s| s.clock.clone())
            .unwrap_or_else(SessionClock::start);
        face_cam.start(&SamplerConfig::new(clock, self.config.capture.max_buffered_samples))
    }

    pub fn stop_face_cam(&mut self) -> StopOutcome {
        self.face_cam
            .as_ref()
            .map(FaceCamSource::stop)
            .unwrap_or(StopOutcome::NotRunning)
    }

    /// Upload (or retry) the most recent recording
    pub fn upload_last_recording(&mut self, token: Option<AccessToken>) -> Result<Uuid, CaptureError> {
        match self.state() {
            State::Recording | State::Paused => return Err(CaptureError::AlreadyActive("recording")),
            State::Uploading => return Err(CaptureError::AlreadyActive("uploading")),
            _ => {}
        }
        let artifact = self
            .last_recording
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("no recording to upload".into()))?;
        if !artifact.path.exists() {
            return Err(CaptureError::InvalidState(format!(
                "recording {:?} no longer exists",
                artifact.path
            )));
        }

        let token = token.or_else(|| self.accounts.token());
        self.begin_upload(artifact, token)
    }

    /// Wait for the current upload to reach its terminal state
    pub async fn wait_for_upload(&mut self) -> Result<RemoteVideo, CaptureError> {
        let job = self
            .upload
            .take()
            .ok_or_else(|| CaptureError::InvalidState("no upload in progress".into()))?;
        let outcome = job.wait().await;
        self.finish_upload(outcome)
    }

    /// Reconcile background work: a dead encoder or a finished upload
    pub async fn poll(&mut self) {
        let pump_exited = self
            .session
            .as_ref()
            .and_then(|s| s.pump.as_ref())
            .map(Pump::is_finished)
            .unwrap_or(false);

        if pump_exited && self.state().is_recording() {
            if let Some(session) = self.session.take() {
                session.sources.frames.stop();
                if let Some(audio) = &session.sources.audio {
                    audio.stop();
                }
                session.sources.discard();

                let timeout = self.config.recording.finalize_timeout();
                match session.encoder.finalize(session.metadata, timeout).await {
                    Ok(artifact) => {
                        warn!("Encoder finished on its own: {:?}", artifact.path);
                        self.last_recording = Some(artifact);
                        self.events.emit(Event::RecordingStopped);
                        self.settle();
                    }
                    Err(e) => {
                        self.fail(&e);
                        self.last_error = Some(e);
                    }
                }
            }
        }

        let outcome = self.upload.as_mut().and_then(UploadJob::try_outcome);
        if let Some(outcome) = outcome {
            self.upload = None;
            if let Err(e) = self.finish_upload(outcome) {
                self.last_error = Some(e);
            }
        }
    }

    fn begin_upload(
        &mut self,
        artifact: MediaArtifact,
        token: Option<AccessToken>,
    ) -> Result<Uuid, CaptureError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| CaptureError::InvalidState("uploading needs a tokio runtime".into()))?;

        let job = self.uploads.upload(artifact, token);
        let id = job.artifact_id();
        self.upload = Some(job);
        self.transition(State::Uploading);
        Ok(id)
    }

    fn finish_upload(&mut self, outcome: UploadOutcome) -> Result<RemoteVideo, CaptureError> {
        let result = match outcome {
            UploadOutcome::Completed { artifact, remote } => {
                self.last_recording = Some(artifact);
                self.last_remote = Some(remote.clone());
                Ok(remote)
            }
            UploadOutcome::Failed { artifact, error } => {
                self.last_recording = Some(artifact);
                self.transition(State::Failed);
                Err(error)
            }
            UploadOutcome::Canceled { artifact } => {
                self.last_recording = Some(artifact);
                self.transition(State::Canceled);
                Err(CaptureError::ExportCanceled)
            }
        };
        self.settle();
        result
    }

    fn fail(&mut self, error: &CaptureError) {
        if error.is_user_cancellation() {
            info!("Session ended: {}", error);
        } else {
            error!("Session failed: {}", error);
        }
        self.transition(State::Failed);
        self.events.emit(Event::SessionFailed(error));
        self.settle();
    }

    /// Return to Idle, and on to ReadyForRecording when capability is known
    fn settle(&mut self) {
        self.transition(State::Idle);
        if self.capability == Some(true) {
            self.transition(State::ReadyForRecording);
            self.events.emit(Event::ReadyForRecording(true));
        }
    }

    fn transition(&self, to: State) {
        let from = self.state();
        if from != to {
            debug!("Controller state {:?} -> {:?}", from, to);
            self.state.send_replace(to);
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            warn!("Controller dropped while recording, discarding session {}", session.id);
            if let Some(pump) = session.pump.take() {
                pump.cancel();
            }
            session.encoder.abort();
        }
    }
}
