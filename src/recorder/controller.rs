//! Session controller
//!
//! The top-level recording state machine and the only component the UI talks
//! to. Lifecycle calls are serialized: while one transition is in flight,
//! every other call except `stop()` during `Starting` is rejected with
//! [`AppError::Busy`].

use super::media_recorder::MediaRecorder;
use super::state::{RecordingRecord, RecordingSession, SessionErrorKind, SessionEvent, SessionStatus};
use crate::capture::{CaptureError, CaptureOptions, CapturePipeline, CaptureProviders, TrackInfo};
use crate::config::RecorderConfig;
use crate::media::{MediaBlob, PreviewHandle};
use crate::storage::KeyValueStore;
use crate::utils::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Key-value entry holding the options of the last successful start
pub const LAST_OPTIONS_KEY: &str = "recorder.lastOptions";

/// Result of [`SessionController::stop`]
#[derive(Debug, Clone)]
pub enum StopOutcome {
    Stopped(MediaBlob),
    /// The session was still starting; acquisition was abandoned
    Cancelled,
}

/// Metadata collaborator that persists finished recordings
#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn persist(&self, record: RecordingRecord, blob: MediaBlob) -> AppResult<()>;
}

#[derive(Default)]
struct ControllerState {
    status: SessionStatus,
    session: Option<RecordingSession>,
    /// Lifecycle call currently suspended, if any
    in_flight: Option<&'static str>,
    pending_start: Option<CancellationToken>,
    recorder: Option<MediaRecorder>,
    preview: Option<PreviewHandle>,
    /// Bumped on every start so stale tasks can tell they lost the session
    generation: u64,
}

impl ControllerState {
    /// A session whose device went away rejects further lifecycle calls with
    /// the loss itself, until it is discarded.
    fn device_lost(&self) -> Option<AppError> {
        if self.status != SessionStatus::Error(SessionErrorKind::DeviceLost) {
            return None;
        }
        let reason = self
            .session
            .as_ref()
            .and_then(|s| s.last_error.clone())
            .unwrap_or_else(|| "device disconnected".to_string());
        Some(AppError::DeviceLost(reason))
    }
}

struct Inner {
    pipeline: CapturePipeline,
    config: RecorderConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn transition(&self, state: &mut ControllerState, next: SessionStatus) {
        if !state.status.can_transition_to(&next) {
            tracing::warn!("Unexpected session transition {} -> {}", state.status, next);
        }
        tracing::info!("Session status: {} -> {}", state.status, next);
        state.status = next;
        if let Some(session) = state.session.as_mut() {
            session.status = next;
        }
        let _ = self.events.send(SessionEvent::StatusChanged {
            session_id: state.session.as_ref().map(|s| s.id),
            status: next,
        });
    }

    fn fail(&self, state: &mut ControllerState, kind: SessionErrorKind, message: String) {
        tracing::error!("Session failed ({:?}): {}", kind, message);
        if let Some(session) = state.session.as_mut() {
            session.last_error = Some(message);
            session.result = None;
        }
        self.transition(state, SessionStatus::Error(kind));
    }
}

/// Orchestrates acquisition, recording, pause/resume and teardown
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(providers: CaptureProviders, config: RecorderConfig) -> Self {
        Self::build(providers, config, None)
    }

    /// Also persist session-restore hints into `store`
    pub fn with_store(
        providers: CaptureProviders,
        config: RecorderConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::build(providers, config, Some(store))
    }

    fn build(
        providers: CaptureProviders,
        config: RecorderConfig,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                pipeline: CapturePipeline::new(providers, config.clone()),
                config,
                store,
                state: Mutex::new(ControllerState::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<RecordingSession> {
        self.inner.state.lock().session.clone()
    }

    /// Recorded time so far, excluding pauses
    pub fn elapsed(&self) -> Duration {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    /// The finished blob, once stopped
    pub fn result(&self) -> Option<MediaBlob> {
        let state = self.inner.state.lock();
        state.session.as_ref().and_then(|s| s.result.clone())
    }

    /// Acquire devices and start recording.
    ///
    /// Returns [`AppError::Cancelled`] with the controller back in `Idle` if
    /// the user dismissed the capture prompt or `stop()` was called first.
    pub async fn start(&self, options: CaptureOptions) -> AppResult<()> {
        let (token, generation) = {
            let mut state = self.inner.state.lock();
            if let Some(action) = state.in_flight {
                return Err(AppError::Busy(action));
            }
            if state.status != SessionStatus::Idle {
                return Err(AppError::InvalidState {
                    action: "start",
                    state: state.status.to_string(),
                });
            }

            state.generation += 1;
            state.session = Some(RecordingSession::new(options.clone()));
            self.inner.transition(&mut state, SessionStatus::CheckingPermissions);

            if let Err(e) = self.inner.pipeline.check_capabilities(&options) {
                self.inner
                    .fail(&mut state, SessionErrorKind::PermissionDenied, e.to_string());
                return Err(e.into());
            }

            let token = CancellationToken::new();
            state.in_flight = Some("start");
            state.pending_start = Some(token.clone());
            self.inner.transition(&mut state, SessionStatus::Starting);
            (token, state.generation)
        };

        // Declared before any lock guard below so it drops after them.
        let mut guard = StartGuard {
            inner: self.inner.as_ref(),
            generation,
            armed: true,
        };

        let acquired = tokio::select! {
            biased;
            _ = token.cancelled() => Err(CaptureError::Cancelled),
            result = self.inner.pipeline.acquire(&options) => result,
        };

        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                let mut state = self.inner.state.lock();
                if state.generation == generation && state.status == SessionStatus::Starting {
                    state.in_flight = None;
                    state.pending_start = None;
                    match &e {
                        CaptureError::Cancelled => {
                            tracing::info!("Capture prompt dismissed; back to idle");
                            state.session = None;
                            self.inner.transition(&mut state, SessionStatus::Idle);
                        }
                        CaptureError::PermissionDenied(_) | CaptureError::Unavailable(_) => {
                            self.inner
                                .fail(&mut state, SessionErrorKind::PermissionDenied, e.to_string());
                        }
                        CaptureError::Device(_) => {
                            self.inner
                                .fail(&mut state, SessionErrorKind::CaptureFailed, e.to_string());
                        }
                    }
                }
                return Err(e.into());
            }
        };

        let lost_rx = {
            let mut state = self.inner.state.lock();
            if token.is_cancelled() || state.generation != generation {
                drop(state);
                tracing::info!("Start was cancelled after acquisition; releasing devices");
                self.inner.pipeline.release(stream);
                return Err(AppError::Cancelled);
            }

            let warnings = stream.warnings().to_vec();
            let (lost_tx, lost_rx) = oneshot::channel();
            let recorder =
                MediaRecorder::start(stream, &self.inner.config, self.inner.events.clone(), lost_tx);
            state.recorder = Some(recorder);
            state.in_flight = None;
            state.pending_start = None;
            if let Some(session) = state.session.as_mut() {
                session.started_at = Some(Utc::now());
                session.clock.start();
                session.warnings = warnings.clone();
            }
            self.inner.transition(&mut state, SessionStatus::Recording);
            for warning in warnings {
                let _ = self.inner.events.send(SessionEvent::Warning { warning });
            }
            lost_rx
        };
        guard.armed = false;

        tokio::spawn(watch_device_loss(self.inner.clone(), generation, lost_rx));
        self.remember_options(&options);
        Ok(())
    }

    pub fn pause(&self) -> AppResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.device_lost() {
            return Err(err);
        }
        if let Some(action) = state.in_flight {
            return Err(AppError::Busy(action));
        }
        match state.status {
            SessionStatus::Paused => Ok(()),
            SessionStatus::Recording => {
                if let Some(recorder) = &state.recorder {
                    recorder.pause();
                }
                if let Some(session) = state.session.as_mut() {
                    session.clock.pause();
                }
                self.inner.transition(&mut state, SessionStatus::Paused);
                Ok(())
            }
            other => Err(AppError::InvalidState {
                action: "pause",
                state: other.to_string(),
            }),
        }
    }

    pub fn resume(&self) -> AppResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.device_lost() {
            return Err(err);
        }
        if let Some(action) = state.in_flight {
            return Err(AppError::Busy(action));
        }
        match state.status {
            SessionStatus::Recording => Ok(()),
            SessionStatus::Paused => {
                if let Some(recorder) = &state.recorder {
                    recorder.resume();
                }
                if let Some(session) = state.session.as_mut() {
                    session.clock.resume();
                }
                self.inner.transition(&mut state, SessionStatus::Recording);
                Ok(())
            }
            other => Err(AppError::InvalidState {
                action: "resume",
                state: other.to_string(),
            }),
        }
    }

    /// Flush the recorder, release every device and hand back the blob.
    ///
    /// Calling it again once stopped returns the same blob. Calling it while
    /// starting abandons the acquisition.
    pub async fn stop(&self) -> AppResult<StopOutcome> {
        let (recorder, generation) = {
            let mut state = self.inner.state.lock();
            if let Some(err) = state.device_lost() {
                return Err(err);
            }
            match state.status {
                SessionStatus::Stopped => {
                    let blob = state
                        .session
                        .as_ref()
                        .and_then(|s| s.result.clone())
                        .unwrap_or_else(|| MediaBlob::from_bytes(Bytes::new()));
                    return Ok(StopOutcome::Stopped(blob));
                }
                SessionStatus::Starting => {
                    tracing::info!("Stop requested while starting; cancelling acquisition");
                    if let Some(token) = state.pending_start.take() {
                        token.cancel();
                    }
                    state.session = None;
                    self.inner.transition(&mut state, SessionStatus::Idle);
                    return Ok(StopOutcome::Cancelled);
                }
                _ => {}
            }
            if let Some(action) = state.in_flight {
                return Err(AppError::Busy(action));
            }
            if !state.status.is_active() {
                return Err(AppError::InvalidState {
                    action: "stop",
                    state: state.status.to_string(),
                });
            }

            state.in_flight = Some("stop");
            if let Some(session) = state.session.as_mut() {
                session.clock.stop();
                session.stopped_at = Some(Utc::now());
            }
            self.inner.transition(&mut state, SessionStatus::Stopping);
            (state.recorder.take(), state.generation)
        };

        // Detached so a dropped caller cannot strand the session in `Stopping`.
        let finishing = tokio::spawn(finish_stop(self.inner.clone(), recorder, generation));
        match finishing.await {
            Ok(blob) => Ok(StopOutcome::Stopped(blob)),
            Err(e) => Err(AppError::Capture(format!("stop task failed: {}", e))),
        }
    }

    /// Drop the finished or failed session and return to `Idle`
    pub fn discard(&self) -> AppResult<()> {
        let preview = {
            let mut state = self.inner.state.lock();
            if let Some(action) = state.in_flight {
                return Err(AppError::Busy(action));
            }
            match state.status {
                SessionStatus::Idle => return Ok(()),
                SessionStatus::Stopped | SessionStatus::Error(_) => {}
                other => {
                    return Err(AppError::InvalidState {
                        action: "discard",
                        state: other.to_string(),
                    })
                }
            }
            state.session = None;
            self.inner.transition(&mut state, SessionStatus::Idle);
            state.preview.take()
        };

        if let Some(preview) = preview {
            if let Err(e) = preview.release() {
                tracing::warn!("Failed to remove preview file: {}", e);
            }
        }
        Ok(())
    }

    /// Discard and start again with the same options
    pub async fn restart(&self) -> AppResult<()> {
        let options = {
            let state = self.inner.state.lock();
            match (&state.status, &state.session) {
                (SessionStatus::Stopped | SessionStatus::Error(_), Some(session)) => {
                    session.options.clone()
                }
                (status, _) => {
                    return Err(AppError::InvalidState {
                        action: "restart",
                        state: status.to_string(),
                    })
                }
            }
        };
        self.discard()?;
        self.start(options).await
    }

    /// Playback URL for the stopped recording. The backing file lives until discard.
    pub fn preview(&self) -> AppResult<String> {
        let mut state = self.inner.state.lock();
        if let Some(preview) = &state.preview {
            return Ok(preview.url());
        }
        let blob = match (&state.status, &state.session) {
            (SessionStatus::Stopped, Some(session)) => session.result.clone(),
            _ => None,
        };
        let Some(blob) = blob else {
            return Err(AppError::InvalidState {
                action: "preview",
                state: state.status.to_string(),
            });
        };
        let preview = blob.preview()?;
        let url = preview.url();
        state.preview = Some(preview);
        Ok(url)
    }

    /// Hand the finished recording to the metadata collaborator
    pub async fn save(&self, store: &dyn RecordingStore) -> AppResult<()> {
        let (record, blob) = {
            let state = self.inner.state.lock();
            match (&state.status, &state.session) {
                (SessionStatus::Stopped, Some(session)) => match &session.result {
                    Some(blob) => (session.record(), blob.clone()),
                    None => return Err(AppError::Storage("stopped session has no result".to_string())),
                },
                (status, _) => {
                    return Err(AppError::InvalidState {
                        action: "save",
                        state: status.to_string(),
                    })
                }
            }
        };
        tracing::info!("Saving recording {} ({} bytes)", record.id, record.size_bytes);
        store.persist(record, blob).await
    }

    /// Options of the last session that reached `Recording`, if remembered
    pub fn last_options(&self) -> AppResult<Option<CaptureOptions>> {
        let Some(store) = &self.inner.store else {
            return Ok(None);
        };
        match store.get(LAST_OPTIONS_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn remember_options(&self, options: &CaptureOptions) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let result = serde_json::to_string(options)
            .map_err(AppError::from)
            .and_then(|raw| store.set(LAST_OPTIONS_KEY, &raw));
        if let Err(e) = result {
            tracing::warn!("Failed to remember capture options: {}", e);
        }
    }
}

/// Resets a start that never reached `Recording`, including when its
/// future is dropped mid-acquisition.
struct StartGuard<'a> {
    inner: &'a Inner,
    generation: u64,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.generation != self.generation || state.in_flight != Some("start") {
            return;
        }
        state.in_flight = None;
        state.pending_start = None;
        if state.status == SessionStatus::Starting {
            tracing::debug!("Start abandoned; back to idle");
            state.session = None;
            self.inner.transition(&mut state, SessionStatus::Idle);
        }
    }
}

async fn finish_stop(inner: Arc<Inner>, recorder: Option<MediaRecorder>, generation: u64) -> MediaBlob {
    let output = match recorder {
        Some(recorder) => recorder.stop().await,
        None => Default::default(),
    };

    if let Some(stream) = output.stream {
        inner.pipeline.release(stream);
    }
    if let Some(info) = &output.lost_track {
        tracing::warn!("Track {} ended while stopping; keeping what was recorded", info.id);
    }

    let blob = MediaBlob::from_chunks(output.chunks);
    tracing::info!("Recording stopped: {} bytes", blob.len());

    let mut state = inner.state.lock();
    if state.generation == generation && state.status == SessionStatus::Stopping {
        if let Some(session) = state.session.as_mut() {
            session.result = Some(blob.clone());
            if let Some(failure) = output.failure {
                session.last_error = Some(failure);
            }
        }
        state.in_flight = None;
        inner.transition(&mut state, SessionStatus::Stopped);
    }
    blob
}

/// Fails the session if a device track ends while recording
async fn watch_device_loss(inner: Arc<Inner>, generation: u64, lost: oneshot::Receiver<TrackInfo>) {
    // A closed channel means the recorder ended normally.
    let Ok(info) = lost.await else {
        return;
    };

    let recorder = {
        let mut state = inner.state.lock();
        if state.generation != generation || !state.status.is_active() || state.in_flight.is_some() {
            return;
        }
        state.in_flight = Some("teardown");
        if let Some(session) = state.session.as_mut() {
            session.clock.stop();
            session.stopped_at = Some(Utc::now());
        }
        inner.fail(
            &mut state,
            SessionErrorKind::DeviceLost,
            format!("{} ({:?}) disconnected", info.label, info.source),
        );
        state.recorder.take()
    };

    if let Some(recorder) = recorder {
        let output = recorder.stop().await;
        if let Some(stream) = output.stream {
            inner.pipeline.release(stream);
        }
        tracing::debug!("Discarded {} partial chunk(s) after device loss", output.chunks.len());
    }

    let mut state = inner.state.lock();
    if state.generation == generation {
        state.in_flight = None;
    }
}
