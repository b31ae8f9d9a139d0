use std::{
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use anyhow::Result;
use chrono::Utc;
use countdown::{Continuation, CountdownGate};
use native_media::{NativeMediaBackend, NativeMediaEvent};
use shared::{
    domain::{
        CameraFacing, RecordingFile, RecordingMode, RecordingSession, RecordingSessionId,
        RecordingStatus, SelfRecording,
    },
    error::MediaError,
    protocol::RecordingEvent,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("local recording is not supported on this platform")]
    Unsupported,
    #[error("native {operation} failed: {source}")]
    Native {
        operation: &'static str,
        source: anyhow::Error,
    },
}

impl RecordingError {
    fn native(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Native { operation, source }
    }
}

/// Outcome of asking for a local recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingRequest {
    CountdownStarted,
    AlreadyRecording,
    Unsupported,
}

struct RecorderState {
    recording: bool,
    self_recording: SelfRecording,
    session: Option<RecordingSession>,
    /// Request whose continuation may still start capture. Stop and reset
    /// clear it, which also covers the window after the final tick.
    pending_request: Option<u64>,
    next_request: u64,
}

impl RecorderState {
    fn owns_request(&self, request: u64) -> bool {
        self.pending_request == Some(request)
    }
}

/// Forwards recording intents to the native backend, gating capture start
/// behind the countdown.
pub struct LocalRecordingManager {
    backend: Arc<dyn NativeMediaBackend>,
    countdown: Arc<dyn CountdownGate>,
    preferred_mode: RecordingMode,
    inner: Mutex<RecorderState>,
    camera_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<RecordingEvent>,
}

impl LocalRecordingManager {
    pub fn new(
        backend: Arc<dyn NativeMediaBackend>,
        countdown: Arc<dyn CountdownGate>,
        preferred_mode: RecordingMode,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            countdown,
            preferred_mode,
            inner: Mutex::new(RecorderState {
                recording: false,
                self_recording: SelfRecording::default(),
                session: None,
                pending_request: None,
                next_request: 0,
            }),
            camera_task: Mutex::new(None),
            events,
        })
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    pub async fn is_recording_locally(&self) -> bool {
        self.inner.lock().await.recording
    }

    pub async fn self_recording(&self) -> SelfRecording {
        self.inner.lock().await.self_recording
    }

    pub async fn session(&self) -> Option<RecordingSession> {
        self.inner.lock().await.session.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    /// Requests a recording. Native capture begins only once the countdown
    /// completes; stopping before then means capture never starts.
    pub async fn start_local_recording(self: &Arc<Self>, only_self: bool) -> RecordingRequest {
        if !self.backend.is_supported() {
            info!("local recording: unsupported on this platform");
            return RecordingRequest::Unsupported;
        }
        let request = {
            let mut guard = self.inner.lock().await;
            if guard.recording {
                debug!("local recording: already recording");
                return RecordingRequest::AlreadyRecording;
            }
            guard.next_request += 1;
            guard.pending_request = Some(guard.next_request);
            guard.next_request
        };

        let manager: Weak<Self> = Arc::downgrade(self);
        let continuation = Continuation::new(move || {
            let manager = manager.clone();
            async move {
                match manager.upgrade() {
                    Some(manager) => manager.begin_capture(request, only_self).await,
                    None => Ok(()),
                }
            }
        });

        self.countdown.request_countdown(continuation).await;
        info!(only_self, "local recording: countdown requested");
        let _ = self
            .events
            .send(RecordingEvent::CountdownRequested { only_self });
        RecordingRequest::CountdownStarted
    }

    async fn begin_capture(&self, request: u64, only_self: bool) -> Result<()> {
        {
            let guard = self.inner.lock().await;
            if guard.recording || !guard.owns_request(request) {
                debug!(request, "local recording: request withdrawn before capture");
                return Ok(());
            }
        }

        match self.try_begin_capture(request, only_self).await {
            Ok(None) => {
                info!(request, "local recording: stopped while capture was starting");
                if let Err(err) = self.backend.stop_capture().await {
                    warn!("local recording: native stop failed: {err:#}");
                }
                self.backend.dispose().await;
                self.stop_camera_task().await;
            }
            Ok(Some(session)) => {
                info!(
                    session_id = %session.session_id,
                    mode = ?session.mode,
                    "local recording: capture started"
                );
                let _ = self.events.send(RecordingEvent::RecordingStarted {
                    session_id: session.session_id,
                    mode: session.mode,
                    started_at: session.started_at,
                });
            }
            Err(err) => {
                warn!("local recording: start failed: {err:#}");
                let owned = {
                    let mut guard = self.inner.lock().await;
                    let owned = guard.owns_request(request);
                    if owned {
                        guard.pending_request = None;
                    }
                    owned
                };
                if owned {
                    self.stop_camera_task().await;
                }
                let _ = self.events.send(RecordingEvent::RecordingFailed {
                    error: MediaError::from_message(err.to_string()),
                });
            }
        }
        Ok(())
    }

    /// Returns `Ok(None)` when the request was withdrawn while the backend
    /// was starting; the caller then tears the capture back down.
    async fn try_begin_capture(
        &self,
        request: u64,
        only_self: bool,
    ) -> std::result::Result<Option<RecordingSession>, RecordingError> {
        self.backend
            .initialize()
            .await
            .map_err(RecordingError::native("initialize"))?;
        self.start_camera_task().await;
        self.backend
            .probe_storage()
            .await
            .map_err(RecordingError::native("storage probe"))?;
        let mode = self
            .backend
            .start_capture(self.preferred_mode)
            .await
            .map_err(RecordingError::native("start capture"))?;

        let session = RecordingSession {
            session_id: RecordingSessionId::new(),
            started_at: Utc::now(),
            mode,
            only_self,
        };
        {
            let mut guard = self.inner.lock().await;
            if !guard.owns_request(request) {
                return Ok(None);
            }
            guard.pending_request = None;
            guard.self_recording.with_video = mode.has_video();
            guard.recording = true;
            guard.self_recording.on = true;
            guard.session = Some(session.clone());
        }

        match self.backend.recording_status().await {
            Ok(status) => debug!(?status, "local recording: native status"),
            Err(err) => debug!("local recording: status unavailable: {err:#}"),
        }
        Ok(Some(session))
    }

    /// Cancels any in-flight countdown and withdraws a pending request, then
    /// tears down native capture if it is running. Safe to call when nothing
    /// is active.
    pub async fn stop_local_recording(&self) {
        let was_counting = self.countdown.countdown_snapshot().is_active;
        self.countdown.cancel_countdown().await;

        let session = {
            let mut guard = self.inner.lock().await;
            let withdrawn = guard.pending_request.take().is_some();
            if was_counting || withdrawn {
                info!("local recording: countdown cancelled before capture");
                let _ = self.events.send(RecordingEvent::CountdownCancelled);
            }
            if !guard.recording {
                return;
            }
            guard.recording = false;
            guard.self_recording = SelfRecording::default();
            guard.session.take()
        };

        if let Err(err) = self.backend.stop_capture().await {
            warn!("local recording: native stop failed: {err:#}");
        }
        match self.backend.recording_file_paths().await {
            Ok(paths) => info!(?paths, "local recording: files saved"),
            Err(err) => debug!("local recording: file paths unavailable: {err:#}"),
        }
        match self.backend.recording_status().await {
            Ok(status) => debug!(?status, "local recording: final native status"),
            Err(err) => debug!("local recording: status unavailable: {err:#}"),
        }
        let files = match self.backend.list_recording_files().await {
            Ok(files) => {
                info!(count = files.len(), "local recording: recordings directory listed");
                files
            }
            Err(err) => {
                debug!("local recording: listing unavailable: {err:#}");
                Vec::new()
            }
        };
        self.backend.dispose().await;
        self.stop_camera_task().await;

        info!(
            session_id = ?session.as_ref().map(|session| session.session_id),
            "local recording: stopped"
        );
        let _ = self.events.send(RecordingEvent::RecordingStopped {
            session_id: session.map(|session| session.session_id),
            files,
        });
    }

    /// Clears local flags and any pending countdown without touching the
    /// native backend.
    pub async fn reset_recording_state(&self) {
        info!("local recording: resetting state");
        self.countdown.cancel_countdown().await;
        self.clear_flags().await;
        self.stop_camera_task().await;
    }

    async fn clear_flags(&self) {
        let mut guard = self.inner.lock().await;
        guard.pending_request = None;
        guard.recording = false;
        guard.self_recording = SelfRecording::default();
        guard.session = None;
    }

    async fn start_camera_task(&self) {
        let mut native_events = self.backend.subscribe_events();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Ok(event) = native_events.recv().await {
                match event {
                    NativeMediaEvent::CameraSwitched { from, to, at } => {
                        info!(%from, %to, "local recording: camera switched during recording");
                        let _ = events.send(RecordingEvent::CameraSwitched { from, to, at });
                    }
                }
            }
        });

        if let Some(previous) = self.camera_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn stop_camera_task(&self) {
        if let Some(task) = self.camera_task.lock().await.take() {
            task.abort();
        }
    }

    /// Current native camera, or `None` when the backend cannot say.
    pub async fn current_camera_facing(&self) -> Option<CameraFacing> {
        match self.backend.camera_facing().await {
            Ok(facing) => {
                debug!(%facing, "local recording: current camera facing");
                Some(facing)
            }
            Err(err) => {
                warn!("local recording: failed to get camera facing: {err:#}");
                None
            }
        }
    }

    pub async fn sync_camera_state_with_native(&self, facing_mode: &str) {
        let Some(facing) = CameraFacing::from_conference_mode(facing_mode) else {
            warn!(facing_mode, "local recording: unknown facing mode");
            return;
        };
        match self.backend.set_camera_facing(facing).await {
            Ok(()) => debug!(%facing, "local recording: camera state synced"),
            Err(err) => warn!("local recording: failed to sync camera state: {err:#}"),
        }
    }

    pub async fn recording_status(&self) -> std::result::Result<RecordingStatus, RecordingError> {
        self.ensure_supported()?;
        self.backend
            .recording_status()
            .await
            .map_err(RecordingError::native("status"))
    }

    pub async fn list_recordings(&self) -> std::result::Result<Vec<RecordingFile>, RecordingError> {
        self.ensure_supported()?;
        self.backend
            .list_recording_files()
            .await
            .map_err(RecordingError::native("list recordings"))
    }

    pub async fn export_recording(
        &self,
        name: &str,
        destination: &Path,
    ) -> std::result::Result<PathBuf, RecordingError> {
        self.ensure_supported()?;
        self.backend
            .export_recording(name, destination)
            .await
            .map_err(RecordingError::native("export"))
    }

    pub async fn cleanup_recordings(
        &self,
        keep_latest: usize,
    ) -> std::result::Result<usize, RecordingError> {
        self.ensure_supported()?;
        self.backend
            .cleanup_recordings(keep_latest)
            .await
            .map_err(RecordingError::native("cleanup"))
    }

    fn ensure_supported(&self) -> std::result::Result<(), RecordingError> {
        if self.backend.is_supported() {
            Ok(())
        } else {
            Err(RecordingError::Unsupported)
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
