use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use countdown::{CountdownController, CountdownSettings, CountdownSnapshot, CountdownStore};
use tokio::time;

use super::*;

struct MockBackend {
    supported: bool,
    fail_on: Option<&'static str>,
    mode: RecordingMode,
    start_delay: Option<Duration>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    facing: Mutex<CameraFacing>,
    events_tx: broadcast::Sender<NativeMediaEvent>,
}

impl MockBackend {
    fn ok() -> Self {
        Self {
            supported: true,
            fail_on: None,
            mode: RecordingMode::AudioVideo,
            start_delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            facing: Mutex::new(CameraFacing::Front),
            events_tx: broadcast::channel(16).0,
        }
    }

    fn failing(operation: &'static str) -> Self {
        Self {
            fail_on: Some(operation),
            ..Self::ok()
        }
    }

    fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::ok()
        }
    }

    async fn record(&self, operation: &'static str) -> Result<()> {
        self.calls.lock().await.push(operation);
        if self.fail_on == Some(operation) {
            return Err(anyhow!("{operation}: permission not granted"));
        }
        Ok(())
    }

    async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }

    fn sample_file() -> RecordingFile {
        RecordingFile {
            name: "recording_20240101_000000.mp4".to_string(),
            path: PathBuf::from("/tmp/recording_20240101_000000.mp4"),
            size_bytes: 42,
            modified_at: None,
        }
    }
}

#[async_trait]
impl NativeMediaBackend for MockBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn initialize(&self) -> Result<()> {
        self.record("initialize").await
    }

    async fn probe_storage(&self) -> Result<()> {
        self.record("probe_storage").await
    }

    async fn start_capture(&self, _mode: RecordingMode) -> Result<RecordingMode> {
        self.record("start_capture").await?;
        if let Some(delay) = self.start_delay {
            time::sleep(delay).await;
        }
        Ok(self.mode)
    }

    async fn stop_capture(&self) -> Result<()> {
        self.record("stop_capture").await
    }

    async fn recording_status(&self) -> Result<RecordingStatus> {
        self.record("recording_status").await?;
        Ok(RecordingStatus::idle())
    }

    async fn recording_file_paths(&self) -> Result<Vec<PathBuf>> {
        self.record("recording_file_paths").await?;
        Ok(vec![Self::sample_file().path])
    }

    async fn list_recording_files(&self) -> Result<Vec<RecordingFile>> {
        self.record("list_recording_files").await?;
        Ok(vec![Self::sample_file()])
    }

    async fn export_recording(&self, name: &str, destination: &Path) -> Result<PathBuf> {
        self.record("export_recording").await?;
        Ok(destination.join(name))
    }

    async fn cleanup_recordings(&self, _keep_latest: usize) -> Result<usize> {
        self.record("cleanup_recordings").await?;
        Ok(3)
    }

    async fn camera_facing(&self) -> Result<CameraFacing> {
        self.record("camera_facing").await?;
        Ok(*self.facing.lock().await)
    }

    async fn set_camera_facing(&self, facing: CameraFacing) -> Result<()> {
        self.record("set_camera_facing").await?;
        *self.facing.lock().await = facing;
        Ok(())
    }

    async fn dispose(&self) {
        self.calls.lock().await.push("dispose");
    }

    fn subscribe_events(&self) -> broadcast::Receiver<NativeMediaEvent> {
        self.events_tx.subscribe()
    }
}

struct Harness {
    backend: Arc<MockBackend>,
    store: Arc<CountdownStore>,
    manager: Arc<LocalRecordingManager>,
}

fn harness(backend: MockBackend) -> Harness {
    let backend = Arc::new(backend);
    let store = CountdownStore::new();
    let controller = CountdownController::new(Arc::clone(&store), CountdownSettings::default())
        .expect("controller");
    let manager = LocalRecordingManager::new(
        backend.clone(),
        Arc::new(controller),
        RecordingMode::AudioVideo,
    );
    Harness {
        backend,
        store,
        manager,
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

const CAPTURE_CALLS: [&str; 4] = [
    "initialize",
    "probe_storage",
    "start_capture",
    "recording_status",
];

#[tokio::test(start_paused = true)]
async fn capture_starts_only_after_countdown_completes() {
    let h = harness(MockBackend::ok());
    let mut events = h.manager.subscribe_events();

    let request = h.manager.start_local_recording(true).await;
    assert_eq!(request, RecordingRequest::CountdownStarted);
    assert_eq!(
        events.recv().await.expect("event"),
        RecordingEvent::CountdownRequested { only_self: true }
    );

    time::sleep(ms(9_900)).await;
    assert!(h.backend.calls().await.is_empty());
    assert!(!h.manager.is_recording_locally().await);
    assert_eq!(h.store.snapshot().count, 1);

    time::sleep(ms(300)).await;
    assert_eq!(h.backend.calls().await, CAPTURE_CALLS.to_vec());
    assert!(h.manager.is_recording_locally().await);
    assert_eq!(
        h.manager.self_recording().await,
        SelfRecording {
            on: true,
            with_video: true
        }
    );
    let session = h.manager.session().await.expect("session");
    assert!(session.only_self);
    assert!(matches!(
        events.recv().await.expect("event"),
        RecordingEvent::RecordingStarted {
            mode: RecordingMode::AudioVideo,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn audio_only_capture_leaves_video_flag_off() {
    let backend = MockBackend {
        mode: RecordingMode::AudioOnly,
        ..MockBackend::ok()
    };
    let h = harness(backend);

    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;
    assert_eq!(
        h.manager.self_recording().await,
        SelfRecording {
            on: true,
            with_video: false
        }
    );
}

#[tokio::test(start_paused = true)]
async fn stop_during_countdown_prevents_capture() {
    let h = harness(MockBackend::ok());
    let mut events = h.manager.subscribe_events();

    h.manager.start_local_recording(false).await;
    time::sleep(ms(3_000)).await;
    h.manager.stop_local_recording().await;

    assert_eq!(h.store.snapshot(), CountdownSnapshot::default());
    time::sleep(ms(20_000)).await;
    assert!(h.backend.calls().await.is_empty());
    assert!(!h.manager.is_recording_locally().await);

    let _ = events.recv().await.expect("requested");
    assert_eq!(
        events.recv().await.expect("cancelled"),
        RecordingEvent::CountdownCancelled
    );
}

#[tokio::test(start_paused = true)]
async fn stop_during_grace_delay_prevents_capture() {
    let h = harness(MockBackend::ok());
    let mut events = h.manager.subscribe_events();

    h.manager.start_local_recording(false).await;
    // Final tick at 10s; the continuation is still waiting out the grace delay.
    time::sleep(ms(10_020)).await;
    assert!(!h.store.snapshot().is_active);
    h.manager.stop_local_recording().await;

    time::sleep(ms(1_000)).await;
    assert!(h.backend.calls().await.is_empty());
    assert!(!h.manager.is_recording_locally().await);
    assert!(h.manager.session().await.is_none());

    let _ = events.recv().await.expect("requested");
    assert_eq!(
        events.recv().await.expect("cancelled"),
        RecordingEvent::CountdownCancelled
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_while_native_start_is_in_flight_tears_capture_down() {
    let backend = MockBackend {
        start_delay: Some(ms(500)),
        ..MockBackend::ok()
    };
    let h = harness(backend);
    let mut events = h.manager.subscribe_events();

    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;
    assert_eq!(
        h.backend.calls().await,
        vec!["initialize", "probe_storage", "start_capture"]
    );
    h.manager.stop_local_recording().await;

    time::sleep(ms(1_000)).await;
    assert_eq!(
        h.backend.calls().await,
        vec![
            "initialize",
            "probe_storage",
            "start_capture",
            "stop_capture",
            "dispose"
        ]
    );
    assert!(!h.manager.is_recording_locally().await);
    assert_eq!(h.manager.self_recording().await, SelfRecording::default());

    let _ = events.recv().await.expect("requested");
    assert_eq!(
        events.recv().await.expect("cancelled"),
        RecordingEvent::CountdownCancelled
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn new_request_after_stop_still_records() {
    let h = harness(MockBackend::ok());

    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_020)).await;
    h.manager.stop_local_recording().await;
    h.manager.start_local_recording(true).await;

    time::sleep(ms(10_200)).await;
    assert_eq!(h.backend.calls().await, CAPTURE_CALLS.to_vec());
    assert!(h.manager.is_recording_locally().await);
    assert!(h.manager.session().await.expect("session").only_self);
}

#[tokio::test(start_paused = true)]
async fn stop_when_idle_is_a_no_op() {
    let h = harness(MockBackend::ok());
    let mut events = h.manager.subscribe_events();

    h.manager.stop_local_recording().await;

    assert!(h.backend.calls().await.is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_after_capture_tears_down_native_recording() {
    let h = harness(MockBackend::ok());
    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;
    let session_id = h.manager.session().await.expect("session").session_id;
    let mut events = h.manager.subscribe_events();

    h.manager.stop_local_recording().await;

    let calls = h.backend.calls().await;
    assert_eq!(
        &calls[CAPTURE_CALLS.len()..],
        &[
            "stop_capture",
            "recording_file_paths",
            "recording_status",
            "list_recording_files",
            "dispose"
        ]
    );
    assert!(!h.manager.is_recording_locally().await);
    assert_eq!(h.manager.self_recording().await, SelfRecording::default());
    assert_eq!(
        events.recv().await.expect("stopped"),
        RecordingEvent::RecordingStopped {
            session_id: Some(session_id),
            files: vec![MockBackend::sample_file()],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn native_start_failure_resets_flags() {
    let h = harness(MockBackend::failing("start_capture"));
    let mut events = h.manager.subscribe_events();

    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;

    assert!(!h.manager.is_recording_locally().await);
    assert_eq!(h.manager.self_recording().await, SelfRecording::default());
    assert!(!h.backend.calls().await.contains(&"recording_status"));

    let _ = events.recv().await.expect("requested");
    match events.recv().await.expect("failed") {
        RecordingEvent::RecordingFailed { error } => {
            assert_eq!(error.code, shared::error::MediaErrorCode::Permission);
            assert!(error.message.contains("start capture"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn native_initialize_failure_never_starts_capture() {
    let h = harness(MockBackend::failing("initialize"));

    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;

    assert_eq!(h.backend.calls().await, vec!["initialize"]);
    assert!(!h.manager.is_recording_locally().await);
}

#[tokio::test(start_paused = true)]
async fn native_stop_failure_still_clears_flags() {
    let h = harness(MockBackend::failing("stop_capture"));
    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;
    assert!(h.manager.is_recording_locally().await);

    h.manager.stop_local_recording().await;

    assert!(!h.manager.is_recording_locally().await);
    assert!(h.backend.calls().await.contains(&"dispose"));
}

#[tokio::test(start_paused = true)]
async fn unsupported_backend_never_requests_countdown() {
    let h = harness(MockBackend::unsupported());

    let request = h.manager.start_local_recording(false).await;

    assert_eq!(request, RecordingRequest::Unsupported);
    assert!(!h.store.snapshot().is_active);
    assert!(matches!(
        h.manager.list_recordings().await,
        Err(RecordingError::Unsupported)
    ));
}

#[tokio::test(start_paused = true)]
async fn second_request_while_recording_is_ignored() {
    let h = harness(MockBackend::ok());
    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;

    let request = h.manager.start_local_recording(false).await;

    assert_eq!(request, RecordingRequest::AlreadyRecording);
    assert!(!h.store.snapshot().is_active);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_countdown() {
    let h = harness(MockBackend::ok());
    h.manager.start_local_recording(false).await;
    time::sleep(ms(4_000)).await;

    h.manager.reset_recording_state().await;
    time::sleep(ms(20_000)).await;

    assert!(h.backend.calls().await.is_empty());
    assert!(!h.store.snapshot().is_active);
}

#[tokio::test(start_paused = true)]
async fn camera_switches_are_forwarded_while_recording() {
    let h = harness(MockBackend::ok());
    h.manager.start_local_recording(false).await;
    time::sleep(ms(10_200)).await;
    let mut events = h.manager.subscribe_events();

    let at = Utc::now();
    h.backend
        .events_tx
        .send(NativeMediaEvent::CameraSwitched {
            from: CameraFacing::Front,
            to: CameraFacing::Back,
            at,
        })
        .expect("subscriber");

    assert_eq!(
        events.recv().await.expect("event"),
        RecordingEvent::CameraSwitched {
            from: CameraFacing::Front,
            to: CameraFacing::Back,
            at,
        }
    );
}

#[tokio::test]
async fn camera_sync_maps_conference_modes() {
    let h = harness(MockBackend::ok());

    h.manager.sync_camera_state_with_native("environment").await;
    assert_eq!(
        h.manager.current_camera_facing().await,
        Some(CameraFacing::Back)
    );

    h.manager.sync_camera_state_with_native("sideways").await;
    let calls = h.backend.calls().await;
    assert_eq!(
        calls.iter().filter(|call| **call == "set_camera_facing").count(),
        1
    );
}

#[tokio::test]
async fn camera_facing_failure_reports_unknown() {
    let h = harness(MockBackend::failing("camera_facing"));
    assert_eq!(h.manager.current_camera_facing().await, None);
}

#[tokio::test]
async fn file_operations_pass_through() {
    let h = harness(MockBackend::ok());

    let files = h.manager.list_recordings().await.expect("list");
    assert_eq!(files, vec![MockBackend::sample_file()]);
    let exported = h
        .manager
        .export_recording("a.mp4", Path::new("/exports"))
        .await
        .expect("export");
    assert_eq!(exported, PathBuf::from("/exports/a.mp4"));
    assert_eq!(h.manager.cleanup_recordings(1).await.expect("cleanup"), 3);
}

#[tokio::test]
async fn file_operation_failures_name_the_operation() {
    let h = harness(MockBackend::failing("export_recording"));
    let err = h
        .manager
        .export_recording("a.mp4", Path::new("/exports"))
        .await
        .expect_err("export fails");
    assert!(err.to_string().starts_with("native export failed"));
}
