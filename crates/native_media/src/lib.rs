use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{CameraFacing, RecordingFile, RecordingMode, RecordingStatus};
use tokio::sync::broadcast;

mod file_backend;
pub use file_backend::FileCaptureBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeMediaEvent {
    CameraSwitched {
        from: CameraFacing,
        to: CameraFacing,
        at: DateTime<Utc>,
    },
}

/// Capability surface of the platform recording module.
///
/// Capture itself is opaque: callers only ask the backend to start and stop,
/// and read back whatever files it produced.
#[async_trait]
pub trait NativeMediaBackend: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn initialize(&self) -> anyhow::Result<()>;
    /// Verifies the recordings location is writable before capture begins.
    async fn probe_storage(&self) -> anyhow::Result<()>;
    /// Returns the mode the backend actually started, which may be narrower
    /// than the one requested.
    async fn start_capture(&self, mode: RecordingMode) -> anyhow::Result<RecordingMode>;
    async fn stop_capture(&self) -> anyhow::Result<()>;
    async fn recording_status(&self) -> anyhow::Result<RecordingStatus>;
    async fn recording_file_paths(&self) -> anyhow::Result<Vec<PathBuf>>;
    async fn list_recording_files(&self) -> anyhow::Result<Vec<RecordingFile>>;
    async fn export_recording(&self, name: &str, destination: &Path) -> anyhow::Result<PathBuf>;
    /// Removes all but the `keep_latest` newest recordings, returning how many were deleted.
    async fn cleanup_recordings(&self, keep_latest: usize) -> anyhow::Result<usize>;
    async fn camera_facing(&self) -> anyhow::Result<CameraFacing>;
    async fn set_camera_facing(&self, facing: CameraFacing) -> anyhow::Result<()>;
    async fn dispose(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<NativeMediaEvent>;
}

pub struct MissingNativeMediaBackend;

#[async_trait]
impl NativeMediaBackend for MissingNativeMediaBackend {
    fn is_supported(&self) -> bool {
        false
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn probe_storage(&self) -> anyhow::Result<()> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn start_capture(&self, _mode: RecordingMode) -> anyhow::Result<RecordingMode> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn stop_capture(&self) -> anyhow::Result<()> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn recording_status(&self) -> anyhow::Result<RecordingStatus> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn recording_file_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn list_recording_files(&self) -> anyhow::Result<Vec<RecordingFile>> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn export_recording(
        &self,
        name: &str,
        _destination: &Path,
    ) -> anyhow::Result<PathBuf> {
        Err(anyhow!(
            "native media backend is unavailable; cannot export {name}"
        ))
    }

    async fn cleanup_recordings(&self, _keep_latest: usize) -> anyhow::Result<usize> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn camera_facing(&self) -> anyhow::Result<CameraFacing> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn set_camera_facing(&self, _facing: CameraFacing) -> anyhow::Result<()> {
        Err(anyhow!("native media backend is unavailable"))
    }

    async fn dispose(&self) {}

    fn subscribe_events(&self) -> broadcast::Receiver<NativeMediaEvent> {
        // Sender is dropped immediately, so receivers observe a closed channel.
        broadcast::channel(1).1
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
