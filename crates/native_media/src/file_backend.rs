use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{CameraFacing, RecordingFile, RecordingMode, RecordingStatus},
    error::{MediaErrorCode, MediaException},
};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{broadcast, Mutex},
};
use tracing::{debug, info, warn};

use crate::{NativeMediaBackend, NativeMediaEvent};

const RECORDING_FILE_PREFIX: &str = "recording_";
const RECORDING_FILE_EXTENSION: &str = "mp4";
const STORAGE_PROBE_FILE: &str = ".storage_probe";

/// Backend that materializes each capture session as a file in a
/// recordings directory. The payload is a metadata envelope; real encoders
/// plug in behind the same trait.
pub struct FileCaptureBackend {
    recordings_dir: PathBuf,
    inner: Mutex<FileCaptureState>,
    events: broadcast::Sender<NativeMediaEvent>,
}

struct FileCaptureState {
    initialized: bool,
    facing: CameraFacing,
    active: Option<ActiveCapture>,
    last_capture: Option<PathBuf>,
}

struct ActiveCapture {
    path: PathBuf,
    mode: RecordingMode,
    file: fs::File,
}

impl FileCaptureBackend {
    pub fn new(recordings_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            recordings_dir: recordings_dir.into(),
            inner: Mutex::new(FileCaptureState {
                initialized: false,
                facing: CameraFacing::Front,
                active: None,
                last_capture: None,
            }),
            events,
        }
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    async fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.recordings_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create recordings directory '{}'",
                    self.recordings_dir.display()
                )
            })
    }

    async fn next_capture_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y%m%d_%H%M%S");
        let mut candidate = self.recordings_dir.join(format!(
            "{RECORDING_FILE_PREFIX}{stamp}.{RECORDING_FILE_EXTENSION}"
        ));
        let mut suffix = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self.recordings_dir.join(format!(
                "{RECORDING_FILE_PREFIX}{stamp}_{suffix}.{RECORDING_FILE_EXTENSION}"
            ));
            suffix += 1;
        }
        candidate
    }

    async fn finish_capture(active: ActiveCapture) -> anyhow::Result<PathBuf> {
        let ActiveCapture { path, mut file, .. } = active;
        let trailer = serde_json::json!({ "stopped_at": Utc::now() });
        file.write_all(format!("{trailer}\n").as_bytes())
            .await
            .with_context(|| format!("failed to finalize recording file '{}'", path.display()))?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(path)
    }
}

async fn describe_file(path: &Path) -> anyhow::Result<RecordingFile> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat recording file '{}'", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(RecordingFile {
        name,
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// Only files this backend produced count as recordings; anything else in
/// the directory belongs to the user.
fn is_recording_file_name(name: &str) -> bool {
    name.starts_with(RECORDING_FILE_PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == RECORDING_FILE_EXTENSION)
}

fn validate_recording_name(name: &str) -> Result<(), MediaException> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed == "."
        || trimmed == ".."
    {
        return Err(MediaException::new(
            MediaErrorCode::Validation,
            format!("invalid recording name '{name}'"),
        ));
    }
    Ok(())
}

#[async_trait]
impl NativeMediaBackend for FileCaptureBackend {
    fn is_supported(&self) -> bool {
        true
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let mut guard = self.inner.lock().await;
        guard.initialized = true;
        debug!(dir = %self.recordings_dir.display(), "file capture backend initialized");
        Ok(())
    }

    async fn probe_storage(&self) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let probe = self.recordings_dir.join(STORAGE_PROBE_FILE);
        let payload = format!("storage probe at {}\n", Utc::now().to_rfc3339());
        fs::write(&probe, payload.as_bytes())
            .await
            .with_context(|| format!("failed to write probe file '{}'", probe.display()))?;
        let written = fs::metadata(&probe).await?.len();
        fs::remove_file(&probe).await?;
        debug!(bytes = written, "recordings directory is writable");
        Ok(())
    }

    async fn start_capture(&self, mode: RecordingMode) -> anyhow::Result<RecordingMode> {
        let mut guard = self.inner.lock().await;
        if !guard.initialized {
            return Err(anyhow!(
                "file capture backend not initialized; call initialize first"
            ));
        }
        if let Some(active) = &guard.active {
            warn!(path = %active.path.display(), "capture already active");
            return Ok(active.mode);
        }

        self.ensure_dir().await?;
        let started_at = Utc::now();
        let path = self.next_capture_path(started_at).await;
        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("failed to create recording file '{}'", path.display()))?;
        let header = serde_json::json!({
            "started_at": started_at,
            "mode": mode,
            "facing": guard.facing,
        });
        file.write_all(format!("{header}\n").as_bytes()).await?;

        info!(path = %path.display(), ?mode, "file capture started");
        guard.active = Some(ActiveCapture { path, mode, file });
        Ok(mode)
    }

    async fn stop_capture(&self) -> anyhow::Result<()> {
        let active = {
            let mut guard = self.inner.lock().await;
            guard.active.take()
        };
        let Some(active) = active else {
            warn!("stop requested with no active capture");
            return Ok(());
        };

        let path = Self::finish_capture(active).await?;
        info!(path = %path.display(), "file capture stopped");
        self.inner.lock().await.last_capture = Some(path);
        Ok(())
    }

    async fn recording_status(&self) -> anyhow::Result<RecordingStatus> {
        let (path, mode) = {
            let guard = self.inner.lock().await;
            match &guard.active {
                Some(active) => (Some(active.path.clone()), Some(active.mode)),
                None => (guard.last_capture.clone(), None),
            }
        };

        let mut files = Vec::new();
        if let Some(path) = path {
            files.push(describe_file(&path).await?);
        }
        Ok(RecordingStatus {
            recording: mode.is_some(),
            mode,
            files,
        })
    }

    async fn recording_file_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let guard = self.inner.lock().await;
        let path = guard
            .active
            .as_ref()
            .map(|active| active.path.clone())
            .or_else(|| guard.last_capture.clone());
        Ok(path.into_iter().collect())
    }

    async fn list_recording_files(&self) -> anyhow::Result<Vec<RecordingFile>> {
        if !fs::try_exists(&self.recordings_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.recordings_dir).await.with_context(|| {
            format!(
                "failed to read recordings directory '{}'",
                self.recordings_dir.display()
            )
        })?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_recording_file_name)
            {
                continue;
            }
            files.push(describe_file(&path).await?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn export_recording(&self, name: &str, destination: &Path) -> anyhow::Result<PathBuf> {
        validate_recording_name(name)?;
        let source = self.recordings_dir.join(name);
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(MediaException::new(
                MediaErrorCode::Io,
                format!("recording file '{name}' not found"),
            )
            .into());
        }

        let target = if fs::metadata(destination)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            destination.join(name)
        } else {
            destination.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let copied = fs::copy(&source, &target).await.with_context(|| {
            format!(
                "failed to export '{}' to '{}'",
                source.display(),
                target.display()
            )
        })?;
        info!(target = %target.display(), bytes = copied, "recording exported");
        Ok(target)
    }

    async fn cleanup_recordings(&self, keep_latest: usize) -> anyhow::Result<usize> {
        let active_path = {
            let guard = self.inner.lock().await;
            guard.active.as_ref().map(|active| active.path.clone())
        };

        let mut files = self.list_recording_files().await?;
        files.retain(|file| Some(&file.path) != active_path.as_ref());
        // Names embed the capture timestamp, so newest sort last.
        files.sort_by(|a, b| b.name.cmp(&a.name));

        let mut removed = 0;
        for file in files.into_iter().skip(keep_latest) {
            match fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %file.path.display(), "failed to remove recording: {err}"),
            }
        }
        info!(removed, keep_latest, "recordings cleaned up");
        Ok(removed)
    }

    async fn camera_facing(&self) -> anyhow::Result<CameraFacing> {
        Ok(self.inner.lock().await.facing)
    }

    async fn set_camera_facing(&self, facing: CameraFacing) -> anyhow::Result<()> {
        let previous = {
            let mut guard = self.inner.lock().await;
            std::mem::replace(&mut guard.facing, facing)
        };
        if previous != facing {
            let _ = self.events.send(NativeMediaEvent::CameraSwitched {
                from: previous,
                to: facing,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn dispose(&self) {
        let active = {
            let mut guard = self.inner.lock().await;
            guard.initialized = false;
            guard.active.take()
        };
        if let Some(active) = active {
            match Self::finish_capture(active).await {
                Ok(path) => self.inner.lock().await.last_capture = Some(path),
                Err(err) => warn!("failed to finalize capture during dispose: {err:#}"),
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<NativeMediaEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/file_backend_tests.rs"]
mod tests;
