use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{CameraFacing, RecordingFile, RecordingMode, RecordingSessionId},
    error::MediaError,
};

/// Events published by the local recording orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RecordingEvent {
    CountdownRequested {
        only_self: bool,
    },
    CountdownCancelled,
    RecordingStarted {
        session_id: RecordingSessionId,
        mode: RecordingMode,
        started_at: DateTime<Utc>,
    },
    RecordingStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<RecordingSessionId>,
        files: Vec<RecordingFile>,
    },
    RecordingFailed {
        error: MediaError,
    },
    CameraSwitched {
        from: CameraFacing,
        to: CameraFacing,
        at: DateTime<Utc>,
    },
}
