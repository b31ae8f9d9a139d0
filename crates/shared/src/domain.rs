use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MediaErrorCode, MediaException};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingSessionId(pub Uuid);

impl RecordingSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordingSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordingSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    /// Maps a conference-side facing mode (`user` / `environment`) onto the
    /// camera the native layer understands.
    pub fn from_conference_mode(mode: &str) -> Option<Self> {
        match mode {
            "user" => Some(Self::Front),
            "environment" => Some(Self::Back),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Front => f.write_str("FRONT"),
            Self::Back => f.write_str("BACK"),
        }
    }
}

impl FromStr for CameraFacing {
    type Err = MediaException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            other => Err(MediaException::new(
                MediaErrorCode::Validation,
                format!("unknown camera facing '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    AudioOnly,
    AudioVideo,
}

impl RecordingMode {
    pub fn has_video(self) -> bool {
        matches!(self, Self::AudioVideo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RecordingMode>,
    pub files: Vec<RecordingFile>,
}

impl RecordingStatus {
    pub fn idle() -> Self {
        Self {
            recording: false,
            mode: None,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelfRecording {
    pub on: bool,
    pub with_video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub session_id: RecordingSessionId,
    pub started_at: DateTime<Utc>,
    pub mode: RecordingMode,
    pub only_self: bool,
}
