use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorCode {
    Unsupported,
    Permission,
    Io,
    Validation,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaError {
    pub code: MediaErrorCode,
    pub message: String,
}

impl MediaError {
    pub fn new(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: classify(&message),
            message,
        }
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct MediaException {
    pub code: MediaErrorCode,
    pub message: String,
}

impl MediaException {
    pub fn new(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<MediaException> for MediaError {
    fn from(value: MediaException) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}

/// Best-effort classification of a native failure message.
pub fn classify(message: &str) -> MediaErrorCode {
    let lower = message.to_ascii_lowercase();
    if lower.contains("not supported")
        || lower.contains("unsupported")
        || lower.contains("unavailable")
    {
        MediaErrorCode::Unsupported
    } else if lower.contains("permission") || lower.contains("not granted") {
        MediaErrorCode::Permission
    } else if lower.contains("file") || lower.contains("directory") || lower.contains("i/o") {
        MediaErrorCode::Io
    } else if lower.contains("invalid") || lower.contains("unknown") {
        MediaErrorCode::Validation
    } else {
        MediaErrorCode::Internal
    }
}
