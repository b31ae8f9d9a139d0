use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use countdown::CountdownSettings;
use serde::Deserialize;
use shared::domain::RecordingMode;

const DEFAULT_CONFIG_FILE: &str = "recorder.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recordings_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub grace_delay_ms: u64,
    pub with_video: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("./recordings"),
            tick_interval_ms: 1_000,
            grace_delay_ms: 50,
            with_video: true,
        }
    }
}

impl Settings {
    pub fn countdown(&self) -> CountdownSettings {
        CountdownSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            grace_delay: Duration::from_millis(self.grace_delay_ms),
        }
    }

    pub fn recording_mode(&self) -> RecordingMode {
        if self.with_video {
            RecordingMode::AudioVideo
        } else {
            RecordingMode::AudioOnly
        }
    }
}

/// Defaults, then the config file, then environment variables.
///
/// An explicit `path` must exist; the implicit `recorder.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_settings_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Settings::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file '{}'", path.display()))
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RECORDINGS_DIR") {
        settings.recordings_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__RECORDINGS_DIR") {
        settings.recordings_dir = PathBuf::from(v);
    }

    if let Some(v) = lookup("APP__TICK_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.tick_interval_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__GRACE_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.grace_delay_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__WITH_VIDEO") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.with_video = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_countdown_design_values() {
        let settings = Settings::default();
        assert_eq!(settings.countdown(), CountdownSettings::default());
        assert_eq!(settings.recording_mode(), RecordingMode::AudioVideo);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recorder.toml");
        fs::write(
            &path,
            "recordings_dir = \"/data/rec\"\ngrace_delay_ms = 200\nwith_video = false\n",
        )
        .expect("write");

        let settings = read_settings_file(&path).expect("parse");
        assert_eq!(settings.recordings_dir, PathBuf::from("/data/rec"));
        assert_eq!(settings.grace_delay_ms, 200);
        assert_eq!(settings.tick_interval_ms, 1_000);
        assert_eq!(settings.recording_mode(), RecordingMode::AudioOnly);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_settings(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recorder.toml");
        fs::write(&path, "tick_interval_ms = \"soon\"").expect("write");
        assert!(read_settings_file(&path).is_err());
    }

    #[test]
    fn env_overrides_win_and_prefixed_keys_take_precedence() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("RECORDINGS_DIR", "/plain"),
                ("APP__RECORDINGS_DIR", "/prefixed"),
                ("APP__TICK_INTERVAL_MS", "250"),
                ("APP__GRACE_DELAY_MS", "not-a-number"),
                ("APP__WITH_VIDEO", "false"),
            ]),
        );
        assert_eq!(settings.recordings_dir, PathBuf::from("/prefixed"));
        assert_eq!(settings.tick_interval_ms, 250);
        assert_eq!(settings.grace_delay_ms, 50);
        assert!(!settings.with_video);
    }
}
