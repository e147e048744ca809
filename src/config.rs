//! Transcriber and entry-default configuration.
//!
//! Configuration is an explicit value passed into the [`JobRegistry`]
//! rather than ambient environment lookups scattered through the code;
//! `from_env` constructors are the only place the environment is read.
//!
//! [`JobRegistry`]: crate::registry::JobRegistry

use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::entry::{minutes_from_times, parse_hhmm, Entry};

/// Configuration for launching the external transcription executable
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Path or bare name of the transcription executable; a bare name is
    /// looked up on the search path
    pub executable: Option<PathBuf>,
    /// Path to the Whisper model file; required to start any job
    pub model: Option<PathBuf>,
    /// Language code passed to the executable
    pub language: String,
    /// Optional worker thread count for the executable
    pub threads: Option<u32>,
    /// Optional sampling temperature for the executable
    pub temperature: Option<f32>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            executable: None,
            model: None,
            language: "french".to_string(),
            threads: None,
            temperature: None,
        }
    }
}

/// Configuration errors that prevent a job from being created
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("transcription executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("no model configured; set VIBE_MODEL_PATH to a model file")]
    ModelMissing,
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),
}

/// A fully resolved transcriber: both paths verified to exist
#[derive(Debug, Clone)]
pub struct ResolvedTranscriber {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub language: String,
    pub threads: Option<u32>,
    pub temperature: Option<f32>,
}

impl TranscriberConfig {
    /// Read configuration from `VIBE_CLI`, `VIBE_MODEL_PATH`,
    /// `VIBE_LANGUAGE`, `VIBE_THREADS` and `VIBE_TEMPERATURE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            executable: env_path("VIBE_CLI"),
            model: env_path("VIBE_MODEL_PATH"),
            language: non_empty(env::var("VIBE_LANGUAGE").ok()).unwrap_or(defaults.language),
            threads: env::var("VIBE_THREADS").ok().and_then(|v| v.parse().ok()),
            temperature: env::var("VIBE_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Verify that both the executable and the model resolve on this
    /// machine. Called before every job start; failure means no job is
    /// created and no retry is attempted.
    pub fn resolve(&self) -> Result<ResolvedTranscriber, ConfigError> {
        let candidate = self
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from("vibe"));
        let executable = if candidate.is_file() {
            candidate
        } else {
            which::which(&candidate)
                .map_err(|_| ConfigError::ExecutableNotFound(candidate.display().to_string()))?
        };

        let model = self.model.clone().ok_or(ConfigError::ModelMissing)?;
        if !model.is_file() {
            return Err(ConfigError::ModelNotFound(model));
        }

        Ok(ResolvedTranscriber {
            executable,
            model,
            language: self.language.clone(),
            threads: self.threads,
            temperature: self.temperature,
        })
    }
}

/// Defaults applied to freshly created entries
#[derive(Debug, Clone, Default)]
pub struct EntryDefaults {
    /// Title template; the entry date is appended
    pub title_template: Option<String>,
    /// Default start time "HH:MM"
    pub start: Option<String>,
    /// Default end time "HH:MM"
    pub end: Option<String>,
}

impl EntryDefaults {
    /// Read defaults from `SCRIBE_DEFAULT_TITLE` and `SCRIBE_DEFAULT_TIME`
    /// ("HH:MM-HH:MM", or a lone start time).
    pub fn from_env() -> Self {
        let (start, end) = parse_default_time_range(env::var("SCRIBE_DEFAULT_TIME").ok().as_deref());
        Self {
            title_template: non_empty(env::var("SCRIBE_DEFAULT_TITLE").ok()),
            start,
            end,
        }
    }

    /// Fill missing fields of a freshly created entry.
    pub fn apply(&self, entry: &mut Entry) {
        if entry.title.is_empty() {
            if let Some(template) = &self.title_template {
                let date = if entry.date.is_empty() {
                    chrono::Utc::now().format("%Y-%m-%d").to_string()
                } else {
                    entry.date.clone()
                };
                entry.title = format!("{} {}", template, date).trim().to_string();
            }
        }
        if entry.start.is_none() {
            entry.start = self.start.clone();
        }
        if entry.end.is_none() {
            entry.end = self.end.clone();
        }
        if entry.minutes == 0 {
            if let Some(computed) =
                minutes_from_times(entry.start.as_deref(), entry.end.as_deref())
            {
                entry.minutes = computed;
            }
        }
    }
}

/// Parse a "HH:MM-HH:MM" range; either side may be missing or malformed,
/// in which case that side is dropped.
pub fn parse_default_time_range(raw: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(candidate) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return (None, None);
    };
    let (start_text, end_text) = match candidate.split_once('-') {
        Some((s, e)) => (s.trim(), e.trim()),
        None => (candidate, ""),
    };
    let start = parse_hhmm(start_text).map(|_| start_text.to_string());
    let end = parse_hhmm(end_text).map(|_| end_text.to_string());
    (start, end)
}

fn env_path(name: &str) -> Option<PathBuf> {
    non_empty(env::var(name).ok()).map(|v| expand_tilde(&v))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Expand a leading `~/` against `$HOME`; everything else passes through.
fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TranscriberConfig::default();
        assert!(config.executable.is_none());
        assert!(config.model.is_none());
        assert_eq!(config.language, "french");
    }

    #[test]
    fn test_resolve_requires_model() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("vibe");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();

        let config = TranscriberConfig {
            executable: Some(exe),
            model: None,
            ..TranscriberConfig::default()
        };
        assert!(matches!(config.resolve(), Err(ConfigError::ModelMissing)));
    }

    #[test]
    fn test_resolve_rejects_missing_model_file() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("vibe");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();

        let config = TranscriberConfig {
            executable: Some(exe),
            model: Some(dir.path().join("missing.bin")),
            ..TranscriberConfig::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_accepts_existing_files() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("vibe");
        let model = dir.path().join("model.bin");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::write(&model, b"weights").unwrap();

        let config = TranscriberConfig {
            executable: Some(exe.clone()),
            model: Some(model.clone()),
            language: "english".to_string(),
            threads: Some(4),
            temperature: Some(0.2),
        };
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.executable, exe);
        assert_eq!(resolved.model, model);
        assert_eq!(resolved.language, "english");
        assert_eq!(resolved.threads, Some(4));
    }

    #[test]
    fn test_resolve_unresolvable_executable() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.bin");
        std::fs::write(&model, b"weights").unwrap();

        let config = TranscriberConfig {
            executable: Some(PathBuf::from("definitely-not-a-real-binary-name")),
            model: Some(model),
            ..TranscriberConfig::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::ExecutableNotFound(_))
        ));
    }

    #[test]
    fn test_parse_default_time_range() {
        assert_eq!(
            parse_default_time_range(Some("09:00-10:30")),
            (Some("09:00".to_string()), Some("10:30".to_string()))
        );
        assert_eq!(
            parse_default_time_range(Some("09:00")),
            (Some("09:00".to_string()), None)
        );
        assert_eq!(
            parse_default_time_range(Some("garbage-10:00")),
            (None, Some("10:00".to_string()))
        );
        assert_eq!(parse_default_time_range(Some("  ")), (None, None));
        assert_eq!(parse_default_time_range(None), (None, None));
    }

    #[test]
    fn test_entry_defaults_apply() {
        let defaults = EntryDefaults {
            title_template: Some("Leçon".to_string()),
            start: Some("09:00".to_string()),
            end: Some("10:00".to_string()),
        };
        let mut entry = Entry::new();
        entry.date = "2026-08-28".to_string();
        defaults.apply(&mut entry);
        assert_eq!(entry.title, "Leçon 2026-08-28");
        assert_eq!(entry.start.as_deref(), Some("09:00"));
        assert_eq!(entry.minutes, 60);
    }

    #[test]
    fn test_entry_defaults_do_not_override() {
        let defaults = EntryDefaults {
            title_template: Some("Leçon".to_string()),
            start: Some("09:00".to_string()),
            end: Some("10:00".to_string()),
        };
        let mut entry = Entry::new();
        entry.title = "Déjà titré".to_string();
        entry.start = Some("14:00".to_string());
        entry.end = Some("14:45".to_string());
        defaults.apply(&mut entry);
        assert_eq!(entry.title, "Déjà titré");
        assert_eq!(entry.minutes, 45);
    }
}
