//! Entry data model: one user-authored log record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TRANSCRIPT_HEADER;

/// One journal entry (a "lesson" or "contact" in the original tools).
///
/// The serialized form is what lands in the entry's `entry.json`; the
/// journal body itself lives in `journal.txt` and is only held in memory
/// here, never duplicated into the JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Stable opaque identifier, also the name of the entry's directory
    #[serde(rename = "entry_id")]
    pub id: Uuid,
    /// Short human title; may be empty
    #[serde(default)]
    pub title: String,
    /// ISO day, e.g. "2026-08-28"; may be empty for drafts
    #[serde(default)]
    pub date: String,
    /// Start time "HH:MM"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// End time "HH:MM"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Duration in minutes
    #[serde(default)]
    pub minutes: u32,
    /// Free-text journal body; authoritative copy is `journal.txt`
    #[serde(skip)]
    pub journal: String,
    /// Workspace-relative path to the attached audio file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    /// Workspace-relative path to `journal.txt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<String>,
    /// Workspace-relative path to the transcript, once one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Create an empty entry with a fresh id and current timestamps
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            date: String::new(),
            start: None,
            end: None,
            minutes: 0,
            journal: String::new(),
            audio_path: None,
            journal_path: None,
            transcript_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the entry as modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Short display label: `date – title – N min`
    pub fn label(&self) -> String {
        let date = if self.date.is_empty() { "?" } else { &self.date };
        let title = if self.title.is_empty() {
            let id = self.id.to_string();
            id[..8].to_string()
        } else {
            self.title.clone()
        };
        if self.minutes > 0 {
            format!("{} – {} – {} min", date, title, self.minutes)
        } else {
            format!("{} – {}", date, title)
        }
    }

    /// Sort key used everywhere entries are listed: by date, then start time
    pub fn sort_key(&self) -> (String, String) {
        (self.date.clone(), self.start.clone().unwrap_or_default())
    }

    /// Merge a transcript into the journal under [`TRANSCRIPT_HEADER`].
    ///
    /// Idempotent: if the journal already contains a transcript block, the
    /// old block is truncated away and replaced with `text`, so applying
    /// two different transcripts leaves exactly one block (the latest).
    pub fn merge_transcript(&mut self, text: &str) {
        // Locate the marker without its leading blank lines so blocks at
        // the very start of an empty journal are found too.
        let marker = TRANSCRIPT_HEADER.trim_start();
        let base = match self.journal.find(marker) {
            Some(pos) => self.journal[..pos].trim_end().to_string(),
            None => self.journal.trim_end().to_string(),
        };
        if base.is_empty() {
            self.journal = format!("{}{}", marker, text);
        } else {
            self.journal = format!("{}{}{}", base, TRANSCRIPT_HEADER, text);
        }
        self.touch();
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a "HH:MM" string into minutes since midnight.
///
/// Accepts one- or two-digit hours; rejects out-of-range values.
pub fn parse_hhmm(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    let (h, m) = trimmed.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Duration in minutes between two "HH:MM" times, wrapping past midnight.
pub fn minutes_from_times(start: Option<&str>, end: Option<&str>) -> Option<u32> {
    let begin = parse_hhmm(start?)?;
    let mut finish = parse_hhmm(end?)?;
    if finish < begin {
        finish += 24 * 60;
    }
    Some(finish - begin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("9:05"), Some(545));
        assert_eq!(parse_hhmm(" 23:59 "), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("12:5"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn test_minutes_from_times() {
        assert_eq!(minutes_from_times(Some("09:00"), Some("10:30")), Some(90));
        // Sessions crossing midnight wrap instead of going negative.
        assert_eq!(minutes_from_times(Some("23:30"), Some("00:15")), Some(45));
        assert_eq!(minutes_from_times(Some("09:00"), None), None);
        assert_eq!(minutes_from_times(Some("bad"), Some("10:00")), None);
    }

    #[test]
    fn test_merge_transcript_appends_once() {
        let mut entry = Entry::new();
        entry.journal = "Notes from the session.".to_string();
        entry.merge_transcript("Bonjour le monde");
        assert_eq!(
            entry.journal,
            "Notes from the session.\n\n--- Transcription Vibe ---\nBonjour le monde"
        );
    }

    #[test]
    fn test_merge_transcript_is_idempotent() {
        let mut entry = Entry::new();
        entry.journal = "Base notes.".to_string();
        entry.merge_transcript("first transcript");
        entry.merge_transcript("second transcript");
        assert_eq!(
            entry.journal,
            "Base notes.\n\n--- Transcription Vibe ---\nsecond transcript"
        );
        assert_eq!(entry.journal.matches("--- Transcription Vibe ---").count(), 1);
    }

    #[test]
    fn test_merge_transcript_into_empty_journal() {
        let mut entry = Entry::new();
        entry.merge_transcript("seul le transcript");
        assert_eq!(
            entry.journal,
            "--- Transcription Vibe ---\nseul le transcript"
        );
    }

    #[test]
    fn test_label_formats() {
        let mut entry = Entry::new();
        entry.date = "2026-08-28".to_string();
        entry.title = "Cours de chant".to_string();
        entry.minutes = 45;
        assert_eq!(entry.label(), "2026-08-28 – Cours de chant – 45 min");

        let draft = Entry::new();
        assert!(draft.label().starts_with("? – "));
    }

    #[test]
    fn test_entry_json_skips_journal_body() {
        let mut entry = Entry::new();
        entry.journal = "secret body".to_string();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("secret body"));
        assert!(json.contains("entry_id"));
    }
}
