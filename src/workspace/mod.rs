//! Workspace persistence: the durable file tree of one project.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/
//!   metadata.json                  manifest: entry ids + entry.json paths
//!   entries/<uuid>/
//!     entry.json                   serialized [`Entry`] (without the body)
//!     journal.txt                  the journal body, authoritative
//!     <attachment>.wav             optional audio asset
//!     transcript.txt               optional transcript output
//! ```
//!
//! All recorded paths are workspace-relative and validated by
//! [`paths`]; references that fall outside the root are dropped with a
//! recorded warning rather than aborting the load.

pub mod assets;
pub mod paths;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::entry::Entry;
use crate::{NAME, WORKSPACE_VERSION};

/// Manifest file name at the workspace root
pub const MANIFEST_FILE: &str = "metadata.json";
/// Directory holding per-entry subdirectories
pub const ENTRIES_DIR: &str = "entries";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("workspace directory not found: {0}")]
    NotADirectory(PathBuf),
    #[error("manifest not found: {0}")]
    MissingManifest(PathBuf),
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    app: String,
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    entry_id: Uuid,
    entry_path: String,
}

/// An open workspace: the root directory plus the in-memory entry list.
///
/// The entry list is owned and mutated exclusively by the thread driving
/// the reconciler; worker threads never see it.
pub struct Workspace {
    root: PathBuf,
    entries: Vec<Entry>,
    warnings: Vec<String>,
}

impl Workspace {
    /// Create a new workspace at `path`, writing an empty manifest.
    pub fn init(path: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| WorkspaceError::Io {
            path: root.clone(),
            source,
        })?;
        let mut workspace = Self {
            root,
            entries: Vec::new(),
            warnings: Vec::new(),
        };
        workspace.save()?;
        Ok(workspace)
    }

    /// Open an existing workspace, loading every entry listed in the
    /// manifest. Per-entry problems (missing files, unsafe paths) are
    /// recorded as warnings; only a missing or unparsable manifest fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(WorkspaceError::NotADirectory(root));
        }
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(WorkspaceError::MissingManifest(manifest_path));
        }
        let raw = fs::read_to_string(&manifest_path).map_err(|source| WorkspaceError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|source| WorkspaceError::Parse {
                path: manifest_path,
                source,
            })?;

        let mut workspace = Self {
            root,
            entries: Vec::new(),
            warnings: Vec::new(),
        };
        for listed in &manifest.entries {
            match workspace.load_entry(listed) {
                Some(entry) => workspace.entries.push(entry),
                None => continue,
            }
        }
        workspace.sort_entries();
        Ok(workspace)
    }

    /// Load one entry from its manifest record, sanitizing every recorded
    /// path. Returns `None` (with a warning pushed) when the entry file
    /// itself is unusable.
    fn load_entry(&mut self, listed: &ManifestEntry) -> Option<Entry> {
        let entry_abs = match paths::resolve(&self.root, &listed.entry_path) {
            Ok((_, abs)) => abs,
            Err(e) => {
                self.push_warning(format!("entry {}: {}", listed.entry_id, e));
                return None;
            }
        };
        let raw = match fs::read_to_string(&entry_abs) {
            Ok(raw) => raw,
            Err(e) => {
                self.push_warning(format!(
                    "entry {}: cannot read {}: {}",
                    listed.entry_id, listed.entry_path, e
                ));
                return None;
            }
        };
        let mut entry: Entry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                self.push_warning(format!(
                    "entry {}: invalid entry.json: {}",
                    listed.entry_id, e
                ));
                return None;
            }
        };

        entry.journal_path = self.sanitize_ref(entry.id, "journal_path", entry.journal_path.take());
        entry.audio_path = self.sanitize_ref(entry.id, "audio_path", entry.audio_path.take());
        entry.transcript_path =
            self.sanitize_ref(entry.id, "transcript_path", entry.transcript_path.take());

        entry.journal = match &entry.journal_path {
            Some(rel) => {
                let journal_abs = self.root.join(rel);
                match fs::read_to_string(&journal_abs) {
                    Ok(text) => text,
                    Err(e) => {
                        self.push_warning(format!("entry {}: journal {}: {}", entry.id, rel, e));
                        String::new()
                    }
                }
            }
            None => String::new(),
        };
        Some(entry)
    }

    /// Validate one recorded relative path; drop it with a warning when it
    /// is absolute or escapes the root.
    fn sanitize_ref(&mut self, id: Uuid, field: &str, value: Option<String>) -> Option<String> {
        let raw = value?;
        match paths::normalize_rel(&raw) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                self.push_warning(format!("entry {}: dropped {} {:?}: {}", id, field, raw, e));
                None
            }
        }
    }

    fn push_warning(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Write every entry directory, rewrite the manifest, and prune entry
    /// directories that no longer correspond to a live entry.
    pub fn save(&mut self) -> Result<(), WorkspaceError> {
        let entries_dir = self.root.join(ENTRIES_DIR);
        fs::create_dir_all(&entries_dir).map_err(|source| WorkspaceError::Io {
            path: entries_dir.clone(),
            source,
        })?;

        let mut manifest_entries = Vec::with_capacity(self.entries.len());
        let mut expected: HashSet<String> = HashSet::new();
        for i in 0..self.entries.len() {
            let id = self.entries[i].id;
            expected.insert(id.to_string());

            let journal_rel = journal_rel(id);
            let journal_abs = self.root.join(&journal_rel);
            write_text(&journal_abs, &self.entries[i].journal)?;
            self.entries[i].journal_path = Some(journal_rel);

            let entry_rel = entry_rel(id);
            let entry_abs = self.root.join(&entry_rel);
            let payload = serde_json::to_string_pretty(&self.entries[i]).map_err(|source| {
                WorkspaceError::Parse {
                    path: entry_abs.clone(),
                    source,
                }
            })?;
            write_text(&entry_abs, &payload)?;

            manifest_entries.push(ManifestEntry {
                entry_id: id,
                entry_path: entry_rel,
            });
        }

        // Prune directories left behind by deleted entries.
        if let Ok(read) = fs::read_dir(&entries_dir) {
            for dir in read.flatten() {
                let name = dir.file_name().to_string_lossy().to_string();
                if dir.path().is_dir() && !expected.contains(&name) {
                    if let Err(e) = fs::remove_dir_all(dir.path()) {
                        warn!("could not prune stale entry dir {}: {}", name, e);
                    }
                }
            }
        }

        let manifest = Manifest {
            app: NAME.to_string(),
            version: WORKSPACE_VERSION,
            last_updated: Utc::now(),
            entries: manifest_entries,
        };
        let manifest_abs = self.root.join(MANIFEST_FILE);
        let payload =
            serde_json::to_string_pretty(&manifest).map_err(|source| WorkspaceError::Parse {
                path: manifest_abs.clone(),
                source,
            })?;
        write_text(&manifest_abs, &payload)?;
        Ok(())
    }

    /// Incremental autosave used by the reconciler: failures are surfaced
    /// as warnings, never panics, so the poll loop keeps running.
    pub fn autosave(&mut self) {
        if let Err(e) = self.save() {
            self.push_warning(format!("autosave failed: {}", e));
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, id: Uuid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: Uuid) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Insert or replace an entry, keeping the list sorted.
    pub fn upsert(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
        self.sort_entries();
    }

    /// Remove an entry from the in-memory list. The on-disk directory goes
    /// away on the next save; any in-flight job must be cancelled by the
    /// caller beforehand.
    pub fn remove(&mut self, id: Uuid) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Resolve a workspace-relative path, enforcing containment.
    pub fn resolve_rel(&self, rel: &str) -> Result<PathBuf, paths::PathError> {
        paths::resolve(&self.root, rel).map(|(_, abs)| abs)
    }

    /// Warnings collected during load and autosave
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn sort_entries(&mut self) {
        self.entries.sort_by_key(|e| e.sort_key());
    }
}

/// Canonical relative path of an entry's `journal.txt`
pub fn journal_rel(id: Uuid) -> String {
    format!("{}/{}/journal.txt", ENTRIES_DIR, id)
}

/// Canonical relative path of an entry's `transcript.txt`
pub fn transcript_rel(id: Uuid) -> String {
    format!("{}/{}/transcript.txt", ENTRIES_DIR, id)
}

/// Canonical relative path of an entry's `entry.json`
pub fn entry_rel(id: Uuid) -> String {
    format!("{}/{}/entry.json", ENTRIES_DIR, id)
}

/// Write via a sibling temp file and rename, so a crash mid-write never
/// leaves a truncated manifest or journal behind.
fn write_text(path: &Path, text: &str) -> Result<(), WorkspaceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| WorkspaceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(|source| WorkspaceError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry(date: &str, title: &str) -> Entry {
        let mut entry = Entry::new();
        entry.date = date.to_string();
        entry.title = title.to_string();
        entry.start = Some("09:00".to_string());
        entry.end = Some("10:00".to_string());
        entry.minutes = 60;
        entry.journal = format!("Journal for {}", title);
        entry
    }

    #[test]
    fn test_round_trip_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        ws.upsert(sample_entry("2026-08-27", "première"));
        ws.upsert(sample_entry("2026-08-28", "deuxième"));
        ws.save().unwrap();
        let saved: Vec<Entry> = ws.entries().to_vec();

        let reloaded = Workspace::open(dir.path()).unwrap();
        assert!(reloaded.warnings().is_empty());
        assert_eq!(reloaded.entries().len(), 2);
        for (a, b) in saved.iter().zip(reloaded.entries()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.date, b.date);
            assert_eq!(a.title, b.title);
            assert_eq!(a.minutes, b.minutes);
            assert_eq!(a.journal, b.journal);
            assert_eq!(a.journal_path, b.journal_path);
            assert_eq!(a.audio_path, b.audio_path);
            assert_eq!(a.transcript_path, b.transcript_path);
        }
    }

    #[test]
    fn test_entries_sorted_by_date_then_start() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        let mut late = sample_entry("2026-08-28", "late");
        late.start = Some("15:00".to_string());
        let early = sample_entry("2026-08-28", "early");
        let older = sample_entry("2026-08-01", "older");
        ws.upsert(late);
        ws.upsert(early);
        ws.upsert(older);
        let titles: Vec<&str> = ws.entries().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["older", "early", "late"]);
    }

    #[test]
    fn test_traversing_journal_path_is_dropped_with_warning() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        let mut entry = sample_entry("2026-08-28", "evil");
        entry.journal = "on-disk journal".to_string();
        let id = entry.id;
        ws.upsert(entry);
        ws.save().unwrap();

        // Tamper with the stored entry.json by hand.
        let entry_abs = dir.path().join(entry_rel(id));
        let mut payload: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&entry_abs).unwrap()).unwrap();
        payload["journal_path"] = serde_json::json!("../../etc/passwd");
        fs::write(&entry_abs, serde_json::to_string(&payload).unwrap()).unwrap();

        let reloaded = Workspace::open(dir.path()).unwrap();
        let loaded = reloaded.entry(id).unwrap();
        assert!(loaded.journal_path.is_none());
        assert_eq!(loaded.journal, "");
        assert!(reloaded
            .warnings()
            .iter()
            .any(|w| w.contains("journal_path")));
    }

    #[test]
    fn test_save_prunes_deleted_entry_dirs() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        let entry = sample_entry("2026-08-28", "doomed");
        let id = entry.id;
        ws.upsert(entry);
        ws.save().unwrap();
        let entry_dir = dir.path().join(ENTRIES_DIR).join(id.to_string());
        assert!(entry_dir.is_dir());

        ws.remove(id);
        ws.save().unwrap();
        assert!(!entry_dir.exists());
    }

    #[test]
    fn test_open_missing_manifest_fails() {
        let dir = TempDir::new().unwrap();
        match Workspace::open(dir.path()) {
            Err(WorkspaceError::MissingManifest(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unreadable_entry_keeps_rest_of_workspace() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        let broken = sample_entry("2026-08-27", "broken");
        let broken_id = broken.id;
        let fine = sample_entry("2026-08-28", "fine");
        let fine_id = fine.id;
        ws.upsert(broken);
        ws.upsert(fine);
        ws.save().unwrap();

        fs::write(dir.path().join(entry_rel(broken_id)), "not json").unwrap();

        let reloaded = Workspace::open(dir.path()).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert!(reloaded.entry(fine_id).is_some());
        assert!(!reloaded.warnings().is_empty());
    }
}
