//! Audio asset resolution: moving user-supplied or scratch recordings
//! into an entry's durable storage location.

use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Workspace, ENTRIES_DIR};

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("no entry with id {0}")]
    UnknownEntry(Uuid),
    #[error("audio file not found: {0}")]
    SourceMissing(String),
    #[error("could not store audio asset: {0}")]
    Copy(#[from] std::io::Error),
}

impl Workspace {
    /// Copy `source` into the entry's directory and record the resulting
    /// workspace-relative path as the entry's audio asset.
    ///
    /// A source already inside the workspace is referenced in place rather
    /// than duplicated. Scratch recordings (`source_is_temp`) are removed
    /// after a successful copy. On any failure the entry's `audio_path`
    /// is left untouched.
    pub fn attach_audio(
        &mut self,
        id: Uuid,
        source: &Path,
        source_is_temp: bool,
    ) -> Result<String, AssetError> {
        if self.entry(id).is_none() {
            return Err(AssetError::UnknownEntry(id));
        }
        if !source.is_file() {
            return Err(AssetError::SourceMissing(source.display().to_string()));
        }

        let rel = match source.strip_prefix(self.root()) {
            Ok(inside) => inside.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                let entry_dir = self.root().join(ENTRIES_DIR).join(id.to_string());
                fs::create_dir_all(&entry_dir)?;
                let dest = unique_destination(&entry_dir, source);
                fs::copy(source, &dest)?;
                if source_is_temp {
                    if let Err(e) = fs::remove_file(source) {
                        warn!("could not remove scratch recording {:?}: {}", source, e);
                    }
                }
                let name = dest
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("{}/{}/{}", ENTRIES_DIR, id, name)
            }
        };

        debug!("entry {}: audio asset stored at {}", id, rel);
        let entry = self.entry_mut(id).ok_or(AssetError::UnknownEntry(id))?;
        entry.audio_path = Some(rel.clone());
        entry.touch();
        Ok(rel)
    }

    /// Remove an entry's audio asset and any associated transcript file.
    ///
    /// Any in-flight transcription job for this entry must be cancelled by
    /// the caller before the files go away. Safe to call when no asset is
    /// recorded.
    pub fn remove_audio(&mut self, id: Uuid) -> Result<(), AssetError> {
        let (audio_rel, transcript_rel) = {
            let entry = self.entry(id).ok_or(AssetError::UnknownEntry(id))?;
            (entry.audio_path.clone(), entry.transcript_path.clone())
        };

        for rel in [audio_rel.as_deref(), transcript_rel.as_deref()]
            .into_iter()
            .flatten()
        {
            match self.resolve_rel(rel) {
                Ok(abs) if abs.is_file() => {
                    if let Err(e) = fs::remove_file(&abs) {
                        warn!("could not delete {}: {}", rel, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("skipping unsafe recorded path {}: {}", rel, e),
            }
        }

        let entry = self.entry_mut(id).ok_or(AssetError::UnknownEntry(id))?;
        entry.audio_path = None;
        entry.transcript_path = None;
        entry.touch();
        Ok(())
    }
}

/// Pick a destination name inside `dir`, suffixing `_1`, `_2`, ... while
/// the plain name is taken.
fn unique_destination(dir: &Path, source: &Path) -> std::path::PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut dest = dir.join(format!("{}{}", stem, ext));
    let mut counter = 1;
    while dest.exists() {
        dest = dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use tempfile::TempDir;

    fn workspace_with_entry() -> (TempDir, Workspace, Uuid) {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::init(dir.path()).unwrap();
        let entry = Entry::new();
        let id = entry.id;
        ws.upsert(entry);
        (dir, ws, id)
    }

    #[test]
    fn test_attach_copies_external_file() {
        let (dir, mut ws, id) = workspace_with_entry();
        let scratch = TempDir::new().unwrap();
        let source = scratch.path().join("rec.wav");
        fs::write(&source, b"RIFFdata").unwrap();

        let rel = ws.attach_audio(id, &source, false).unwrap();
        assert_eq!(rel, format!("entries/{}/rec.wav", id));
        assert!(dir.path().join(&rel).is_file());
        assert!(source.is_file());
        assert_eq!(ws.entry(id).unwrap().audio_path.as_deref(), Some(rel.as_str()));
    }

    #[test]
    fn test_attach_removes_scratch_recording() {
        let (_dir, mut ws, id) = workspace_with_entry();
        let scratch = TempDir::new().unwrap();
        let source = scratch.path().join("scratch.wav");
        fs::write(&source, b"RIFFdata").unwrap();

        ws.attach_audio(id, &source, true).unwrap();
        assert!(!source.exists());
    }

    #[test]
    fn test_attach_avoids_name_collisions() {
        let (dir, mut ws, id) = workspace_with_entry();
        let scratch = TempDir::new().unwrap();
        let source = scratch.path().join("rec.wav");
        fs::write(&source, b"first").unwrap();
        ws.attach_audio(id, &source, false).unwrap();
        fs::write(&source, b"second").unwrap();
        let rel = ws.attach_audio(id, &source, false).unwrap();
        assert_eq!(rel, format!("entries/{}/rec_1.wav", id));
        assert_eq!(fs::read(dir.path().join(&rel)).unwrap(), b"second");
    }

    #[test]
    fn test_attach_missing_source_leaves_entry_untouched() {
        let (_dir, mut ws, id) = workspace_with_entry();
        let result = ws.attach_audio(id, Path::new("/nonexistent/rec.wav"), false);
        assert!(matches!(result, Err(AssetError::SourceMissing(_))));
        assert!(ws.entry(id).unwrap().audio_path.is_none());
    }

    #[test]
    fn test_remove_audio_deletes_files_and_clears_fields() {
        let (dir, mut ws, id) = workspace_with_entry();
        let scratch = TempDir::new().unwrap();
        let source = scratch.path().join("rec.wav");
        fs::write(&source, b"RIFFdata").unwrap();
        let audio_rel = ws.attach_audio(id, &source, false).unwrap();

        let transcript_rel = super::super::transcript_rel(id);
        let transcript_abs = dir.path().join(&transcript_rel);
        fs::create_dir_all(transcript_abs.parent().unwrap()).unwrap();
        fs::write(&transcript_abs, "transcribed").unwrap();
        ws.entry_mut(id).unwrap().transcript_path = Some(transcript_rel);

        ws.remove_audio(id).unwrap();
        assert!(!dir.path().join(audio_rel).exists());
        assert!(!transcript_abs.exists());
        let entry = ws.entry(id).unwrap();
        assert!(entry.audio_path.is_none());
        assert!(entry.transcript_path.is_none());
    }

    #[test]
    fn test_remove_audio_without_asset_is_noop() {
        let (_dir, mut ws, id) = workspace_with_entry();
        ws.remove_audio(id).unwrap();
    }
}
