//! Applies drained job events to the workspace.
//!
//! Runs on the thread that owns the [`Workspace`]; workers never touch
//! shared state directly. Events for entries deleted since the job
//! started are dropped without effect, and applying the same terminal
//! event twice leaves the workspace unchanged.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::JobEvent;
use crate::workspace::Workspace;

/// Sink for user-facing job state. The CLI prints to the terminal; a
/// graphical frontend would update widgets; tests record calls.
pub trait StatusView {
    /// Show a one-line status message for an entry.
    fn status(&mut self, entry_id: Uuid, message: &str);
    /// Update the progress indicator; `None` clears it.
    fn progress(&mut self, entry_id: Uuid, percent: Option<f32>);
    /// The entry's stored content changed and should be re-rendered.
    fn entry_updated(&mut self, entry_id: Uuid);
}

/// A view that ignores everything, for headless use.
pub struct NullStatusView;

impl StatusView for NullStatusView {
    fn status(&mut self, _entry_id: Uuid, _message: &str) {}
    fn progress(&mut self, _entry_id: Uuid, _percent: Option<f32>) {}
    fn entry_updated(&mut self, _entry_id: Uuid) {}
}

/// Apply a batch of drained events in queue order.
pub fn apply<I>(workspace: &mut Workspace, events: I, view: &mut impl StatusView)
where
    I: IntoIterator<Item = JobEvent>,
{
    for event in events {
        apply_one(workspace, event, view);
    }
}

fn apply_one(workspace: &mut Workspace, event: JobEvent, view: &mut impl StatusView) {
    match event {
        JobEvent::Started { entry_id, label } => {
            view.progress(entry_id, Some(0.0));
            view.status(entry_id, &format!("transcribing {label}..."));
        }
        JobEvent::Progress {
            entry_id, percent, ..
        } => {
            view.progress(entry_id, Some(percent));
        }
        JobEvent::CancelRequested { entry_id, .. } => {
            view.status(entry_id, "stopping transcription...");
        }
        JobEvent::Cancelled { entry_id, label } => {
            view.progress(entry_id, None);
            view.status(entry_id, &format!("transcription of {label} cancelled"));
        }
        JobEvent::Error { entry_id, message } => {
            warn!(%entry_id, %message, "transcription failed");
            view.progress(entry_id, None);
            view.status(entry_id, &format!("transcription failed: {message}"));
        }
        JobEvent::Done {
            entry_id,
            transcript_path,
            journal_path: _,
            text,
        } => {
            apply_done(workspace, entry_id, transcript_path, text, view);
        }
    }
}

fn apply_done(
    workspace: &mut Workspace,
    entry_id: Uuid,
    transcript_path: String,
    text: String,
    view: &mut impl StatusView,
) {
    view.progress(entry_id, None);

    if workspace.entry(entry_id).is_none() {
        debug!(%entry_id, "entry deleted while transcribing, dropping result");
        return;
    }
    if text.trim().is_empty() {
        warn!(%entry_id, "transcriber produced no text");
        view.status(entry_id, "transcription produced no text");
        return;
    }

    // The worker's copy may be the captured-output fallback; persist the
    // text we actually merged so the file matches the journal. The path
    // is only recorded on the entry once the file actually exists.
    let written = match workspace.resolve_rel(&transcript_path) {
        Ok(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::write(&path, text.trim()) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%entry_id, error = %err, "failed to write transcript file");
                    false
                }
            }
        }
        Err(err) => {
            warn!(%entry_id, error = %err, "transcript path rejected");
            false
        }
    };

    let Some(entry) = workspace.entry_mut(entry_id) else {
        return;
    };
    entry.merge_transcript(text.trim());
    if written {
        entry.transcript_path = Some(transcript_path);
    }

    workspace.autosave();
    view.entry_updated(entry_id);
    view.status(entry_id, "transcription complete");
}
