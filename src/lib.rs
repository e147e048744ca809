//! Vibe Scribe - a journaling workspace with background audio transcription
//!
//! This crate provides the shared core behind the Vibe Scribe journaling
//! tools: timestamped free-text entries stored in a workspace directory,
//! optional audio attachments, and a background pipeline that pipes each
//! attachment through the external `vibe` speech-to-text executable and
//! merges the transcript back into the entry's journal. It features:
//!
//! - A file-tree workspace (`metadata.json` manifest + one directory per
//!   entry) with strict workspace-relative path validation
//! - One worker thread per transcription job streaming subprocess output
//! - A registry tracking at most one job per entry, with cancellation
//! - A non-blocking event queue drained by a single reconciler thread
//! - Idempotent transcript merging under a fixed journal header
//!
//! # Example
//!
//! ```no_run
//! use vibe_scribe::{
//!     config::TranscriberConfig,
//!     reconciler::{self, NullStatusView},
//!     registry::JobRegistry,
//!     workspace::Workspace,
//! };
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut workspace = Workspace::open("/path/to/workspace")?;
//!     let mut registry = JobRegistry::new(TranscriberConfig::from_env());
//!
//!     // Queue a job for every entry that has audio but no transcript yet.
//!     for entry in workspace.entries().to_vec() {
//!         if entry.audio_path.is_some() && entry.transcript_path.is_none() {
//!             registry.start(&workspace, entry.id)?;
//!         }
//!     }
//!
//!     // Poll loop standing in for the UI thread.
//!     let mut view = NullStatusView;
//!     while registry.has_jobs() {
//!         let events = registry.drain();
//!         reconciler::apply(&mut workspace, events, &mut view);
//!         std::thread::sleep(Duration::from_millis(200));
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entry;
pub mod job;
pub mod progress;
pub mod prompt;
pub mod reconciler;
pub mod registry;
pub mod workspace;

// Re-export commonly used types for convenience
pub use config::{EntryDefaults, ResolvedTranscriber, TranscriberConfig};
pub use entry::Entry;
pub use job::{JobEvent, JobParams};
pub use registry::JobRegistry;
pub use workspace::{Workspace, WorkspaceError};

use thiserror::Error;

/// Errors that can occur in the vibe-scribe core
#[derive(Error, Debug)]
pub enum ScribeError {
    /// Workspace load/save failure
    #[error("workspace error: {0}")]
    Workspace(#[from] workspace::WorkspaceError),

    /// A recorded path was absolute or escaped the workspace root
    #[error("path error: {0}")]
    Path(#[from] workspace::paths::PathError),

    /// Transcriber configuration could not be resolved
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Manifest or entry file (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for vibe-scribe operations
pub type Result<T> = std::result::Result<T, ScribeError>;

/// Marker under which transcripts are appended to journals. A journal
/// contains at most one block after this marker; re-transcription replaces
/// it in place.
pub const TRANSCRIPT_HEADER: &str = "\n\n--- Transcription Vibe ---\n";

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Current on-disk workspace format version
pub const WORKSPACE_VERSION: u32 = 1;
