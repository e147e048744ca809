//! Job registry: worker thread lifecycle and the shared event queue.
//!
//! All workers send into one unbounded channel; the owner of the
//! registry drains it from a single thread and feeds the events to the
//! reconciler. At most one job runs per entry: starting a new job for an
//! entry first cancels and joins the old one, so the old job's terminal
//! event is already queued before the new job's `Started`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, TranscriberConfig};
use crate::job::{run_job, JobEvent, JobParams};
use crate::workspace::paths::PathError;
use crate::workspace::{self, Workspace};

#[derive(Error, Debug)]
pub enum StartError {
    #[error("no entry with id {0}")]
    UnknownEntry(Uuid),
    #[error("entry {0} has no audio attachment")]
    NoAudio(Uuid),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("failed to prepare entry directory: {0}")]
    Io(#[from] std::io::Error),
}

struct JobHandle {
    cancel: Arc<AtomicBool>,
    label: String,
    thread: Option<JoinHandle<()>>,
}

pub struct JobRegistry {
    config: TranscriberConfig,
    events_tx: Sender<JobEvent>,
    events_rx: Receiver<JobEvent>,
    jobs: HashMap<Uuid, JobHandle>,
}

impl JobRegistry {
    pub fn new(config: TranscriberConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            events_tx,
            events_rx,
            jobs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    /// Start a transcription job for an entry's audio attachment.
    ///
    /// Fails without creating a job when the entry is missing, has no
    /// audio, or the transcriber configuration does not resolve. If a job
    /// is already running for this entry it is cancelled and joined
    /// first, so its terminal event precedes the new `Started` in the
    /// queue.
    pub fn start(&mut self, workspace: &Workspace, entry_id: Uuid) -> Result<(), StartError> {
        let entry = workspace
            .entry(entry_id)
            .ok_or(StartError::UnknownEntry(entry_id))?;
        let audio_rel = entry
            .audio_path
            .clone()
            .ok_or(StartError::NoAudio(entry_id))?;
        let label = entry.label();
        let transcriber = self.config.resolve()?;
        let audio = workspace.resolve_rel(&audio_rel)?;

        if let Some(mut old) = self.jobs.remove(&entry_id) {
            info!(%entry_id, "replacing running job");
            old.cancel.store(true, Ordering::SeqCst);
            if let Some(thread) = old.thread.take() {
                let _ = thread.join();
            }
        }

        let transcript_rel = workspace::transcript_rel(entry_id);
        let transcript_abs = workspace.resolve_rel(&transcript_rel)?;
        if let Some(parent) = transcript_abs.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let params = JobParams {
            entry_id,
            label: label.clone(),
            audio,
            transcript_abs,
            transcript_rel,
            journal_rel: workspace::journal_rel(entry_id),
            transcriber,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let thread = {
            let cancel = Arc::clone(&cancel);
            let events = self.events_tx.clone();
            std::thread::spawn(move || run_job(params, cancel, events))
        };
        self.jobs.insert(
            entry_id,
            JobHandle {
                cancel,
                label,
                thread: Some(thread),
            },
        );
        info!(%entry_id, "transcription job started");
        Ok(())
    }

    /// Request cancellation of an entry's job. A no-op when no job is
    /// running, safe to call repeatedly.
    pub fn cancel(&mut self, entry_id: Uuid) {
        if let Some(handle) = self.jobs.get(&entry_id) {
            if !handle.cancel.swap(true, Ordering::SeqCst) {
                debug!(%entry_id, "cancellation requested");
                let _ = self.events_tx.send(JobEvent::CancelRequested {
                    entry_id,
                    label: handle.label.clone(),
                });
            }
        }
    }

    /// Drain all queued events without blocking. Terminal events
    /// deregister their finished worker.
    pub fn drain(&mut self) -> Vec<JobEvent> {
        let events: Vec<JobEvent> = self.events_rx.try_iter().collect();
        for event in &events {
            if event.is_terminal() {
                self.deregister(event.entry_id());
            }
        }
        events
    }

    /// Remove a job's handle once its worker is done. A terminal event
    /// from a replaced job must not tear down the replacement, so the
    /// handle is only removed when its thread has actually finished.
    fn deregister(&mut self, entry_id: Uuid) {
        let finished = self
            .jobs
            .get(&entry_id)
            .and_then(|handle| handle.thread.as_ref())
            .is_some_and(|thread| thread.is_finished());
        if finished {
            if let Some(mut handle) = self.jobs.remove(&entry_id) {
                if let Some(thread) = handle.thread.take() {
                    let _ = thread.join();
                }
            }
        }
    }

    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_running(&self, entry_id: Uuid) -> bool {
        self.jobs.contains_key(&entry_id)
    }

    /// Cancel every job and wait up to `timeout` for the workers to
    /// finish. Workers still alive at the deadline are detached.
    pub fn shutdown(&mut self, timeout: Duration) {
        for (entry_id, handle) in &self.jobs {
            if !handle.cancel.swap(true, Ordering::SeqCst) {
                debug!(%entry_id, "cancelling job for shutdown");
            }
        }
        let deadline = Instant::now() + timeout;
        for (entry_id, mut handle) in self.jobs.drain() {
            let Some(thread) = handle.thread.take() else {
                continue;
            };
            while !thread.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                warn!(%entry_id, "worker did not stop in time, detaching");
            }
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        if self.has_jobs() {
            self.shutdown(Duration::from_secs(6));
        }
    }
}
