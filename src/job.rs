//! One transcription job: an external process wrapped in a worker thread.
//!
//! The worker owns the child process for its whole life. It streams the
//! merged stdout/stderr output, reports progress over the shared event
//! channel and honours a cancel flag between output lines. Every worker
//! emits exactly one terminal event (`Done`, `Error` or `Cancelled`).

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ResolvedTranscriber;
use crate::progress::parse_percent;

/// Output lines kept for error reporting and transcript fallback
const TAIL_LINES: usize = 200;

/// Grace period between the stop request and a hard kill
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Interval at which a waiting worker rechecks its cancel flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events a job emits over the registry channel. Each carries the entry
/// it belongs to, so stale events for replaced jobs can be recognised.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        entry_id: Uuid,
        label: String,
    },
    Progress {
        entry_id: Uuid,
        percent: f32,
        /// The output line the percentage was read from
        message: String,
    },
    CancelRequested {
        entry_id: Uuid,
        label: String,
    },
    Cancelled {
        entry_id: Uuid,
        label: String,
    },
    Error {
        entry_id: Uuid,
        message: String,
    },
    Done {
        entry_id: Uuid,
        transcript_path: String,
        journal_path: String,
        text: String,
    },
}

impl JobEvent {
    pub fn entry_id(&self) -> Uuid {
        match self {
            JobEvent::Started { entry_id, .. }
            | JobEvent::Progress { entry_id, .. }
            | JobEvent::CancelRequested { entry_id, .. }
            | JobEvent::Cancelled { entry_id, .. }
            | JobEvent::Error { entry_id, .. }
            | JobEvent::Done { entry_id, .. } => *entry_id,
        }
    }

    /// Terminal events end the job; the registry deregisters on them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Cancelled { .. } | JobEvent::Error { .. } | JobEvent::Done { .. }
        )
    }
}

/// Everything a worker needs, resolved before the thread spawns
#[derive(Debug, Clone)]
pub struct JobParams {
    pub entry_id: Uuid,
    /// Display label of the entry, echoed in lifecycle events
    pub label: String,
    /// Absolute path of the audio file to transcribe
    pub audio: PathBuf,
    /// Absolute path the transcript file is written to
    pub transcript_abs: PathBuf,
    /// Workspace-relative transcript path, echoed in the `Done` event
    pub transcript_rel: String,
    /// Workspace-relative journal path, echoed in the `Done` event
    pub journal_rel: String,
    pub transcriber: ResolvedTranscriber,
}

/// Worker thread body. Never panics on process failure; every exit path
/// sends exactly one terminal event.
pub fn run_job(params: JobParams, cancel: Arc<AtomicBool>, events: Sender<JobEvent>) {
    let entry_id = params.entry_id;
    let _ = events.send(JobEvent::Started {
        entry_id,
        label: params.label.clone(),
    });

    let terminal = run_job_inner(&params, &cancel, &events);
    let _ = events.send(terminal);
}

fn run_job_inner(
    params: &JobParams,
    cancel: &AtomicBool,
    events: &Sender<JobEvent>,
) -> JobEvent {
    let entry_id = params.entry_id;

    let mut child = match spawn_transcriber(params) {
        Ok(child) => child,
        Err(err) => {
            return JobEvent::Error {
                entry_id,
                message: format!("failed to launch transcriber: {err}"),
            };
        }
    };
    debug!(%entry_id, pid = child.id(), "transcriber started");

    let (line_tx, line_rx) = unbounded::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    let mut last_percent: Option<f32> = None;
    let mut cancelled = false;

    loop {
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
                if let Some(percent) = parse_percent(&line) {
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        let _ = events.send(JobEvent::Progress {
                            entry_id,
                            percent,
                            message: line,
                        });
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            // Both pipes closed; the process is exiting.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if cancelled {
        stop_child(&mut child);
        // Readers are left to finish on their own: a grandchild process
        // may still hold the pipes open after the child is gone.
        drop(readers);
        remove_partial(&params.transcript_abs);
        debug!(%entry_id, "job cancelled");
        return JobEvent::Cancelled {
            entry_id,
            label: params.label.clone(),
        };
    }

    for reader in readers {
        let _ = reader.join();
    }
    let status = match child.wait() {
        Ok(status) => status,
        Err(err) => {
            return JobEvent::Error {
                entry_id,
                message: format!("failed to reap transcriber: {err}"),
            };
        }
    };

    if !status.success() {
        remove_partial(&params.transcript_abs);
        let message = tail
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| match status.code() {
                Some(code) => format!("transcriber exited with code {code}"),
                None => "transcriber terminated by signal".to_string(),
            });
        return JobEvent::Error { entry_id, message };
    }

    // Only a missing file falls back to the captured output; an existing
    // file we cannot read (permissions, invalid UTF-8) is a failed job.
    let text = match std::fs::read_to_string(&params.transcript_abs) {
        Ok(text) => text.trim().to_string(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(%entry_id, "transcriber wrote no transcript file, using captured output");
            tail_transcript(&tail)
        }
        Err(err) => {
            return JobEvent::Error {
                entry_id,
                message: format!("cannot read transcript: {err}"),
            };
        }
    };
    let text = if text.is_empty() {
        tail_transcript(&tail)
    } else {
        text
    };

    JobEvent::Done {
        entry_id,
        transcript_path: params.transcript_rel.clone(),
        journal_path: params.journal_rel.clone(),
        text,
    }
}

fn spawn_transcriber(params: &JobParams) -> std::io::Result<Child> {
    let t = &params.transcriber;
    let mut command = Command::new(&t.executable);
    command
        .arg("--file")
        .arg(&params.audio)
        .arg("--model")
        .arg(&t.model)
        .arg("--format")
        .arg("txt")
        .arg("--write")
        .arg(&params.transcript_abs)
        .arg("--language")
        .arg(&t.language)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(threads) = t.threads {
        command.arg("--n-threads").arg(threads.to_string());
    }
    if let Some(temperature) = t.temperature {
        command.arg("--temperature").arg(temperature.to_string());
    }
    command.spawn()
}

fn spawn_reader(
    source: impl std::io::Read + Send + 'static,
    sink: Sender<String>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if sink.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// Ask the child to stop, give it [`STOP_GRACE`] to comply, then kill it.
fn stop_child(child: &mut Child) {
    request_stop(child);
    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(_) => break,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn request_stop(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_stop(child: &Child) {
    // No graceful signal on this platform; stop_child falls through to kill.
    let _ = child;
}

fn remove_partial(path: &std::path::Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

/// Reconstruct a transcript from captured output when the tool produced
/// no file. Progress chatter is filtered out.
fn tail_transcript(tail: &VecDeque<String>) -> String {
    tail.iter()
        .filter(|line| !line.trim().is_empty() && parse_percent(line).is_none())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> String {
        "2026-08-28 – Essai – 30 min".to_string()
    }

    #[test]
    fn test_event_terminality() {
        let id = Uuid::new_v4();
        assert!(!JobEvent::Started {
            entry_id: id,
            label: label()
        }
        .is_terminal());
        assert!(!JobEvent::Progress {
            entry_id: id,
            percent: 50.0,
            message: "progress: 50%".to_string()
        }
        .is_terminal());
        assert!(!JobEvent::CancelRequested {
            entry_id: id,
            label: label()
        }
        .is_terminal());
        assert!(JobEvent::Cancelled {
            entry_id: id,
            label: label()
        }
        .is_terminal());
        assert!(JobEvent::Error {
            entry_id: id,
            message: "boom".to_string()
        }
        .is_terminal());
        assert!(JobEvent::Done {
            entry_id: id,
            transcript_path: "t".to_string(),
            journal_path: "j".to_string(),
            text: "text".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_event_entry_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            JobEvent::Started {
                entry_id: id,
                label: label()
            }
            .entry_id(),
            id
        );
        assert_eq!(
            JobEvent::Error {
                entry_id: id,
                message: String::new()
            }
            .entry_id(),
            id
        );
    }

    #[test]
    fn test_tail_transcript_filters_progress() {
        let mut tail = VecDeque::new();
        tail.push_back("progress: 50%".to_string());
        tail.push_back("".to_string());
        tail.push_back("Bonjour le monde".to_string());
        tail.push_back("progress: 100%".to_string());
        assert_eq!(tail_transcript(&tail), "Bonjour le monde");
    }
}
