use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use vibe_scribe::{
    config::{EntryDefaults, TranscriberConfig},
    entry::{minutes_from_times, Entry},
    prompt::build_analysis_prompt,
    reconciler::{self, StatusView},
    registry::JobRegistry,
    workspace::Workspace,
};

/// Interval between event queue drains while jobs are running
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "vibe-scribe")]
#[command(about = "Journaling workspace with background audio transcription")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Workspace directory
    #[arg(long, env = "SCRIBE_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new workspace in the workspace directory
    Init,
    /// Add a journal entry
    Add {
        /// Entry title
        #[arg(long)]
        title: Option<String>,
        /// Entry date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Time range "HH:MM-HH:MM"
        #[arg(long)]
        time: Option<String>,
        /// Duration in minutes, derived from --time when omitted
        #[arg(long)]
        minutes: Option<u32>,
        /// Audio file to attach
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Journal text, or "-" to read from stdin
        #[arg(long)]
        journal: Option<String>,
    },
    /// List entries
    List,
    /// Remove an entry, or just its audio attachment
    Remove {
        /// Entry id (a unique prefix is enough)
        entry: String,
        /// Keep the entry, detach audio and transcript only
        #[arg(long)]
        audio_only: bool,
    },
    /// Transcribe audio attachments
    Transcribe {
        /// Entry id to transcribe; all pending entries when omitted
        entry: Option<String>,
        /// Re-transcribe entries that already have a transcript
        #[arg(long)]
        force: bool,
    },
    /// Print an analysis prompt built from all entries
    Prompt,
    /// Export the workspace as a zip archive
    Export {
        /// Directory the archive is written to
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.into();
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Init => cmd_init(&args.workspace),
        Command::Add {
            title,
            date,
            time,
            minutes,
            audio,
            journal,
        } => cmd_add(&args.workspace, title, date, time, minutes, audio, journal),
        Command::List => cmd_list(&args.workspace),
        Command::Remove { entry, audio_only } => cmd_remove(&args.workspace, &entry, audio_only),
        Command::Transcribe { entry, force } => cmd_transcribe(&args.workspace, entry, force),
        Command::Prompt => cmd_prompt(&args.workspace),
        Command::Export { output } => cmd_export(&args.workspace, &output),
    }
}

fn open_workspace(root: &Path) -> Result<Workspace> {
    let mut workspace = Workspace::open(root)
        .with_context(|| format!("failed to open workspace at {}", root.display()))?;
    for warning in workspace.take_warnings() {
        warn!("{warning}");
    }
    Ok(workspace)
}

fn cmd_init(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    Workspace::init(root)
        .with_context(|| format!("failed to initialise workspace at {}", root.display()))?;
    println!("initialised workspace at {}", root.display());
    Ok(())
}

fn cmd_add(
    root: &Path,
    title: Option<String>,
    date: Option<String>,
    time: Option<String>,
    minutes: Option<u32>,
    audio: Option<PathBuf>,
    journal: Option<String>,
) -> Result<()> {
    let mut workspace = open_workspace(root)?;

    let mut entry = Entry::new();
    entry.date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    if let Some(title) = title {
        entry.title = title;
    }
    if let Some(time) = time {
        let (start, end) = vibe_scribe::config::parse_default_time_range(Some(&time));
        if start.is_none() && end.is_none() {
            bail!("unrecognised time range: {time} (expected HH:MM-HH:MM)");
        }
        entry.start = start;
        entry.end = end;
    }
    entry.minutes = minutes
        .or_else(|| minutes_from_times(entry.start.as_deref(), entry.end.as_deref()))
        .unwrap_or(0);
    entry.journal = match journal.as_deref() {
        Some("-") => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
        Some(text) => text.to_string(),
        None => String::new(),
    };
    EntryDefaults::from_env().apply(&mut entry);

    let id = entry.id;
    workspace.upsert(entry);
    if let Some(audio) = audio {
        workspace
            .attach_audio(id, &audio, false)
            .with_context(|| format!("failed to attach {}", audio.display()))?;
    }
    workspace.save()?;
    println!("{id}");
    Ok(())
}

fn cmd_list(root: &Path) -> Result<()> {
    let workspace = open_workspace(root)?;
    if workspace.entries().is_empty() {
        println!("no entries");
        return Ok(());
    }
    for entry in workspace.entries() {
        let audio = if entry.audio_path.is_some() { "audio" } else { "-" };
        let transcript = if entry.transcript_path.is_some() {
            "transcript"
        } else {
            "-"
        };
        println!(
            "{}  {:<12} {:<12} {}",
            entry.id,
            audio,
            transcript,
            entry.label()
        );
    }
    Ok(())
}

fn cmd_remove(root: &Path, entry_ref: &str, audio_only: bool) -> Result<()> {
    let mut workspace = open_workspace(root)?;
    let id = find_entry(&workspace, entry_ref)?;
    if audio_only {
        workspace.remove_audio(id)?;
        println!("detached audio from {id}");
    } else {
        workspace.remove_audio(id)?;
        workspace.remove(id);
        println!("removed {id}");
    }
    workspace.save()?;
    Ok(())
}

fn cmd_transcribe(root: &Path, entry_ref: Option<String>, force: bool) -> Result<()> {
    let mut workspace = open_workspace(root)?;
    let mut registry = JobRegistry::new(TranscriberConfig::from_env());

    let targets: Vec<Uuid> = match entry_ref {
        Some(entry_ref) => vec![find_entry(&workspace, &entry_ref)?],
        None => workspace
            .entries()
            .iter()
            .filter(|entry| {
                entry.audio_path.is_some() && (force || entry.transcript_path.is_none())
            })
            .map(|entry| entry.id)
            .collect(),
    };
    if targets.is_empty() {
        println!("nothing to transcribe");
        return Ok(());
    }
    for id in &targets {
        registry
            .start(&workspace, *id)
            .with_context(|| format!("cannot transcribe entry {id}"))?;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to install interrupt handler")?;
    }

    let mut view = TerminalView::default();
    let mut cancelling = false;
    while registry.has_jobs() {
        if interrupted.load(Ordering::SeqCst) && !cancelling {
            eprintln!("interrupt received, stopping jobs");
            for id in &targets {
                registry.cancel(*id);
            }
            cancelling = true;
        }
        let events = registry.drain();
        reconciler::apply(&mut workspace, events, &mut view);
        if registry.has_jobs() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    // Workers may queue their terminal event right before deregistration.
    reconciler::apply(&mut workspace, registry.drain(), &mut view);
    workspace.save()?;

    if view.failures > 0 {
        bail!("{} transcription job(s) failed", view.failures);
    }
    info!("all transcription jobs finished");
    Ok(())
}

fn cmd_prompt(root: &Path) -> Result<()> {
    let workspace = open_workspace(root)?;
    println!("{}", build_analysis_prompt(workspace.entries()));
    Ok(())
}

fn cmd_export(root: &Path, output: &Path) -> Result<()> {
    let workspace = open_workspace(root)?;
    std::fs::create_dir_all(output)?;
    let name = format!(
        "vibe-scribe_{}.zip",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let archive_path = output.join(&name);

    let file = File::create(&archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![workspace.root().to_path_buf()];
    while let Some(dir) = stack.pop() {
        for item in std::fs::read_dir(&dir)? {
            let path = item?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            // Do not pack a previous export sitting in the workspace.
            if path == archive_path {
                continue;
            }
            let rel = path
                .strip_prefix(workspace.root())
                .map_err(|_| anyhow!("file outside workspace: {}", path.display()))?;
            zip.start_file(rel.to_string_lossy(), options)?;
            let mut source = File::open(&path)?;
            std::io::copy(&mut source, &mut zip)?;
        }
    }
    zip.finish()?;
    println!("{}", archive_path.display());
    Ok(())
}

/// Resolve an entry reference: a full id or a unique prefix of one.
fn find_entry(workspace: &Workspace, entry_ref: &str) -> Result<Uuid> {
    if let Ok(id) = entry_ref.parse::<Uuid>() {
        if workspace.entry(id).is_some() {
            return Ok(id);
        }
        bail!("no entry with id {id}");
    }
    let matches: Vec<Uuid> = workspace
        .entries()
        .iter()
        .filter(|entry| entry.id.to_string().starts_with(entry_ref))
        .map(|entry| entry.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no entry matches '{entry_ref}'"),
        _ => bail!("'{entry_ref}' is ambiguous ({} matches)", matches.len()),
    }
}

/// Prints job state to the terminal as events are reconciled.
#[derive(Default)]
struct TerminalView {
    failures: u32,
}

impl StatusView for TerminalView {
    fn status(&mut self, entry_id: Uuid, message: &str) {
        if message.starts_with("transcription failed") {
            self.failures += 1;
        }
        let short = &entry_id.to_string()[..8];
        println!("[{short}] {message}");
    }

    fn progress(&mut self, entry_id: Uuid, percent: Option<f32>) {
        if let Some(percent) = percent {
            let short = &entry_id.to_string()[..8];
            print!("\r[{short}] {percent:>5.1}%");
            let _ = std::io::stdout().flush();
            if percent >= 100.0 {
                println!();
            }
        }
    }

    fn entry_updated(&mut self, _entry_id: Uuid) {}
}
