//! Generation job runner.
//!
//! Each job runs its tool as a child process on a dedicated worker thread.
//! stdout and stderr are read by two more threads that turn progress lines
//! into events; the worker polls the child so it can kill it on cancel.
//! All notifications go to the caller over one channel.

use crossbeam_channel::{unbounded, Receiver, Sender};
use kodan_core::{JobKind, KodanError, Result};
use parking_lot::Mutex;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{JobSpec, SuccessPolicy};
use crate::progress::{for_each_line, OutputTail, ProgressParser};
use crate::registry::JobState;

/// How often a running child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Lines of diagnostic output kept per stream.
const TAIL_LINES: usize = 40;
/// Longest failure message taken from stderr.
const MAX_MESSAGE_CHARS: usize = 500;

/// Handle for cancelling a running job.
#[derive(Debug, Clone)]
pub struct JobCancel(Arc<AtomicBool>);

impl JobCancel {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for JobCancel {
    fn default() -> Self {
        Self::new()
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { output: PathBuf },
    /// The process could not start, exited non-zero, or its output said it
    /// failed.
    Failed { message: String },
    /// The process reported success but left no output file.
    MissingOutput { output: PathBuf },
    Canceled,
}

impl JobOutcome {
    /// Terminal registry state for this outcome.
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded { .. } => JobState::Succeeded,
            Self::Failed { .. } | Self::MissingOutput { .. } => JobState::Failed,
            Self::Canceled => JobState::Canceled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The failure as an error, or the output path on success.
    pub fn into_result(self, kind: JobKind) -> Result<PathBuf> {
        match self {
            Self::Succeeded { output } => Ok(output),
            Self::Failed { message } => Err(KodanError::ProcessFailure { kind, message }),
            Self::MissingOutput { output } => Err(KodanError::MissingOutput {
                kind,
                path: output.display().to_string(),
            }),
            Self::Canceled => Err(KodanError::ProcessFailure {
                kind,
                message: "canceled".to_string(),
            }),
        }
    }
}

/// Notification from a worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Started {
        id: Uuid,
    },
    Progress {
        id: Uuid,
        position: usize,
        kind: JobKind,
        percent: u8,
    },
    Finished {
        id: Uuid,
        position: usize,
        kind: JobKind,
        outcome: JobOutcome,
    },
}

/// Spawns job processes and reports on them.
pub struct JobRunner {
    tx: Sender<RunnerEvent>,
    parser: Arc<ProgressParser>,
}

impl JobRunner {
    /// Create a runner and the receiving end of its event channel.
    pub fn new() -> Result<(Self, Receiver<RunnerEvent>)> {
        let (tx, rx) = unbounded();
        let runner = Self {
            tx,
            parser: Arc::new(ProgressParser::new()?),
        };
        Ok((runner, rx))
    }

    /// Start `spec` on a worker thread. Exactly one `Finished` event follows.
    pub fn spawn(&self, id: Uuid, spec: JobSpec, cancel: JobCancel) -> Result<()> {
        let tx = self.tx.clone();
        let parser = Arc::clone(&self.parser);
        thread::Builder::new()
            .name(format!("kodan-{}-{}", spec.kind, spec.position))
            .spawn(move || {
                let outcome = run_job(id, &spec, &cancel, &parser, &tx);
                info!(
                    job = %id,
                    position = spec.position,
                    kind = %spec.kind,
                    state = ?outcome.state(),
                    "Job finished"
                );
                let _ = tx.send(RunnerEvent::Finished {
                    id,
                    position: spec.position,
                    kind: spec.kind,
                    outcome,
                });
            })?;
        Ok(())
    }
}

fn run_job(
    id: Uuid,
    spec: &JobSpec,
    cancel: &JobCancel,
    parser: &Arc<ProgressParser>,
    tx: &Sender<RunnerEvent>,
) -> JobOutcome {
    if cancel.is_cancelled() {
        return JobOutcome::Canceled;
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %spec.program.display(), error = %e, "Failed to start tool");
            return JobOutcome::Failed {
                message: format!("failed to start {}: {}", spec.program.display(), e),
            };
        }
    };
    info!(
        job = %id,
        position = spec.position,
        kind = %spec.kind,
        pid = child.id(),
        "Job started"
    );
    let _ = tx.send(RunnerEvent::Started { id });

    let stdout_tail = Arc::new(Mutex::new(OutputTail::new(TAIL_LINES)));
    let stderr_tail = Arc::new(Mutex::new(OutputTail::new(TAIL_LINES)));
    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .zip([Arc::clone(&stdout_tail), Arc::clone(&stderr_tail)])
    .filter_map(|(pipe, tail)| Some((pipe?, tail)))
    .map(|(pipe, tail)| spawn_reader(id, spec, pipe, tail, Arc::clone(parser), tx.clone()))
    .collect();

    let status = match wait_or_cancel(&mut child, cancel) {
        Ok(Some(status)) => status,
        // Readers are left to drain: a killed tool's own children may still
        // hold the pipes open.
        Ok(None) => return JobOutcome::Canceled,
        Err(e) => {
            return JobOutcome::Failed {
                message: format!("failed to wait for process: {}", e),
            }
        }
    };

    for reader in readers {
        let _ = reader.join();
    }

    let stderr = stderr_tail.lock();
    debug!(job = %id, stdout = %stdout_tail.lock().text(), "Tool output");
    classify(spec, status.code(), &stderr, spec.output.exists())
}

/// Wait for the child, killing it if `cancel` is raised. `Ok(None)` means
/// canceled.
fn wait_or_cancel(child: &mut Child, cancel: &JobCancel) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if cancel.is_cancelled() {
            info!(pid = child.id(), "Killing canceled job");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(e);
            }
        }
    }
}

fn spawn_reader(
    id: Uuid,
    spec: &JobSpec,
    pipe: Box<dyn Read + Send>,
    tail: Arc<Mutex<OutputTail>>,
    parser: Arc<ProgressParser>,
    tx: Sender<RunnerEvent>,
) -> JoinHandle<()> {
    let (position, kind) = (spec.position, spec.kind);
    thread::spawn(move || {
        let mut last = None;
        let result = for_each_line(BufReader::new(pipe), |line| {
            tail.lock().mark_seen();
            match parser.parse(line) {
                Some(percent) if last != Some(percent) => {
                    last = Some(percent);
                    let _ = tx.send(RunnerEvent::Progress {
                        id,
                        position,
                        kind,
                        percent,
                    });
                }
                Some(_) => {}
                None => tail.lock().push(line),
            }
        });
        if let Err(e) = result {
            debug!(job = %id, error = %e, "Output stream closed with error");
        }
    })
}

/// Decide the outcome of a finished process.
///
/// `exit_code` is `None` when the process was ended by a signal.
pub fn classify(spec: &JobSpec, exit_code: Option<i32>, stderr: &OutputTail, output_exists: bool) -> JobOutcome {
    let exited_ok = match spec.policy {
        SuccessPolicy::StderrSentinel(sentinel) if stderr.seen_any() => {
            stderr.text().trim().ends_with(sentinel)
        }
        _ => exit_code == Some(0),
    };

    if !exited_ok {
        let tail = stderr.summary(MAX_MESSAGE_CHARS);
        let message = if !tail.is_empty() {
            tail
        } else {
            match exit_code {
                Some(code) => format!("exited with code {}", code),
                None => "terminated by signal".to_string(),
            }
        };
        return JobOutcome::Failed { message };
    }

    if output_exists {
        JobOutcome::Succeeded {
            output: spec.output.clone(),
        }
    } else {
        JobOutcome::MissingOutput {
            output: spec.output.clone(),
        }
    }
}
