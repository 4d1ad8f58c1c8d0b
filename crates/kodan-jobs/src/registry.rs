//! Job registry: the per-(position, kind) state machine.
//!
//! At most one job per key is active, and kinds that write the same file
//! (see [`JobKind::conflicts_with`]) never run together on one scene. A
//! project-wide job excludes every scene job. Jobs carry a unique id so a
//! terminal notification from an old process can never overwrite the state
//! of a newer job for the same key.

use kodan_core::{JobKind, KodanError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::debug;
use uuid::Uuid;

use crate::runner::JobCancel;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    /// Cancel requested; the process has not reported back yet.
    Canceling,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Holds its key: queued, running, or canceled but not yet exited.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Canceling)
    }

    /// Queued or running, with no cancel requested.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// Scene position and job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub position: usize,
    pub kind: JobKind,
}

impl JobKey {
    pub fn new(position: usize, kind: JobKind) -> Self {
        Self { position, kind }
    }
}

/// One submitted job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub key: JobKey,
    pub state: JobState,
    pub submitted_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub cancel: JobCancel,
}

/// Tracks every job that has not yet been reported finished.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobKey, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job for `(position, kind)`.
    ///
    /// `prepare` runs only once the conflict checks have passed; if it fails
    /// nothing is registered.
    pub fn submit<T>(
        &mut self,
        position: usize,
        kind: JobKind,
        prepare: impl FnOnce() -> Result<T>,
    ) -> Result<(Job, T)> {
        self.check_free(position, kind)?;

        let key = JobKey::new(position, kind);
        let prepared = prepare()?;
        let job = Job {
            id: Uuid::new_v4(),
            key,
            state: JobState::Queued,
            submitted_at: SystemTime::now(),
            started_at: None,
            cancel: JobCancel::new(),
        };
        if let Some(previous) = self.jobs.insert(key, job.clone()) {
            debug!(position, kind = %kind, previous = %previous.id, "Replacing finished job entry");
        }
        Ok((job, prepared))
    }

    /// Fail if a job for `(position, kind)` could not be submitted now.
    pub fn check_free(&self, position: usize, kind: JobKind) -> Result<()> {
        let active = || self.jobs.values().filter(|j| j.state.is_active());

        if let Some(job) = active().find(|j| j.key.kind.is_project_wide()) {
            return Err(if kind.is_project_wide() {
                KodanError::DuplicateJob {
                    position: job.key.position,
                    kind: job.key.kind,
                }
            } else {
                KodanError::JobsInFlight {
                    positions: vec![position],
                }
            });
        }
        if kind.is_project_wide() {
            let busy = self.in_flight_at(&self.positions());
            if !busy.is_empty() {
                return Err(KodanError::JobsInFlight { positions: busy });
            }
            return Ok(());
        }
        match self.conflicting(position, kind) {
            Some(held) => Err(KodanError::DuplicateJob { position, kind: held }),
            None => Ok(()),
        }
    }

    /// Kind of the active job at `position` that conflicts with `kind`.
    pub fn conflicting(&self, position: usize, kind: JobKind) -> Option<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|k| k.conflicts_with(kind))
            .find(|&k| self.status_of(position, k).is_some_and(JobState::is_active))
    }

    fn positions(&self) -> Vec<usize> {
        self.jobs.keys().map(|k| k.position).collect()
    }

    /// Current state of the job for `(position, kind)`, if any.
    pub fn status_of(&self, position: usize, kind: JobKind) -> Option<JobState> {
        self.jobs.get(&JobKey::new(position, kind)).map(|j| j.state)
    }

    /// Job with the given id, if still registered.
    pub fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.values().find(|j| j.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.values_mut().find(|j| j.id == id)
    }

    /// Move a queued job to running. Returns false for unknown or stale ids.
    pub fn mark_running(&mut self, id: Uuid) -> bool {
        match self.get_mut(id) {
            Some(job) if job.state == JobState::Queued => {
                job.state = JobState::Running;
                job.started_at = Some(SystemTime::now());
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of the job for `(position, kind)`.
    ///
    /// The process is signalled and the job moves to `Canceling`. It keeps
    /// its key until the process reports back through [`finish`](Self::finish),
    /// so nothing new can write the same files meanwhile. Returns false if
    /// there was nothing to cancel.
    pub fn cancel(&mut self, position: usize, kind: JobKind) -> bool {
        match self.jobs.get_mut(&JobKey::new(position, kind)) {
            Some(job) if job.state.is_live() => {
                job.cancel.cancel();
                job.state = JobState::Canceling;
                true
            }
            _ => false,
        }
    }

    /// Cancel every queued or running job. Returns how many were signalled.
    pub fn cancel_all(&mut self) -> usize {
        let mut count = 0;
        for job in self.jobs.values_mut().filter(|j| j.state.is_live()) {
            job.cancel.cancel();
            job.state = JobState::Canceling;
            count += 1;
        }
        count
    }

    /// Apply a terminal state and remove the job.
    ///
    /// Matches on id: returns `None` if the job was already replaced or
    /// removed. A job canceled by request ends `Canceled` whatever the
    /// process reported.
    pub fn finish(&mut self, id: Uuid, state: JobState) -> Option<Job> {
        let key = self.get(id)?.key;
        let mut job = self.jobs.remove(&key)?;
        job.state = if job.state == JobState::Canceling {
            JobState::Canceled
        } else {
            state
        };
        Some(job)
    }

    /// Positions among `positions` that an active job may write to.
    ///
    /// A project-wide job counts as writing everywhere.
    pub fn in_flight_at(&self, positions: &[usize]) -> Vec<usize> {
        let active = || self.jobs.values().filter(|j| j.state.is_active());
        let mut busy: Vec<usize> = if active().any(|j| j.key.kind.is_project_wide()) {
            positions.to_vec()
        } else {
            active()
                .map(|j| j.key.position)
                .filter(|p| positions.contains(p))
                .collect()
        };
        busy.sort_unstable();
        busy.dedup();
        busy
    }

    /// Active jobs, ordered by key.
    pub fn active(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().filter(|j| j.state.is_active()).collect();
        jobs.sort_by_key(|j| j.key);
        jobs
    }

    /// True when no job awaits a terminal notification.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }
}
