//! Clip assembly trigger.
//!
//! A clip for position `p` becomes eligible once `Images/<p>.png` and
//! `Voicelines/<p>.mp3` both exist. Eligibility is judged from file
//! existence alone, so the trigger cannot tell a stale clip from a fresh
//! one; the cause of the evaluation decides instead.

use kodan_project::SceneArtifacts;
use std::collections::BTreeSet;
use tracing::debug;

use crate::registry::JobState;

/// Why the trigger is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCause {
    /// An image, voice or caption job just succeeded: the clip is stale.
    InputsChanged,
    /// Scenes were inserted, deleted or reordered: only a missing clip
    /// needs building.
    LayoutChanged,
}

/// What the trigger decided for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Submit a clip job now.
    Submit,
    /// A clip job is in flight; another will be submitted when it ends.
    RebuildQueued,
    /// A clip job is in flight and its inputs are unchanged.
    AlreadyRunning,
    /// Image or voice line is missing.
    NotReady,
    /// The clip exists and its inputs have not changed.
    UpToDate,
}

/// Decides when clip assembly runs and remembers rebuilds requested while
/// a clip job was busy.
#[derive(Debug, Default)]
pub struct PipelineTrigger {
    pending_rebuild: BTreeSet<usize>,
}

impl PipelineTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate position `artifacts.position`.
    ///
    /// `clip_state` is the registry state of the position's clip job.
    pub fn evaluate(
        &mut self,
        cause: TriggerCause,
        artifacts: &SceneArtifacts,
        clip_state: Option<JobState>,
    ) -> TriggerDecision {
        let position = artifacts.position;
        let decision = if !artifacts.has_clip_inputs() {
            TriggerDecision::NotReady
        } else if clip_state.is_some_and(JobState::is_active) {
            match cause {
                TriggerCause::InputsChanged => {
                    self.pending_rebuild.insert(position);
                    TriggerDecision::RebuildQueued
                }
                TriggerCause::LayoutChanged => TriggerDecision::AlreadyRunning,
            }
        } else {
            match cause {
                TriggerCause::InputsChanged => TriggerDecision::Submit,
                TriggerCause::LayoutChanged if artifacts.clip => TriggerDecision::UpToDate,
                TriggerCause::LayoutChanged => TriggerDecision::Submit,
            }
        };
        debug!(position, ?cause, ?decision, "Clip trigger evaluated");
        decision
    }

    /// Take the rebuild request for `position`, if one was queued.
    pub fn take_pending(&mut self, position: usize) -> bool {
        self.pending_rebuild.remove(&position)
    }

    /// Forget every queued rebuild.
    pub fn clear(&mut self) {
        self.pending_rebuild.clear();
    }
}
