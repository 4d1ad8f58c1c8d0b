//! Kodan Jobs - Generation jobs and the scene pipeline
//!
//! Every artifact is produced by an external tool run as a child process:
//! - `JobSpec`: command-line contract of the image, voice, caption and clip tools
//! - `JobRunner`: runs one process per job, parses progress, classifies outcomes
//! - `JobRegistry`: at most one active job per scene position and kind
//! - `PipelineTrigger`: decides when a clip is (re)assembled
//! - `Pipeline`: ties the above to a project's store and file layout

pub mod command;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod trigger;

pub use command::{JobSpec, SuccessPolicy};
pub use config::{PipelineConfig, ToolCommand};
pub use models::{ModelCatalog, ModelKind};
pub use pipeline::{Pipeline, PipelineEvent};
pub use registry::{JobKey, JobRegistry, JobState};
pub use runner::{JobCancel, JobOutcome, JobRunner, RunnerEvent};
pub use trigger::{PipelineTrigger, TriggerCause, TriggerDecision};
