//! Error types for Kodan.

use thiserror::Error;

use crate::job::JobKind;

/// Main error type for Kodan operations.
#[derive(Error, Debug)]
pub enum KodanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A project document or other required file is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The project document is not valid JSON or does not match the schema.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Scene {position} not found (project has {scene_count} scenes)")]
    SceneNotFound { position: usize, scene_count: usize },

    /// A job for the same scene and kind is already queued or running.
    #[error("{kind} job for scene {position} is already queued or running")]
    DuplicateJob { position: usize, kind: JobKind },

    /// Structural edits are refused while jobs write to the affected positions.
    #[error("Jobs are in flight for scenes {positions:?}")]
    JobsInFlight { positions: Vec<usize> },

    #[error("{kind} job failed: {message}")]
    ProcessFailure { kind: JobKind, message: String },

    /// The process exited cleanly but its declared output is absent.
    #[error("{kind} job exited successfully but produced no output at {path}")]
    MissingOutput { kind: JobKind, path: String },

    #[error("Model not installed: {0}")]
    ModelNotInstalled(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for KodanError {
    fn from(e: serde_json::Error) -> Self {
        KodanError::Parse(e.to_string())
    }
}

/// Result type alias for Kodan operations.
pub type Result<T> = std::result::Result<T, KodanError>;
