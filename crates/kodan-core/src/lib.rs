//! Kodan Core - Foundation types for the scene pipeline
//!
//! This crate provides the types shared by every Kodan crate:
//! - The error taxonomy (`KodanError`)
//! - Job kinds
//! - Scene position helpers

pub mod error;
pub mod job;

pub use error::{KodanError, Result};
pub use job::JobKind;

/// Project document file name inside a project root.
pub const PROJECT_FILE_NAME: &str = "project.kodan";

/// Position that project-wide jobs (see [`JobKind::is_project_wide`]) are
/// keyed and reported under. Scene positions start at 1.
pub const PROJECT_POSITION: usize = 0;

/// Check that a 1-based scene position addresses one of `scene_count` scenes.
pub fn check_position(position: usize, scene_count: usize) -> Result<()> {
    if position == 0 || position > scene_count {
        return Err(KodanError::SceneNotFound {
            position,
            scene_count,
        });
    }
    Ok(())
}
