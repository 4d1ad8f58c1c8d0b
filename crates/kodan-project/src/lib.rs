//! Kodan Project - Document model and on-disk layout
//!
//! A project is a JSON document (`project.kodan`) plus per-scene files named
//! by scene position:
//! - `Images/<p>.png` and `Images/<p>_raw.png`
//! - `Voicelines/<p>.mp3`
//! - `Clips/<p>.mp4`
//!
//! `ProjectStore` owns the document; `FileLayout` keeps the file stores in
//! step with scene positions.

pub mod handle;
pub mod layout;
pub mod project;
pub mod renumber;
pub mod serialization;
pub mod store;
pub mod workspace;

pub use handle::ProjectHandle;
pub use layout::{FileLayout, InsertAt, RenumberReport, SceneArtifacts, StoreKind};
pub use project::{CaptionSettings, Project, Scene, ScenePatch};
pub use store::ProjectStore;
pub use workspace::{ProjectSummary, Workspace};
