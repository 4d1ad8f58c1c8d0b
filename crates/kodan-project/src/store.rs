//! Project store: the only writer of the project document.
//!
//! Every mutation is a load-modify-save cycle performed while holding the
//! store's write lock, so no save is ever observed half-applied and no two
//! cycles interleave within one process. Separate processes (or separate
//! stores for the same root) are last-writer-wins on the whole document.

use kodan_core::{KodanError, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::handle::ProjectHandle;
use crate::project::{Project, Scene, ScenePatch};
use crate::serialization;

/// Loads, saves and patches a project's document.
pub struct ProjectStore {
    handle: ProjectHandle,
    write_lock: Mutex<()>,
}

impl ProjectStore {
    /// Create a store for the project at `handle`.
    pub fn new(handle: ProjectHandle) -> Self {
        Self {
            handle,
            write_lock: Mutex::new(()),
        }
    }

    /// The project this store manages.
    pub fn handle(&self) -> &ProjectHandle {
        &self.handle
    }

    /// Load the current document.
    pub fn load(&self) -> Result<Project> {
        serialization::load_from_file(&self.handle.document_path())
    }

    /// Overwrite the document with `project`.
    pub fn save(&self, project: &Project) -> Result<()> {
        let _guard = self.write_lock.lock();
        serialization::save_to_file(&self.handle.document_path(), project)
    }

    /// Run a load-modify-save cycle under the write lock.
    ///
    /// If `f` fails nothing is written. Scene thumbnails are recomputed from
    /// position before saving.
    pub fn update<T>(&self, f: impl FnOnce(&mut Project) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let path = self.handle.document_path();
        let mut project = serialization::load_from_file(&path)?;
        let out = f(&mut project)?;
        self.handle.layout().refresh_thumbnails(&mut project);
        serialization::save_to_file(&path, &project)?;
        Ok(out)
    }

    /// Shallow-merge `patch` into the scene at `position` and save.
    ///
    /// Returns the updated scene.
    pub fn update_scene(&self, position: usize, patch: ScenePatch) -> Result<Scene> {
        debug!(position, ?patch, "Updating scene");
        self.update_scene_with(position, |scene| {
            scene.apply(patch);
            scene.clone()
        })
    }

    /// Apply an arbitrary edit to the scene at `position` and save.
    pub fn update_scene_with<T>(&self, position: usize, f: impl FnOnce(&mut Scene) -> T) -> Result<T> {
        self.update(|project| {
            let scene_count = project.scene_count();
            let scene = project
                .scene_mut(position)
                .ok_or(KodanError::SceneNotFound {
                    position,
                    scene_count,
                })?;
            Ok(f(scene))
        })
    }
}
