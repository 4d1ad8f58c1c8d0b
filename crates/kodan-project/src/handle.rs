//! Project handle: the root directory every project operation works against.

use kodan_core::{KodanError, Result, PROJECT_FILE_NAME};
use std::path::{Path, PathBuf};

use crate::layout::FileLayout;

/// Identifies a project by its root directory.
///
/// The root holds `project.kodan` and the per-scene stores (`Images/`,
/// `Voicelines/`, `Clips/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectHandle {
    root: PathBuf,
}

impl ProjectHandle {
    /// Create a handle for a project root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a handle from a user-supplied path: either the project root or
    /// its `project.kodan` document.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let root = if path.is_dir() {
            path.to_path_buf()
        } else if path.file_name().is_some_and(|n| n == PROJECT_FILE_NAME) {
            path.parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| KodanError::NotFound(path.display().to_string()))?
        } else {
            return Err(KodanError::NotFound(format!(
                "{} is neither a project directory nor a {} file",
                path.display(),
                PROJECT_FILE_NAME
            )));
        };
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the project document.
    pub fn document_path(&self) -> PathBuf {
        self.root.join(PROJECT_FILE_NAME)
    }

    /// Path of the project-level thumbnail shown in project lists.
    pub fn thumbnail_path(&self) -> PathBuf {
        self.root.join("thumbnail.png")
    }

    /// File layout for this project's per-scene stores.
    pub fn layout(&self) -> FileLayout {
        FileLayout::new(&self.root)
    }
}
