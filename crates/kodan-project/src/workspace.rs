//! Workspace scaffolding: the folder that holds every project and the
//! model catalogs.
//!
//! ```text
//! <workspace>/
//!   Projects/<folder>/project.kodan
//!   Projects/<folder>/thumbnail.png
//!   Models/Base-Models/
//!   Models/LoRA/
//! ```

use image::{Rgba, RgbaImage};
use kodan_core::{KodanError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::handle::ProjectHandle;
use crate::layout::StoreKind;
use crate::project::{Project, Scene};
use crate::serialization;

/// Background of placeholder images.
pub const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([0xF2, 0xF2, 0xF2, 0xFF]);

/// Scenes a new project starts with.
const INITIAL_SCENES: usize = 2;

/// A project found by [`Workspace::list_projects`].
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub handle: ProjectHandle,
    pub scene_count: usize,
    pub thumbnail: PathBuf,
    pub last_edited: SystemTime,
}

/// A workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("Projects")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("Models")
    }

    pub fn base_models_dir(&self) -> PathBuf {
        self.models_dir().join("Base-Models")
    }

    pub fn lora_dir(&self) -> PathBuf {
        self.models_dir().join("LoRA")
    }

    /// Create a project under `Projects/<folder>`.
    ///
    /// Writes grey placeholder images for the project thumbnail and the first
    /// scene, and a document with two empty scenes.
    pub fn create_project(&self, name: &str, folder: &str, width: u32, height: u32) -> Result<ProjectHandle> {
        if width == 0 || height == 0 {
            return Err(KodanError::InvalidParameter(format!(
                "project size must be non-zero, got {}x{}",
                width, height
            )));
        }
        if folder.is_empty() || folder == "." || folder == ".." || folder.contains(['/', '\\']) {
            return Err(KodanError::InvalidParameter(format!(
                "invalid project folder name: {:?}",
                folder
            )));
        }

        let handle = ProjectHandle::new(self.projects_dir().join(folder));
        if handle.document_path().exists() {
            return Err(KodanError::InvalidParameter(format!(
                "a project already exists in {}",
                handle.root().display()
            )));
        }

        for dir in [handle.root().to_path_buf(), self.base_models_dir(), self.lora_dir()] {
            fs::create_dir_all(dir)?;
        }
        let layout = handle.layout();
        layout.ensure_dirs()?;

        write_placeholder(&handle.thumbnail_path(), width, height)?;
        write_placeholder(&layout.path_for(StoreKind::Image, 1), width, height)?;

        let mut project = Project::new(name);
        project.scenes = (0..INITIAL_SCENES).map(|_| Scene::new()).collect();
        layout.refresh_thumbnails(&mut project);
        serialization::save_to_file(&handle.document_path(), &project)?;

        info!(name, root = %handle.root().display(), width, height, "Project created");
        Ok(handle)
    }

    /// Every project folder that has both a document and a thumbnail.
    ///
    /// Folders whose document cannot be read are skipped with a warning.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let entries = match fs::read_dir(self.projects_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry?;
            let handle = ProjectHandle::new(entry.path());
            let document = handle.document_path();
            let thumbnail = handle.thumbnail_path();
            if !document.is_file() || !thumbnail.is_file() {
                continue;
            }

            let project = match serialization::load_from_file(&document) {
                Ok(project) => project,
                Err(e) => {
                    warn!(path = %document.display(), error = %e, "Skipping unreadable project");
                    continue;
                }
            };
            let last_edited = entry.metadata()?.modified()?;

            projects.push(ProjectSummary {
                name: if project.name.is_empty() {
                    "Unnamed Project".to_string()
                } else {
                    project.name
                },
                scene_count: project.scenes.len(),
                handle,
                thumbnail,
                last_edited,
            });
        }
        projects.sort_by(|a, b| b.last_edited.cmp(&a.last_edited));
        Ok(projects)
    }
}

/// Write a solid grey PNG.
pub fn write_placeholder(path: &Path, width: u32, height: u32) -> Result<()> {
    RgbaImage::from_pixel(width, height, PLACEHOLDER_COLOR)
        .save(path)
        .map_err(|e| KodanError::Io(io::Error::other(format!("{}: {}", path.display(), e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kodan_core::PROJECT_FILE_NAME;

    #[test]
    fn test_create_project_scaffolding() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        let handle = ws.create_project("My Story", "my-story", 64, 36).unwrap();

        assert!(ws.base_models_dir().is_dir());
        assert!(ws.lora_dir().is_dir());
        assert!(handle.root().join("Voicelines").is_dir());
        assert!(handle.root().join("Clips").is_dir());

        let project = serialization::load_from_file(&handle.document_path()).unwrap();
        assert_eq!(project.name, "My Story");
        assert_eq!(project.scenes.len(), 2);
        assert!(project.scenes[1].thumbnail.ends_with("2.png"));

        let img = image::open(handle.root().join("Images").join("1.png"))
            .unwrap()
            .to_rgba8();
        assert_eq!(img.dimensions(), (64, 36));
        assert_eq!(*img.get_pixel(10, 10), PLACEHOLDER_COLOR);
        assert!(handle.thumbnail_path().is_file());
    }

    #[test]
    fn test_create_project_rejects_bad_input() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        assert!(ws.create_project("A", "a", 0, 10).is_err());
        assert!(ws.create_project("A", "../escape", 10, 10).is_err());

        ws.create_project("A", "a", 8, 8).unwrap();
        assert!(matches!(
            ws.create_project("A again", "a", 8, 8),
            Err(KodanError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_list_projects() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        assert!(ws.list_projects().unwrap().is_empty());

        ws.create_project("First", "first", 8, 8).unwrap();
        let second = ws.create_project("Second", "second", 8, 8).unwrap();
        // Without a thumbnail the folder is not listed.
        fs::remove_file(second.thumbnail_path()).unwrap();
        // A broken document is skipped.
        let broken = ws.projects_dir().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(PROJECT_FILE_NAME), "nope").unwrap();
        write_placeholder(&broken.join("thumbnail.png"), 4, 4).unwrap();

        let listed = ws.list_projects().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "First");
        assert_eq!(listed[0].scene_count, 2);
    }
}
