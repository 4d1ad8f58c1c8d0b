//! File layout manager.
//!
//! Maps `(store, position)` to a path and keeps the per-scene stores in
//! step with the scene list when scenes are inserted, deleted or reordered.
//! Every structural operation renames files first, then edits the in-memory
//! project; persisting the document is left to the caller.

use kodan_core::{check_position, KodanError, Result};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::project::{Project, Scene};
use crate::renumber::{plan_moves, Slot};

// ── Stores ──────────────────────────────────────────────────────

/// One per-scene file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// `Images/<p>.png`, the image shown for the scene (captioned if any).
    Image,
    /// `Images/<p>_raw.png`, the clean image captions are drawn onto.
    CaptionSource,
    /// `Voicelines/<p>.mp3`
    Voiceline,
    /// `Clips/<p>.mp4`
    Clip,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Image,
        StoreKind::CaptionSource,
        StoreKind::Voiceline,
        StoreKind::Clip,
    ];

    /// Directory under the project root.
    pub fn dir_name(self) -> &'static str {
        match self {
            StoreKind::Image | StoreKind::CaptionSource => "Images",
            StoreKind::Voiceline => "Voicelines",
            StoreKind::Clip => "Clips",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            StoreKind::Image => ".png",
            StoreKind::CaptionSource => "_raw.png",
            StoreKind::Voiceline => ".mp3",
            StoreKind::Clip => ".mp4",
        }
    }

    /// File name for a position.
    pub fn file_name(self, position: usize) -> String {
        format!("{}{}", position, self.suffix())
    }

    fn staging_name(self) -> String {
        format!(".staging{}", self.suffix())
    }

    /// Position named by a file in this store, if the name belongs to it.
    pub fn parse_position(self, file_name: &str) -> Option<usize> {
        let stem = file_name.strip_suffix(self.suffix())?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok().filter(|&p| p > 0)
    }
}

// ── Structural edits ────────────────────────────────────────────

/// Where a new scene goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// After the last scene.
    End,
    /// Before the scene currently at this position (`n + 1` appends).
    Position(usize),
}

impl InsertAt {
    /// Positions whose files move when inserting into `scene_count` scenes.
    pub fn affected_positions(self, scene_count: usize) -> Vec<usize> {
        match self {
            InsertAt::End => Vec::new(),
            InsertAt::Position(p) => (p.max(1)..=scene_count).collect(),
        }
    }
}

/// Positions whose files change when deleting `position`.
pub fn affected_by_delete(position: usize, scene_count: usize) -> Vec<usize> {
    (position..=scene_count).collect()
}

/// Positions whose files change under `new_order`.
pub fn affected_by_reorder(new_order: &[usize]) -> Vec<usize> {
    let mut positions: Vec<usize> = new_order
        .iter()
        .enumerate()
        .filter(|&(i, &old)| old != i + 1)
        .map(|(_, &old)| old)
        .collect();
    positions.sort_unstable();
    positions
}

/// Check that `new_order` is a permutation of `1..=scene_count`.
pub fn validate_order(new_order: &[usize], scene_count: usize) -> Result<()> {
    if new_order.len() != scene_count {
        return Err(KodanError::InvalidParameter(format!(
            "order lists {} scenes, project has {}",
            new_order.len(),
            scene_count
        )));
    }
    let mut seen = vec![false; scene_count];
    for &old in new_order {
        if old == 0 || old > scene_count || std::mem::replace(&mut seen[old - 1], true) {
            return Err(KodanError::InvalidParameter(format!(
                "order {:?} is not a permutation of 1..={}",
                new_order, scene_count
            )));
        }
    }
    Ok(())
}

/// A file that could not be renamed or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// What a structural edit did to the stores.
///
/// Per-file failures do not abort the edit; they are collected here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberReport {
    pub renamed: usize,
    pub removed: usize,
    pub failures: Vec<FileFailure>,
}

impl RenumberReport {
    /// True if every file operation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, error: impl ToString) {
        let error = error.to_string();
        warn!(path = %path.display(), error = %error, "File operation failed during renumbering");
        self.failures.push(FileFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Which artifacts exist for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneArtifacts {
    pub position: usize,
    pub image: bool,
    pub caption_source: bool,
    pub voiceline: bool,
    pub clip: bool,
}

impl SceneArtifacts {
    /// Image and voice line are both present.
    pub fn has_clip_inputs(&self) -> bool {
        self.image && self.voiceline
    }
}

// ── Layout ──────────────────────────────────────────────────────

/// Path mapping and renumbering for one project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    root: PathBuf,
}

impl FileLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a store.
    pub fn store_dir(&self, kind: StoreKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Path of the file a store keeps for `position`. No I/O.
    pub fn path_for(&self, kind: StoreKind, position: usize) -> PathBuf {
        self.store_dir(kind).join(kind.file_name(position))
    }

    fn slot_path(&self, kind: StoreKind, slot: Slot) -> PathBuf {
        match slot {
            Slot::Position(p) => self.path_for(kind, p),
            Slot::Staging => self.store_dir(kind).join(kind.staging_name()),
        }
    }

    /// Create every store directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for kind in StoreKind::ALL {
            fs::create_dir_all(self.store_dir(kind))?;
        }
        Ok(())
    }

    /// Point every scene's thumbnail at the image for its position.
    pub fn refresh_thumbnails(&self, project: &mut Project) {
        for (i, scene) in project.scenes.iter_mut().enumerate() {
            scene.thumbnail = self
                .path_for(StoreKind::Image, i + 1)
                .to_string_lossy()
                .into_owned();
        }
    }

    /// Insert a new empty scene and return its position.
    ///
    /// Inserting before an existing scene shifts the files of that scene and
    /// every later one up by one position.
    pub fn insert_scene(&self, project: &mut Project, at: InsertAt) -> Result<(usize, RenumberReport)> {
        let scene_count = project.scene_count();
        let position = match at {
            InsertAt::End => scene_count + 1,
            InsertAt::Position(p) => {
                check_position(p, scene_count + 1)?;
                p
            }
        };

        let mut report = RenumberReport::default();
        let mapping: Vec<(usize, usize)> = (position..=scene_count).map(|p| (p, p + 1)).collect();
        self.apply_moves(&mapping, &mut report);

        project.scenes.insert(position - 1, Scene::new());
        self.finish(project, &mut report);

        info!(
            position,
            scenes = project.scene_count(),
            renamed = report.renamed,
            "Scene inserted"
        );
        Ok((position, report))
    }

    /// Remove the scene at `position`, delete its files and shift later
    /// scenes down by one.
    pub fn delete_scene(&self, project: &mut Project, position: usize) -> Result<RenumberReport> {
        let scene_count = project.scene_count();
        check_position(position, scene_count)?;

        let mut report = RenumberReport::default();
        for kind in StoreKind::ALL {
            remove_file(&self.path_for(kind, position), &mut report);
        }

        project.scenes.remove(position - 1);
        let mapping: Vec<(usize, usize)> = (position + 1..=scene_count).map(|p| (p, p - 1)).collect();
        self.apply_moves(&mapping, &mut report);
        self.finish(project, &mut report);

        info!(
            position,
            scenes = project.scene_count(),
            renamed = report.renamed,
            removed = report.removed,
            failures = report.failures.len(),
            "Scene deleted"
        );
        Ok(report)
    }

    /// Reorder scenes: `new_order[i]` is the old position of the scene that
    /// ends up at position `i + 1`.
    pub fn reorder(&self, project: &mut Project, new_order: &[usize]) -> Result<RenumberReport> {
        validate_order(new_order, project.scene_count())?;

        let mut report = RenumberReport::default();
        let mapping: Vec<(usize, usize)> = new_order
            .iter()
            .enumerate()
            .map(|(i, &old)| (old, i + 1))
            .collect();
        self.apply_moves(&mapping, &mut report);

        project.scenes = new_order
            .iter()
            .map(|&old| project.scenes[old - 1].clone())
            .collect();
        self.finish(project, &mut report);

        info!(order = ?new_order, renamed = report.renamed, "Scenes reordered");
        Ok(report)
    }

    /// Remove files for positions beyond `scene_count`, and stray staging
    /// files.
    pub fn sweep_orphans(&self, scene_count: usize, report: &mut RenumberReport) {
        for kind in StoreKind::ALL {
            remove_file(&self.slot_path(kind, Slot::Staging), report);
            let present = match self.positions_present(kind) {
                Ok(present) => present,
                Err(e) => {
                    report.fail(&self.store_dir(kind), e);
                    continue;
                }
            };
            for p in present.range(scene_count + 1..) {
                debug!(kind = ?kind, position = p, "Removing orphan");
                remove_file(&self.path_for(kind, *p), report);
            }
        }
    }

    /// Artifact presence for positions `1..=scene_count`, from directory
    /// listings.
    pub fn scan(&self, scene_count: usize) -> Result<Vec<SceneArtifacts>> {
        let image = self.positions_present(StoreKind::Image)?;
        let raw = self.positions_present(StoreKind::CaptionSource)?;
        let voice = self.positions_present(StoreKind::Voiceline)?;
        let clip = self.positions_present(StoreKind::Clip)?;

        Ok((1..=scene_count)
            .map(|p| SceneArtifacts {
                position: p,
                image: image.contains(&p),
                caption_source: raw.contains(&p),
                voiceline: voice.contains(&p),
                clip: clip.contains(&p),
            })
            .collect())
    }

    /// Artifact presence for a single position.
    pub fn artifacts(&self, position: usize) -> SceneArtifacts {
        let exists = |kind| self.path_for(kind, position).is_file();
        SceneArtifacts {
            position,
            image: exists(StoreKind::Image),
            caption_source: exists(StoreKind::CaptionSource),
            voiceline: exists(StoreKind::Voiceline),
            clip: exists(StoreKind::Clip),
        }
    }

    /// Positions that have a file in a store.
    pub fn positions_present(&self, kind: StoreKind) -> Result<BTreeSet<usize>> {
        let entries = match fs::read_dir(self.store_dir(kind)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut present = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if let Some(p) = entry.file_name().to_str().and_then(|n| kind.parse_position(n)) {
                present.insert(p);
            }
        }
        Ok(present)
    }

    fn finish(&self, project: &mut Project, report: &mut RenumberReport) {
        self.sweep_orphans(project.scene_count(), report);
        self.refresh_thumbnails(project);
    }

    fn apply_moves(&self, mapping: &[(usize, usize)], report: &mut RenumberReport) {
        let steps = plan_moves(mapping);
        if steps.is_empty() {
            return;
        }

        for kind in StoreKind::ALL {
            // Slots still holding a file that failed to move out.
            let mut blocked: HashSet<Slot> = HashSet::new();
            for step in &steps {
                let from = self.slot_path(kind, step.from);
                let to = self.slot_path(kind, step.to);

                if blocked.contains(&step.to) {
                    if from.exists() {
                        report.fail(&from, format!("target {} is still occupied", to.display()));
                        blocked.insert(step.from);
                    }
                    continue;
                }
                if step.to == Slot::Staging {
                    remove_file(&to, report);
                }

                match fs::rename(&from, &to) {
                    Ok(()) => {
                        debug!(from = %from.display(), to = %to.display(), "Renamed");
                        report.renamed += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        report.fail(&from, e);
                        blocked.insert(step.from);
                    }
                }
            }
        }
    }
}

fn remove_file(path: &Path, report: &mut RenumberReport) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed");
            report.removed += 1;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => report.fail(path, e),
    }
}
