//! The scene pipeline: project edits, job submission and the clip trigger.
//!
//! `Pipeline` is driven from one thread. Jobs run on worker threads and
//! report back over a channel; nothing they say takes effect until the
//! caller pumps events with [`Pipeline::poll`], [`Pipeline::next_event`] or
//! [`Pipeline::run_until_idle`]. Follow-up work (captions after images,
//! clips after inputs change) is submitted while pumping.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use kodan_core::{JobKind, KodanError, Result, PROJECT_POSITION};
use kodan_project::layout::{affected_by_delete, affected_by_reorder, validate_order};
use kodan_project::{
    CaptionSettings, FileLayout, InsertAt, Project, ProjectHandle, ProjectStore, Scene,
    SceneArtifacts, ScenePatch, StoreKind,
};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::JobSpec;
use crate::config::PipelineConfig;
use crate::models::{check_base_model, ModelCatalog};
use crate::registry::{JobKey, JobRegistry, JobState};
use crate::runner::{JobOutcome, JobRunner, RunnerEvent};
use crate::trigger::{PipelineTrigger, TriggerCause, TriggerDecision};

/// Notification delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Progress {
        position: usize,
        kind: JobKind,
        percent: u8,
    },
    Finished {
        position: usize,
        kind: JobKind,
        success: bool,
        message: String,
        output: Option<PathBuf>,
    },
}

/// Orchestrates one open project.
pub struct Pipeline {
    config: PipelineConfig,
    store: ProjectStore,
    layout: FileLayout,
    models: Option<ModelCatalog>,
    registry: JobRegistry,
    trigger: PipelineTrigger,
    runner: JobRunner,
    runner_events: Receiver<RunnerEvent>,
    pending: VecDeque<PipelineEvent>,
    /// Caption jobs submitted because an image finished.
    auto_captions: HashSet<Uuid>,
}

impl Pipeline {
    /// Open the project at `handle`. Fails if its document cannot be read.
    pub fn open(handle: ProjectHandle, config: PipelineConfig) -> Result<Self> {
        let store = ProjectStore::new(handle.clone());
        let project = store.load()?;
        let layout = handle.layout();
        layout.ensure_dirs()?;
        let (runner, runner_events) = JobRunner::new()?;
        let models = config.models_dir.clone().map(ModelCatalog::new);

        info!(
            root = %handle.root().display(),
            name = %project.name,
            scenes = project.scene_count(),
            "Project opened"
        );
        Ok(Self {
            config,
            store,
            layout,
            models,
            registry: JobRegistry::new(),
            trigger: PipelineTrigger::new(),
            runner,
            runner_events,
            pending: VecDeque::new(),
            auto_captions: HashSet::new(),
        })
    }

    pub fn handle(&self) -> &ProjectHandle {
        self.store.handle()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Current project document.
    pub fn project(&self) -> Result<Project> {
        self.store.load()
    }

    /// Artifact presence for every scene.
    pub fn scan(&self) -> Result<Vec<SceneArtifacts>> {
        let project = self.store.load()?;
        self.layout.scan(project.scene_count())
    }

    // ── Scene edits ─────────────────────────────────────────────

    /// Insert a scene and return its position.
    pub fn add_scene(&mut self, at: InsertAt) -> Result<usize> {
        let scene_count = self.store.load()?.scene_count();
        if let InsertAt::Position(position) = at {
            kodan_core::check_position(position, scene_count + 1)?;
        }
        self.ensure_idle_at(&at.affected_positions(scene_count))?;

        let layout = &self.layout;
        let (position, report) = self.store.update(|project| layout.insert_scene(project, at))?;
        if !report.is_clean() {
            warn!(failures = report.failures.len(), "Scene inserted with file errors");
        }
        self.evaluate_all(TriggerCause::LayoutChanged)?;
        Ok(position)
    }

    /// Delete the scene at `position`, renumbering later scenes.
    pub fn delete_scene(&mut self, position: usize) -> Result<()> {
        let scene_count = self.store.load()?.scene_count();
        kodan_core::check_position(position, scene_count)?;
        self.ensure_idle_at(&affected_by_delete(position, scene_count))?;

        let layout = &self.layout;
        let report = self.store.update(|project| layout.delete_scene(project, position))?;
        if !report.is_clean() {
            warn!(position, failures = report.failures.len(), "Scene deleted with file errors");
        }
        self.evaluate_all(TriggerCause::LayoutChanged)
    }

    /// Reorder scenes: `new_order[i]` is the old position of the scene that
    /// moves to position `i + 1`.
    pub fn reorder_scenes(&mut self, new_order: &[usize]) -> Result<()> {
        let scene_count = self.store.load()?.scene_count();
        validate_order(new_order, scene_count)?;
        self.ensure_idle_at(&affected_by_reorder(new_order))?;

        let layout = &self.layout;
        let report = self.store.update(|project| layout.reorder(project, new_order))?;
        if !report.is_clean() {
            warn!(failures = report.failures.len(), "Scenes reordered with file errors");
        }
        self.evaluate_all(TriggerCause::LayoutChanged)
    }

    /// Shallow-merge `patch` into a scene.
    pub fn update_scene(&mut self, position: usize, patch: ScenePatch) -> Result<Scene> {
        self.store.update_scene(position, patch)
    }

    fn ensure_idle_at(&self, positions: &[usize]) -> Result<()> {
        let busy = self.registry.in_flight_at(positions);
        if busy.is_empty() {
            Ok(())
        } else {
            Err(KodanError::JobsInFlight { positions: busy })
        }
    }

    // ── Jobs ────────────────────────────────────────────────────

    /// Generate the scene image at `width` x `height`.
    pub fn generate_image(&mut self, position: usize, width: u32, height: u32) -> Result<Uuid> {
        let scene = self.scene(position)?;
        let models = self.models.clone();
        self.launch(position, JobKind::Image, |config, layout| {
            let base_model = scene
                .base_model
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(config.default_base_model.as_str());
            match &models {
                Some(catalog) => catalog.check_image_models(base_model, scene.selected_lora.as_deref())?,
                None => check_base_model(base_model)?,
            }
            JobSpec::image(config, layout, position, &scene, width, height)
        })
    }

    /// Synthesize the scene's voice line.
    pub fn generate_voice(&mut self, position: usize) -> Result<Uuid> {
        let scene = self.scene(position)?;
        self.launch(position, JobKind::Voice, |config, layout| {
            JobSpec::voice(config, layout, position, &scene)
        })
    }

    /// Redraw the scene caption, first merging `settings` into the scene.
    pub fn update_caption(&mut self, position: usize, settings: Option<CaptionSettings>) -> Result<Uuid> {
        self.registry.check_free(position, JobKind::Caption)?;
        if let Some(settings) = settings {
            self.store.update_scene_with(position, |scene| {
                scene
                    .caption_settings
                    .get_or_insert_with(Default::default)
                    .merge(settings)
            })?;
        }
        let scene = self.scene(position)?;
        self.launch_caption(position, &scene)
    }

    /// Assemble the scene clip from its image and voice line.
    pub fn assemble_clip(&mut self, position: usize) -> Result<Uuid> {
        self.scene(position)?;
        self.launch(position, JobKind::Clip, |config, layout| {
            let artifacts = layout.artifacts(position);
            if !artifacts.has_clip_inputs() {
                return Err(KodanError::NotFound(format!(
                    "scene {} needs both an image and a voice line before its clip can be assembled",
                    position
                )));
            }
            Ok(JobSpec::clip(config, layout, position))
        })
    }

    /// Render every scene clip, in order, into one video.
    ///
    /// If `dest` is a directory the video is written there as `output.mp4`;
    /// otherwise `dest` gets an `.mp4` extension. Refused while any scene
    /// job is active, and no scene job starts until the render ends.
    pub fn render_project(&mut self, dest: &Path) -> Result<Uuid> {
        let target = if dest.is_dir() {
            dest.join("output.mp4")
        } else {
            dest.with_extension("mp4")
        };
        let scene_count = self.store.load()?.scene_count();
        self.launch(PROJECT_POSITION, JobKind::Render, |config, layout| {
            let clips: Vec<usize> = layout
                .positions_present(StoreKind::Clip)?
                .into_iter()
                .filter(|&p| p <= scene_count)
                .collect();
            if clips.is_empty() {
                return Err(KodanError::NotFound(
                    "project has no scene clips to render".to_string(),
                ));
            }
            if clips.len() < scene_count {
                warn!(
                    scenes = scene_count,
                    clips = clips.len(),
                    "Rendering without clips for some scenes"
                );
            }
            Ok(JobSpec::render(config, layout, &target))
        })
    }

    /// Cancel the active job for `(position, kind)`. Returns false if there
    /// was none. The job's files are left as they are, and the job keeps
    /// blocking its key until its process has exited.
    pub fn cancel(&mut self, position: usize, kind: JobKind) -> bool {
        let canceled = self.registry.cancel(position, kind);
        if canceled {
            info!(position, kind = %kind, "Job cancel requested");
        }
        canceled
    }

    /// State of the job for `(position, kind)`, if one is registered.
    pub fn status_of(&self, position: usize, kind: JobKind) -> Option<JobState> {
        self.registry.status_of(position, kind)
    }

    /// Keys and states of every queued or running job.
    pub fn active_jobs(&self) -> Vec<(JobKey, JobState)> {
        self.registry.active().into_iter().map(|j| (j.key, j.state)).collect()
    }

    /// True when no job is waiting to report and no event is undelivered.
    pub fn is_idle(&self) -> bool {
        self.registry.is_idle() && self.pending.is_empty()
    }

    fn scene(&self, position: usize) -> Result<Scene> {
        let project = self.store.load()?;
        project
            .scene(position)
            .cloned()
            .ok_or(KodanError::SceneNotFound {
                position,
                scene_count: project.scene_count(),
            })
    }

    fn launch_caption(&mut self, position: usize, scene: &Scene) -> Result<Uuid> {
        self.launch(position, JobKind::Caption, |config, layout| {
            let image = layout.path_for(StoreKind::Image, position);
            if !image.is_file() {
                return Err(KodanError::NotFound(format!(
                    "scene {} has no image to caption",
                    position
                )));
            }
            let raw = layout.path_for(StoreKind::CaptionSource, position);
            if !raw.is_file() {
                fs::copy(&image, &raw)?;
                debug!(position, "Saved clean image for captioning");
            }
            Ok(JobSpec::caption(config, layout, position, scene))
        })
    }

    fn launch(
        &mut self,
        position: usize,
        kind: JobKind,
        prepare: impl FnOnce(&PipelineConfig, &FileLayout) -> Result<JobSpec>,
    ) -> Result<Uuid> {
        let (config, layout) = (&self.config, &self.layout);
        let (job, spec) = self
            .registry
            .submit(position, kind, || prepare(config, layout))?;

        if let Err(e) = self.runner.spawn(job.id, spec, job.cancel.clone()) {
            self.registry.finish(job.id, JobState::Failed);
            return Err(e);
        }
        info!(job = %job.id, position, kind = %kind, "Job submitted");
        Ok(job.id)
    }

    // ── Events ──────────────────────────────────────────────────

    /// Apply every notification that has arrived and return the resulting
    /// events without blocking.
    pub fn poll(&mut self) -> Vec<PipelineEvent> {
        while let Ok(event) = self.runner_events.try_recv() {
            self.apply_event(event);
        }
        self.pending.drain(..).collect()
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_event(&mut self, timeout: Duration) -> Option<PipelineEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.runner_events.recv_timeout(remaining) {
                Ok(event) => self.apply_event(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Pump events until every job, including follow-ups, has finished or
    /// `timeout` passes. Returns the events seen.
    pub fn run_until_idle(&mut self, timeout: Duration) -> Vec<PipelineEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while !self.is_idle() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(active = self.registry.active().len(), "Timed out waiting for jobs");
                break;
            }
            if let Some(event) = self.next_event(remaining) {
                events.push(event);
            }
        }
        events
    }

    fn apply_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::Started { id } => {
                self.registry.mark_running(id);
            }
            RunnerEvent::Progress {
                id,
                position,
                kind,
                percent,
            } => {
                if self.registry.get(id).is_some_and(|j| j.state.is_live()) {
                    self.pending.push_back(PipelineEvent::Progress {
                        position,
                        kind,
                        percent,
                    });
                }
            }
            RunnerEvent::Finished {
                id,
                position,
                kind,
                outcome,
            } => self.finish(id, position, kind, outcome),
        }
    }

    fn finish(&mut self, id: Uuid, position: usize, kind: JobKind, outcome: JobOutcome) {
        let Some(job) = self.registry.finish(id, outcome.state()) else {
            debug!(job = %id, position, kind = %kind, "Ignoring stale job notification");
            return;
        };
        let auto_caption = self.auto_captions.remove(&id);

        let (success, message, output) = if job.state == JobState::Canceled {
            (false, "canceled".to_string(), None)
        } else {
            match outcome.into_result(kind) {
                Ok(output) => (true, format!("{} ready", kind), Some(output)),
                Err(e) => (false, e.to_string(), None),
            }
        };
        if success {
            info!(position, kind = %kind, "Job succeeded");
        } else {
            warn!(position, kind = %kind, message = %message, "Job did not succeed");
        }
        self.pending.push_back(PipelineEvent::Finished {
            position,
            kind,
            success,
            message,
            output,
        });

        if success {
            self.after_success(position, kind);
        } else if auto_caption && job.state != JobState::Canceled {
            // The image itself is new even if the caption failed.
            self.run_trigger(position, TriggerCause::InputsChanged);
        }

        if kind == JobKind::Clip && self.trigger.take_pending(position) {
            debug!(position, "Running queued clip rebuild");
            self.run_trigger(position, TriggerCause::InputsChanged);
        }
    }

    fn after_success(&mut self, position: usize, kind: JobKind) {
        match kind {
            JobKind::Image => {
                let image = self.layout.path_for(StoreKind::Image, position);
                let raw = self.layout.path_for(StoreKind::CaptionSource, position);
                if let Err(e) = fs::copy(&image, &raw) {
                    warn!(position, error = %e, "Could not save clean image copy");
                }

                match self.scene(position) {
                    Ok(scene) if scene.caption_text().is_some() => {
                        match self.launch_caption(position, &scene) {
                            Ok(id) => {
                                self.auto_captions.insert(id);
                            }
                            Err(e) => {
                                warn!(position, error = %e, "Could not caption new image");
                                self.run_trigger(position, TriggerCause::InputsChanged);
                            }
                        }
                    }
                    Ok(_) => self.run_trigger(position, TriggerCause::InputsChanged),
                    Err(e) => warn!(position, error = %e, "Scene vanished after image job"),
                }
            }
            kind if kind.feeds_clip() => self.run_trigger(position, TriggerCause::InputsChanged),
            _ => {}
        }
    }

    /// Evaluate the clip trigger for one position and submit if eligible.
    fn run_trigger(&mut self, position: usize, cause: TriggerCause) {
        let artifacts = self.layout.artifacts(position);
        self.apply_trigger(&artifacts, cause);
    }

    fn evaluate_all(&mut self, cause: TriggerCause) -> Result<()> {
        for artifacts in self.scan()? {
            self.apply_trigger(&artifacts, cause);
        }
        Ok(())
    }

    fn apply_trigger(&mut self, artifacts: &SceneArtifacts, cause: TriggerCause) {
        let position = artifacts.position;
        let clip_state = self.registry.status_of(position, JobKind::Clip);
        if self.trigger.evaluate(cause, artifacts, clip_state) != TriggerDecision::Submit {
            return;
        }
        if let Err(e) = self.assemble_clip(position) {
            warn!(position, error = %e, "Could not submit clip job");
        }
    }

    // ── Export & voices ─────────────────────────────────────────

    /// Copy the scene's clip, or its image if there is no clip, to `dest`.
    ///
    /// The copy keeps the source's extension. If `dest` is a directory the
    /// file is named after the position.
    pub fn export_scene(&self, position: usize, dest: &Path) -> Result<PathBuf> {
        self.scene(position)?;
        let source = [StoreKind::Clip, StoreKind::Image]
            .into_iter()
            .map(|kind| self.layout.path_for(kind, position))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                KodanError::NotFound(format!("scene {} has neither a clip nor an image", position))
            })?;
        let extension = source.extension().unwrap_or_default().to_owned();

        let target = if dest.is_dir() {
            dest.join(position.to_string()).with_extension(&extension)
        } else {
            dest.with_extension(&extension)
        };
        fs::copy(&source, &target)?;
        info!(position, from = %source.display(), to = %target.display(), "Scene exported");
        Ok(target)
    }

    /// Speaker samples available to voice jobs.
    pub fn list_voices(&self) -> Result<Vec<String>> {
        self.config.list_voices()
    }

    /// Cancel every active job and drop queued clip rebuilds.
    pub fn shutdown(&mut self) {
        self.trigger.clear();
        let canceled = self.registry.cancel_all();
        if canceled > 0 {
            info!(canceled, "Canceled running jobs");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
