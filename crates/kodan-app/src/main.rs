//! Kodan - scene pipeline for narrated videos
//!
//! Command-line entry point: edits projects and runs generation jobs,
//! waiting for each job (and any clip it triggers) before exiting.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use kodan_core::JobKind;
use kodan_jobs::{ModelCatalog, ModelKind, Pipeline, PipelineConfig, PipelineEvent};
use kodan_project::{CaptionSettings, InsertAt, ProjectHandle, ScenePatch, Workspace};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kodan")]
#[command(about = "Build narrated videos scene by scene")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline config (JSON). Defaults to the user config file if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Python virtualenv the tools run in
    #[arg(long, global = true)]
    venv: Option<PathBuf>,

    /// Seconds to wait for jobs before giving up
    #[arg(long, global = true, default_value = "3600")]
    timeout: u64,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project in a workspace
    New {
        /// Workspace directory (holds Projects/ and Models/)
        #[arg(short, long)]
        workspace: PathBuf,

        /// Project name
        name: String,

        /// Folder name under Projects/ (defaults to the name)
        #[arg(long)]
        folder: Option<String>,

        #[arg(long, default_value = "1024")]
        width: u32,

        #[arg(long, default_value = "576")]
        height: u32,
    },

    /// List projects in a workspace, most recently edited first
    List {
        #[arg(short, long)]
        workspace: PathBuf,
    },

    /// Show scenes and which of their files exist
    Status {
        /// Project directory or project.kodan file
        project: PathBuf,
    },

    /// Insert an empty scene
    AddScene {
        project: PathBuf,

        /// Insert before this position (appends when omitted)
        #[arg(long)]
        at: Option<usize>,
    },

    /// Delete a scene and its files
    DeleteScene { project: PathBuf, position: usize },

    /// Reorder scenes: the i-th value is the old position of the scene that
    /// becomes scene i
    Reorder {
        project: PathBuf,
        #[arg(required = true)]
        order: Vec<usize>,
    },

    /// Edit scene fields
    Set {
        project: PathBuf,
        position: usize,
        #[command(flatten)]
        fields: SceneFields,
    },

    /// Generate the scene image
    Image {
        project: PathBuf,
        position: usize,

        #[arg(long, default_value = "1024")]
        width: u32,

        #[arg(long, default_value = "576")]
        height: u32,
    },

    /// Synthesize the scene voice line
    Voice { project: PathBuf, position: usize },

    /// Draw the caption onto the scene image
    Caption {
        project: PathBuf,
        position: usize,
        #[command(flatten)]
        style: CaptionFields,
    },

    /// Assemble the scene clip
    Clip { project: PathBuf, position: usize },

    /// Copy the scene clip (or image) out of the project
    Export {
        project: PathBuf,
        position: usize,
        dest: PathBuf,
    },

    /// Render every scene clip into one video
    Render {
        project: PathBuf,

        /// Output file, or a directory to write output.mp4 into
        dest: PathBuf,
    },

    /// List speaker voices
    Voices,

    /// Add a .wav speaker sample to the voices directory
    AddVoice { sample: PathBuf },

    /// List installed base models and LoRA modules
    Models {
        /// Workspace directory (defaults to the configured models directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SceneFields {
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    voiceline: Option<String>,
    #[arg(long)]
    speaker: Option<String>,
    #[arg(long)]
    base_model: Option<String>,
    #[arg(long)]
    lora: Option<String>,
    #[arg(long)]
    caption: Option<String>,
}

#[derive(Args)]
struct CaptionFields {
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    font_size: Option<f32>,
    /// Fill color, #RRGGBB
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    stroke_color: Option<String>,
    #[arg(long)]
    stroke_size: Option<f32>,
    #[arg(long)]
    font: Option<String>,
    #[arg(long)]
    weight: Option<String>,
}

impl CaptionFields {
    fn into_settings(self) -> Option<CaptionSettings> {
        let settings = CaptionSettings {
            caption: self.text,
            font_size: self.font_size,
            caption_color: self.color,
            stroke_color: self.stroke_color,
            stroke_size: self.stroke_size,
            selected_font: self.font,
            selected_weight: self.weight,
        };
        (settings != CaptionSettings::default()).then_some(settings)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load pipeline config")?;
    if let Some(venv) = &cli.venv {
        config = config.with_venv(venv);
    }
    debug!(?config, "Pipeline config");
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::New {
            workspace,
            name,
            folder,
            width,
            height,
        } => {
            let workspace = Workspace::new(workspace);
            let folder = folder.unwrap_or_else(|| name.clone());
            let handle = workspace.create_project(&name, &folder, width, height)?;
            println!("{}", handle.root().display());
            Ok(())
        }
        Commands::List { workspace } => list_command(&Workspace::new(workspace)),
        Commands::Status { project } => status_command(&open(&project, config)?),
        Commands::AddScene { project, at } => {
            let mut pipeline = open(&project, config)?;
            let at = at.map_or(InsertAt::End, InsertAt::Position);
            let position = pipeline.add_scene(at)?;
            println!("Added scene {}", position);
            wait(&mut pipeline, timeout)
        }
        Commands::DeleteScene { project, position } => {
            let mut pipeline = open(&project, config)?;
            pipeline.delete_scene(position)?;
            println!("Deleted scene {}", position);
            wait(&mut pipeline, timeout)
        }
        Commands::Reorder { project, order } => {
            let mut pipeline = open(&project, config)?;
            pipeline.reorder_scenes(&order)?;
            wait(&mut pipeline, timeout)
        }
        Commands::Set {
            project,
            position,
            fields,
        } => {
            let mut pipeline = open(&project, config)?;
            // Keep the caption style when only the text changes.
            let caption_settings = match fields.caption {
                Some(caption) => {
                    let mut settings = pipeline
                        .project()?
                        .scene(position)
                        .and_then(|s| s.caption_settings.clone())
                        .unwrap_or_default();
                    settings.caption = Some(caption);
                    Some(settings)
                }
                None => None,
            };
            let patch = ScenePatch {
                positive_prompt: fields.prompt,
                negative_prompt: fields.negative_prompt,
                voiceline: fields.voiceline,
                speaker: fields.speaker,
                base_model: fields.base_model,
                selected_lora: fields.lora,
                caption_settings,
            };
            if patch.is_empty() {
                bail!("Nothing to set");
            }
            pipeline.update_scene(position, patch)?;
            Ok(())
        }
        Commands::Image {
            project,
            position,
            width,
            height,
        } => {
            let mut pipeline = open(&project, config)?;
            pipeline.generate_image(position, width, height)?;
            wait(&mut pipeline, timeout)
        }
        Commands::Voice { project, position } => {
            let mut pipeline = open(&project, config)?;
            pipeline.generate_voice(position)?;
            wait(&mut pipeline, timeout)
        }
        Commands::Caption {
            project,
            position,
            style,
        } => {
            let mut pipeline = open(&project, config)?;
            pipeline.update_caption(position, style.into_settings())?;
            wait(&mut pipeline, timeout)
        }
        Commands::Clip { project, position } => {
            let mut pipeline = open(&project, config)?;
            pipeline.assemble_clip(position)?;
            wait(&mut pipeline, timeout)
        }
        Commands::Export {
            project,
            position,
            dest,
        } => {
            let pipeline = open(&project, config)?;
            let target = pipeline.export_scene(position, &dest)?;
            println!("{}", target.display());
            Ok(())
        }
        Commands::Render { project, dest } => {
            let mut pipeline = open(&project, config)?;
            pipeline.render_project(&dest)?;
            wait(&mut pipeline, timeout)
        }
        Commands::Voices => {
            for voice in config.list_voices()? {
                println!("{}", voice);
            }
            Ok(())
        }
        Commands::AddVoice { sample } => {
            let name = config.add_voice(&sample)?;
            println!("Added voice {}", name);
            Ok(())
        }
        Commands::Models { workspace } => {
            let models_dir = match (workspace, config.models_dir.clone()) {
                (Some(workspace), _) => Workspace::new(workspace).models_dir(),
                (None, Some(dir)) => dir,
                (None, None) => bail!("No models directory: pass --workspace or set models_dir"),
            };
            models_command(&ModelCatalog::new(models_dir))
        }
    }
}

fn open(path: &Path, config: PipelineConfig) -> Result<Pipeline> {
    let handle = ProjectHandle::resolve(path)
        .with_context(|| format!("No project at {}", path.display()))?;
    Ok(Pipeline::open(handle, config)?)
}

/// Pump pipeline events until every job has finished, then fail if any did.
fn wait(pipeline: &mut Pipeline, timeout: Duration) -> Result<()> {
    let mut failures = 0;
    for event in pipeline.run_until_idle(timeout) {
        match event {
            PipelineEvent::Progress {
                position,
                kind,
                percent,
            } => println!("scene {:>3}  {:<7} {:>3}%", position, kind, percent),
            PipelineEvent::Finished {
                position,
                kind,
                success,
                message,
                output,
            } => {
                let status = if success { "done" } else { "FAILED" };
                let scope = if kind == JobKind::Render {
                    "project  ".to_string()
                } else {
                    format!("scene {:>3}", position)
                };
                match output {
                    Some(path) => println!("{}  {:<7} {}  {}", scope, kind, status, path.display()),
                    None => println!("{}  {:<7} {}  {}", scope, kind, status, message),
                }
                if !success {
                    failures += 1;
                }
            }
        }
    }

    let still_running = pipeline.active_jobs();
    if !still_running.is_empty() {
        pipeline.shutdown();
        bail!("Timed out with {} job(s) still running", still_running.len());
    }
    if failures > 0 {
        bail!("{} job(s) failed", failures);
    }
    info!("All jobs finished");
    Ok(())
}

fn list_command(workspace: &Workspace) -> Result<()> {
    let projects = workspace.list_projects()?;
    if projects.is_empty() {
        println!("No projects in {}", workspace.projects_dir().display());
    }
    for summary in projects {
        println!(
            "{:<24} {:>3} scenes  {}",
            summary.name,
            summary.scene_count,
            summary.handle.root().display()
        );
    }
    Ok(())
}

fn models_command(catalog: &ModelCatalog) -> Result<()> {
    for (label, kind) in [("base", ModelKind::Base), ("lora", ModelKind::Lora)] {
        for name in catalog.list(kind)? {
            println!("{:<5} {}", label, name);
        }
    }
    Ok(())
}

fn status_command(pipeline: &Pipeline) -> Result<()> {
    let project = pipeline.project()?;
    println!("{} ({} scenes)", project.name, project.scene_count());

    let mark = |present: bool| if present { "x" } else { "-" };
    for artifacts in pipeline.scan()? {
        let position = artifacts.position;
        let prompt = project
            .scene(position)
            .and_then(|s| s.positive_prompt.as_deref())
            .unwrap_or("");
        println!(
            "{:>3}  image {}  voice {}  clip {}  {}",
            position,
            mark(artifacts.image),
            mark(artifacts.voiceline),
            mark(artifacts.clip),
            prompt
        );
    }
    Ok(())
}
