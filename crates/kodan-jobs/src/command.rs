//! Tool invocation contract.
//!
//! Each job kind runs its configured tool with positional arguments in a
//! fixed order:
//!
//! | kind    | arguments |
//! |---------|-----------|
//! | image   | `<output.png> <aspectRatio> <prompt> <negativePrompt> <width> <height> <baseModel>` |
//! | voice   | `<text> <output.mp3> <maxLength> <speakerWav> <language>` |
//! | caption | `<raw.png> <output.png> <caption> <fontSize> <captionColor> <strokeColor> <strokeSize> <font> <weight>` |
//! | clip    | `<projectRoot> <position>` |
//! | render  | `<projectRoot> <output.mp4>` |

use kodan_core::{JobKind, KodanError, Result, PROJECT_POSITION};
use kodan_project::{FileLayout, Scene, StoreKind};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;

/// Last words the caption tool writes to stderr when it succeeds.
pub const CAPTION_SUCCESS_SENTINEL: &str = "caption generated successfully";

/// Caption overlay defaults for unset settings.
pub mod caption_defaults {
    pub const FONT_SIZE: f32 = 16.0;
    pub const COLOR: &str = "#FFE600";
    pub const STROKE_COLOR: &str = "#000000";
    pub const STROKE_SIZE: f32 = 1.5;
    pub const FONT: &str = "Arial";
    pub const WEIGHT: &str = "400";
}

/// How a finished process is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Exit code 0 plus the output file.
    ExitCode,
    /// If stderr is non-empty, success iff the trimmed stderr ends with the
    /// sentinel; otherwise the exit code decides.
    StderrSentinel(&'static str),
}

/// A fully resolved process invocation for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub position: usize,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// File the job must leave behind.
    pub output: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub policy: SuccessPolicy,
}

impl JobSpec {
    fn build(config: &PipelineConfig, kind: JobKind, position: usize, output: PathBuf, job_args: Vec<String>) -> Self {
        let tool = config.tool(kind);
        let mut args = tool.args.clone();
        args.extend(job_args);
        Self {
            kind,
            position,
            program: tool.program.clone(),
            args,
            output,
            working_dir: config.working_dir.clone(),
            policy: match kind {
                JobKind::Caption => SuccessPolicy::StderrSentinel(CAPTION_SUCCESS_SENTINEL),
                _ => SuccessPolicy::ExitCode,
            },
        }
    }

    /// Image generation from the scene's prompts.
    pub fn image(
        config: &PipelineConfig,
        layout: &FileLayout,
        position: usize,
        scene: &Scene,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(KodanError::InvalidParameter(format!(
                "image size must be non-zero, got {}x{}",
                width, height
            )));
        }
        let prompt = non_blank(scene.positive_prompt.as_deref()).ok_or_else(|| {
            KodanError::InvalidParameter(format!("scene {} has no prompt", position))
        })?;
        let base_model = non_blank(scene.base_model.as_deref()).unwrap_or(config.default_base_model.as_str());
        let output = layout.path_for(StoreKind::Image, position);
        let aspect_ratio = f64::from(width) / f64::from(height);

        let args = vec![
            path_arg(&output),
            aspect_ratio.to_string(),
            prompt.to_string(),
            scene.negative_prompt.clone().unwrap_or_default(),
            width.to_string(),
            height.to_string(),
            base_model.to_string(),
        ];
        Ok(Self::build(config, JobKind::Image, position, output, args))
    }

    /// Voice line synthesis from the scene's text and speaker.
    pub fn voice(config: &PipelineConfig, layout: &FileLayout, position: usize, scene: &Scene) -> Result<Self> {
        let text = non_blank(scene.voiceline.as_deref()).ok_or_else(|| {
            KodanError::InvalidParameter(format!("scene {} has no voice line text", position))
        })?;
        let output = layout.path_for(StoreKind::Voiceline, position);

        let args = vec![
            text.to_string(),
            path_arg(&output),
            config.max_voice_length.to_string(),
            path_arg(&config.speaker_wav(scene.speaker.as_deref())),
            config.language.clone(),
        ];
        Ok(Self::build(config, JobKind::Voice, position, output, args))
    }

    /// Caption overlay drawn from the raw image onto the scene image.
    pub fn caption(config: &PipelineConfig, layout: &FileLayout, position: usize, scene: &Scene) -> Self {
        let settings = scene.caption_settings.clone().unwrap_or_default();
        let output = layout.path_for(StoreKind::Image, position);

        let args = vec![
            path_arg(&layout.path_for(StoreKind::CaptionSource, position)),
            path_arg(&output),
            settings.caption.unwrap_or_default(),
            format_number(settings.font_size.unwrap_or(caption_defaults::FONT_SIZE)),
            settings
                .caption_color
                .unwrap_or_else(|| caption_defaults::COLOR.to_string()),
            settings
                .stroke_color
                .unwrap_or_else(|| caption_defaults::STROKE_COLOR.to_string()),
            format_number(settings.stroke_size.unwrap_or(caption_defaults::STROKE_SIZE)),
            settings
                .selected_font
                .unwrap_or_else(|| caption_defaults::FONT.to_string()),
            settings
                .selected_weight
                .unwrap_or_else(|| caption_defaults::WEIGHT.to_string()),
        ];
        Self::build(config, JobKind::Caption, position, output, args)
    }

    /// Clip assembly for one scene.
    pub fn clip(config: &PipelineConfig, layout: &FileLayout, position: usize) -> Self {
        let output = layout.path_for(StoreKind::Clip, position);
        let args = vec![path_arg(layout.root()), position.to_string()];
        Self::build(config, JobKind::Clip, position, output, args)
    }

    /// Whole-project render into `output`.
    pub fn render(config: &PipelineConfig, layout: &FileLayout, output: &Path) -> Self {
        let args = vec![path_arg(layout.root()), path_arg(output)];
        Self::build(config, JobKind::Render, PROJECT_POSITION, output.to_path_buf(), args)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `16.0` -> `"16"`, `1.5` -> `"1.5"`.
fn format_number(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
