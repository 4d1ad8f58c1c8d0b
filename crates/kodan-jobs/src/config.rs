//! Pipeline configuration: which external tool runs each job kind and the
//! defaults passed to them.

use kodan_core::{JobKind, KodanError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A program plus the arguments that precede the job's own arguments,
/// e.g. `python3 -u run_model.py`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run `script` with an unbuffered Python interpreter.
    pub fn python(interpreter: impl Into<PathBuf>, script: &str) -> Self {
        Self::new(interpreter, ["-u", script])
    }
}

/// Configuration for the scene pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub image: ToolCommand,
    pub voice: ToolCommand,
    pub caption: ToolCommand,
    pub clip: ToolCommand,
    /// Concatenates the scene clips into the finished video.
    pub render: ToolCommand,
    /// Directory the tools are started in (None = inherit).
    pub working_dir: Option<PathBuf>,
    /// Directory of speaker samples (`<name>.wav`).
    pub voices_dir: PathBuf,
    /// Workspace `Models/` directory used to gate image jobs.
    pub models_dir: Option<PathBuf>,
    pub default_speaker: String,
    pub language: String,
    /// Upper bound passed to the voice tool.
    pub max_voice_length: u32,
    pub default_base_model: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let python = Self::find_python();
        Self {
            image: ToolCommand::python(&python, "run_model.py"),
            voice: ToolCommand::python(&python, "voice.py"),
            caption: ToolCommand::python(&python, "generate_caption.py"),
            clip: ToolCommand::python(&python, "renderClip.py"),
            render: ToolCommand::python(&python, "renderProject.py"),
            working_dir: None,
            voices_dir: PathBuf::from("voices"),
            models_dir: None,
            default_speaker: "Narrator".to_string(),
            language: "en".to_string(),
            max_voice_length: 250,
            default_base_model: "sd1.5".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Search PATH for a Python interpreter.
    pub fn find_python() -> PathBuf {
        for name in &["python3", "python"] {
            if which::which(name).is_ok() {
                return PathBuf::from(name);
            }
        }
        PathBuf::from("python3")
    }

    /// Point every tool at the interpreter of a virtualenv.
    pub fn with_venv(mut self, venv: impl AsRef<Path>) -> Self {
        let python = venv.as_ref().join("bin").join("python3");
        for tool in [
            &mut self.image,
            &mut self.voice,
            &mut self.caption,
            &mut self.clip,
            &mut self.render,
        ] {
            tool.program = python.clone();
        }
        self
    }

    /// The tool that runs jobs of `kind`.
    pub fn tool(&self, kind: JobKind) -> &ToolCommand {
        match kind {
            JobKind::Image => &self.image,
            JobKind::Voice => &self.voice,
            JobKind::Caption => &self.caption,
            JobKind::Clip => &self.clip,
            JobKind::Render => &self.render,
        }
    }

    /// Default location: `<config dir>/kodan/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kodan").join("config.json"))
    }

    /// Load a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                KodanError::NotFound(format!("Config file not found: {}", path.display()))
            } else {
                KodanError::Io(e)
            }
        })?;
        let config = serde_json::from_slice(&data)
            .map_err(|e| KodanError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// use defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Speaker sample for `speaker`, falling back to the default speaker.
    pub fn speaker_wav(&self, speaker: Option<&str>) -> PathBuf {
        let name = speaker
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_speaker.as_str());
        self.voices_dir.join(format!("{}.wav", name))
    }

    /// Names of the speaker samples in the voices directory, sorted.
    pub fn list_voices(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.voices_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut voices = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "wav") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    voices.push(stem.to_string());
                }
            }
        }
        voices.sort();
        Ok(voices)
    }

    /// Copy a `.wav` speaker sample into the voices directory and return
    /// the name it is listed under. An existing sample of the same name is
    /// replaced.
    pub fn add_voice(&self, source: &Path) -> Result<String> {
        let name = source
            .extension()
            .filter(|ext| ext.eq_ignore_ascii_case("wav"))
            .and_then(|_| source.file_stem())
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                KodanError::InvalidParameter(format!(
                    "speaker samples must be .wav files: {}",
                    source.display()
                ))
            })?
            .to_string();
        if !source.is_file() {
            return Err(KodanError::NotFound(format!(
                "speaker sample {}",
                source.display()
            )));
        }

        fs::create_dir_all(&self.voices_dir)?;
        let target = self.voices_dir.join(format!("{}.wav", name));
        fs::copy(source, &target)?;
        info!(voice = %name, path = %target.display(), "Speaker sample added");
        Ok(name)
    }
}
