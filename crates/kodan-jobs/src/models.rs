//! Model catalog: which base models and LoRA modules are installed.
//!
//! Models are never downloaded here; presence is only checked where it
//! decides whether an image job may run.

use kodan_core::{KodanError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base models the image tool accepts.
pub const SUPPORTED_BASE_MODELS: [&str; 2] = ["sd1.5", "sdxl"];

/// Extension assumed for model files named without one.
const MODEL_EXTENSION: &str = "safetensors";

/// A catalog directory under `Models/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Base,
    Lora,
}

impl ModelKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Base => "Base-Models",
            Self::Lora => "LoRA",
        }
    }
}

/// Reject base models the image tool cannot load.
pub fn check_base_model(name: &str) -> Result<()> {
    if SUPPORTED_BASE_MODELS.contains(&name) {
        Ok(())
    } else {
        Err(KodanError::InvalidParameter(format!(
            "unsupported base model {:?} (expected one of {})",
            name,
            SUPPORTED_BASE_MODELS.join(", ")
        )))
    }
}

/// Installed models in a workspace `Models/` directory.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models_dir: PathBuf,
}

impl ModelCatalog {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Directory holding models of `kind`.
    pub fn dir(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.dir_name())
    }

    /// Path a model would have (may not exist).
    pub fn model_path(&self, kind: ModelKind, name: &str) -> PathBuf {
        let path = self.dir(kind).join(name);
        if path.extension().is_some() {
            path
        } else {
            path.with_extension(MODEL_EXTENSION)
        }
    }

    /// Check if a model file is present, by exact name or with the default
    /// extension.
    pub fn is_installed(&self, kind: ModelKind, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return false;
        }
        self.dir(kind).join(name).is_file() || self.model_path(kind, name).is_file()
    }

    /// Installed model file names of `kind`, sorted.
    pub fn list(&self, kind: ModelKind) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.dir(kind)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Check the model selection of an image job.
    pub fn check_image_models(&self, base_model: &str, lora: Option<&str>) -> Result<()> {
        check_base_model(base_model)?;
        match lora.map(str::trim).filter(|l| !l.is_empty()) {
            Some(lora) if !self.is_installed(ModelKind::Lora, lora) => {
                Err(KodanError::ModelNotInstalled(format!(
                    "LoRA {:?} is not in {}",
                    lora,
                    self.dir(ModelKind::Lora).display()
                )))
            }
            Some(lora) => {
                debug!(lora, base_model, "LoRA available");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
