//! Job kinds shared by the project store and the job runner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The artifact a generation job produces.
///
/// Every kind but `Render` produces a file for one scene; `Render` produces
/// the finished video for the whole project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Still image from a diffusion model.
    Image,
    /// Synthesized voice line.
    Voice,
    /// Caption burned into the scene image.
    Caption,
    /// Video clip assembled from image and voice line.
    Clip,
    /// All scenes concatenated into one video.
    Render,
}

impl JobKind {
    /// All job kinds, in pipeline order.
    pub const ALL: [JobKind; 5] = [
        Self::Image,
        Self::Voice,
        Self::Caption,
        Self::Clip,
        Self::Render,
    ];

    /// Lowercase name used in logs and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Caption => "caption",
            Self::Clip => "clip",
            Self::Render => "render",
        }
    }

    /// Whether a successful run of this kind changes the inputs of clip assembly.
    pub fn feeds_clip(self) -> bool {
        matches!(self, Self::Image | Self::Voice | Self::Caption)
    }

    /// Whether jobs of this kind work on the whole project rather than one
    /// scene. They are keyed by [`crate::PROJECT_POSITION`].
    pub fn is_project_wide(self) -> bool {
        matches!(self, Self::Render)
    }

    /// Whether jobs of the two kinds may not run at once for the same scene.
    ///
    /// Image and caption jobs both write `Images/<p>.png`.
    pub fn conflicts_with(self, other: JobKind) -> bool {
        self == other
            || matches!(
                (self, other),
                (Self::Image, Self::Caption) | (Self::Caption, Self::Image)
            )
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = crate::KodanError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "voice" | "voiceline" => Ok(Self::Voice),
            "caption" => Ok(Self::Caption),
            "clip" => Ok(Self::Clip),
            "render" => Ok(Self::Render),
            other => Err(crate::KodanError::InvalidParameter(format!(
                "unknown job kind: {other}"
            ))),
        }
    }
}
