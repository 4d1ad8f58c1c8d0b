//! Project and scene types.
//!
//! A scene has no storage key of its own: its 1-based position in
//! `Project::scenes` names every file that belongs to it.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A project: a name and an ordered list of scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name
    pub name: String,
    /// Scenes in timeline order
    #[serde(default)]
    pub scenes: Vec<Scene>,
    /// Document keys this crate does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Create a new project with no scenes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenes: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Number of scenes.
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Scene at a 1-based position.
    pub fn scene(&self, position: usize) -> Option<&Scene> {
        position.checked_sub(1).and_then(|i| self.scenes.get(i))
    }

    /// Scene at a 1-based position, mutably.
    pub fn scene_mut(&mut self, position: usize) -> Option<&mut Scene> {
        position.checked_sub(1).and_then(move |i| self.scenes.get_mut(i))
    }
}

/// One unit of the project's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// Random identifier, stable across reorders. Display only.
    pub id: u64,
    /// Absolute path of the scene image; recomputed from position.
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Text spoken by the voice line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voiceline: Option<String>,
    /// Speaker sample name (a `.wav` stem in the voices directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_lora: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_settings: Option<CaptionSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    /// Create an empty scene with a fresh random id.
    pub fn new() -> Self {
        Self {
            id: rand::thread_rng().gen_range(0..1_000_000_000),
            thumbnail: String::new(),
            positive_prompt: None,
            negative_prompt: None,
            voiceline: None,
            speaker: None,
            base_model: None,
            selected_lora: None,
            caption_settings: None,
            extra: Map::new(),
        }
    }

    /// Caption text, if the scene has a non-blank one.
    pub fn caption_text(&self) -> Option<&str> {
        self.caption_settings
            .as_ref()
            .and_then(|c| c.caption.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    /// Apply a shallow merge: every field set in `patch` replaces the scene's.
    pub fn apply(&mut self, patch: ScenePatch) {
        if let Some(v) = patch.positive_prompt {
            self.positive_prompt = Some(v);
        }
        if let Some(v) = patch.negative_prompt {
            self.negative_prompt = Some(v);
        }
        if let Some(v) = patch.voiceline {
            self.voiceline = Some(v);
        }
        if let Some(v) = patch.speaker {
            self.speaker = Some(v);
        }
        if let Some(v) = patch.base_model {
            self.base_model = Some(v);
        }
        if let Some(v) = patch.selected_lora {
            self.selected_lora = Some(v);
        }
        if let Some(v) = patch.caption_settings {
            self.caption_settings = Some(v);
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields to overwrite on a scene. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePatch {
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub voiceline: Option<String>,
    pub speaker: Option<String>,
    pub base_model: Option<String>,
    pub selected_lora: Option<String>,
    pub caption_settings: Option<CaptionSettings>,
}

impl ScenePatch {
    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Caption overlay settings for a scene.
///
/// Older documents store numbers as strings and vice versa, so numeric and
/// text fields accept either on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f32",
        skip_serializing_if = "Option::is_none"
    )]
    pub font_size: Option<f32>,
    /// Fill color, `#RRGGBB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f32",
        skip_serializing_if = "Option::is_none"
    )]
    pub stroke_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_font: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_weight: Option<String>,
}

impl CaptionSettings {
    /// Overlay every field set in `other` onto `self`.
    pub fn merge(&mut self, other: CaptionSettings) {
        if other.caption.is_some() {
            self.caption = other.caption;
        }
        if other.font_size.is_some() {
            self.font_size = other.font_size;
        }
        if other.caption_color.is_some() {
            self.caption_color = other.caption_color;
        }
        if other.stroke_color.is_some() {
            self.stroke_color = other.stroke_color;
        }
        if other.stroke_size.is_some() {
            self.stroke_size = other.stroke_size;
        }
        if other.selected_font.is_some() {
            self.selected_font = other.selected_font;
        }
        if other.selected_weight.is_some() {
            self.selected_weight = other.selected_weight;
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n as f32)),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse::<f32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrText::Number(n)) if n.fract() == 0.0 => Some(format!("{}", n as i64)),
        Some(NumberOrText::Number(n)) => Some(n.to_string()),
        Some(NumberOrText::Text(s)) => Some(s),
    })
}
