//! Generation parameters, as the user submits them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Backend limit on the full prompt.
pub const MAX_PROMPT_CHARS: usize = 5000;
/// Backend limit on the user's supplementary prompt.
pub const MAX_USER_PROMPT_CHARS: usize = 2000;

/// Kind of generation job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Virtual try-on: a model photo plus a garment photo.
    #[default]
    Tryon,
    /// Model generation from a description.
    Model,
    /// Product detail page from a product photo.
    Detail,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tryon => "tryon",
            Self::Model => "model",
            Self::Detail => "detail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tryon" | "try-on" => Some(Self::Tryon),
            "model" => Some(Self::Model),
            "detail" => Some(Self::Detail),
            _ => None,
        }
    }

    /// Minimum reference images this mode needs.
    pub fn required_reference_images(self) -> usize {
        match self {
            Self::Tryon => 2,
            Self::Detail => 1,
            Self::Model => 0,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    pub aspect_ratio: String,
    pub resolution: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selected_configs: BTreeMap<String, Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::new(TaskType::default())
    }
}

impl GenerationParams {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            prompt: None,
            user_prompt: None,
            reference_images: Vec::new(),
            aspect_ratio: "1:1".to_string(),
            resolution: "1K".to_string(),
            selected_configs: BTreeMap::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_reference_image(mut self, url: impl Into<String>) -> Self {
        self.reference_images.push(url.into());
        self
    }

    /// Check the inputs this mode needs are present. Nothing is submitted
    /// for parameters that fail here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reference_images.iter().any(|u| u.trim().is_empty()) {
            return Err(ValidationError::EmptyReferenceImage);
        }
        let required = self.task_type.required_reference_images();
        if self.reference_images.len() < required {
            return Err(ValidationError::MissingReferenceImages {
                task_type: self.task_type,
                required,
                got: self.reference_images.len(),
            });
        }
        if self.task_type == TaskType::Model
            && is_blank(&self.prompt)
            && is_blank(&self.user_prompt)
            && self.selected_configs.is_empty()
        {
            return Err(ValidationError::MissingPrompt(self.task_type));
        }
        check_len("prompt", &self.prompt, MAX_PROMPT_CHARS)?;
        check_len("user_prompt", &self.user_prompt, MAX_USER_PROMPT_CHARS)?;
        Ok(())
    }
}

fn is_blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).unwrap_or("").is_empty()
}

fn check_len(field: &'static str, s: &Option<String>, max: usize) -> Result<(), ValidationError> {
    match s {
        Some(s) if s.chars().count() > max => Err(ValidationError::TooLong {
            field,
            max,
            len: s.chars().count(),
        }),
        _ => Ok(()),
    }
}

// ── Selected configs ──────────────────────────────────────────────────────────

/// A value picked in one of the dynamic option groups of the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

/// Convert dynamic option values into the `selected_configs` wire shape:
/// every group maps to a list of option keys. Flags become `"true"` or
/// `"false"`, single values become one-element lists, and empty values
/// are dropped.
pub fn normalize_selected_configs<I, K>(values: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = (K, Option<ConfigValue>)>,
    K: Into<String>,
{
    let mut out = BTreeMap::new();
    for (key, value) in values {
        let options = match value {
            None => continue,
            Some(ConfigValue::Flag(b)) => vec![b.to_string()],
            Some(ConfigValue::One(s)) if s.is_empty() => continue,
            Some(ConfigValue::One(s)) => vec![s],
            Some(ConfigValue::Many(v)) => v,
        };
        out.insert(key.into(), options);
    }
    out
}
