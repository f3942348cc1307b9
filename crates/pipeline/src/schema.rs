use std::time::Duration;

use modelreg::ModelDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant. Answer in Markdown.";

/// Generation settings forwarded to the runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default = "defaults::temperature")]
    pub temperature: f32,
    #[serde(default = "defaults::top_p")]
    pub top_p: f32,
    #[serde(default = "defaults::seed")]
    pub seed: i64,
    /// Requested context window, runtime-side name `num_ctx`.
    #[serde(rename = "num_ctx", default = "defaults::context_size")]
    pub context_size: u32,
}

mod defaults {
    pub fn temperature() -> f32 {
        0.7
    }
    pub fn top_p() -> f32 {
        0.95
    }
    pub fn seed() -> i64 {
        42
    }
    pub fn context_size() -> u32 {
        4096
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: defaults::temperature(),
            top_p: defaults::top_p(),
            seed: defaults::seed(),
            context_size: defaults::context_size(),
        }
    }
}

/// One generation request as it travels through the before-phase.
///
/// Before-modules receive it by value and hand back a possibly modified
/// copy. A module that composes its own prompt (e.g. retrieval-augmented
/// context) sets `derived_prompt`, which then overrides the plain
/// `user_message` + `source_code` concatenation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptData {
    pub model: ModelDescriptor,
    pub user_message: String,
    pub source_code: String,
    pub system_message: String,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub derived_prompt: Option<String>,
    /// Open extension point for module enrichments (token counts,
    /// retrieval sources, complexity scores, ...).
    #[serde(default)]
    pub annotations: Map<String, JsonValue>,
}

impl PromptData {
    pub fn new(
        model: ModelDescriptor,
        user_message: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            model,
            user_message: user_message.into(),
            source_code: source_code.into(),
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            options: GenerationOptions::default(),
            timeout: None,
            derived_prompt: None,
            annotations: Map::new(),
        }
    }

    /// The text actually sent to the runtime.
    pub fn final_prompt(&self) -> String {
        match &self.derived_prompt {
            Some(derived) => derived.clone(),
            None if self.source_code.is_empty() => self.user_message.clone(),
            None => format!("{}\n\n{}", self.user_message, self.source_code),
        }
    }
}

/// Outcome of one generation request, threaded through the after-phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationResult {
    pub model: ModelDescriptor,
    pub output_text: String,
    /// Request start to first streamed fragment.
    pub loading_time: Duration,
    /// Total request wall-clock.
    pub generation_time: Duration,
    pub timed_out: bool,
    #[serde(default)]
    pub annotations: Map<String, JsonValue>,
}
