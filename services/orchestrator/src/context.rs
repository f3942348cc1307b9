use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::supervisor::RuntimeInstance;

/// Fraction of the advertised context window handed to the prompt.
const BUDGET_FRACTION: f64 = 0.8;
/// Further cut applied to families that degrade near a full window.
const NEAR_FULL_FRACTION: f64 = 0.7;
/// Heuristic tokens-per-word ratio when no exact counter is registered.
const TOKENS_PER_WORD: f64 = 1.3;
/// Model families that lose output quality when the window fills up.
const NEAR_FULL_DEGRADING: &[&str] = &["mistral", "tinyllama"];

/// Counts prompt tokens for one model family. An exact tokenizer plugs
/// in here; the heuristic below is the shipped fallback.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

pub type CounterCtor = fn() -> Arc<dyn TokenCounter>;

struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        heuristic_estimate(text.split_whitespace().count())
    }
}

fn heuristic_estimate(words: usize) -> usize {
    (words as f64 * TOKENS_PER_WORD).ceil() as usize
}

/// Fits prompts into a model's usable context budget.
pub struct ContextEstimator {
    http: reqwest::Client,
    default_context: u32,
    exact: HashMap<String, CounterCtor>,
    cache: Mutex<HashMap<String, Arc<dyn TokenCounter>>>,
}

impl ContextEstimator {
    pub fn new(default_context: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            default_context,
            exact: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an exact counter for a model family. Construction is
    /// deferred to first use and the instance cached per family.
    pub fn register_counter(&mut self, family: impl Into<String>, ctor: CounterCtor) {
        self.exact.insert(family.into(), ctor);
    }

    /// Returns `prompt` unchanged when it fits the model's budget,
    /// otherwise a copy truncated by trailing words until the heuristic
    /// estimate fits. Truncation is lossy and undirected.
    pub async fn fit(&self, prompt: &str, instance: &RuntimeInstance) -> String {
        let context = match self.context_length(instance).await {
            Some(len) => len,
            None => {
                debug!(model_id = %instance.model_id, fallback = self.default_context,
                    "runtime did not report a context length");
                self.default_context
            }
        };
        let family = family_of(&instance.model_id);
        let budget = usable_budget(context, family);

        let counter = self.counter_for(family).await;
        if counter.count(prompt) <= budget {
            return prompt.to_string();
        }

        let fitted = truncate_to_budget(prompt, budget);
        debug!(model_id = %instance.model_id, budget, "prompt truncated to fit context");
        fitted
    }

    /// Asks the runtime for the model's maximum context length.
    async fn context_length(&self, instance: &RuntimeInstance) -> Option<u32> {
        let url = format!("{}/model-info", instance.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "model": instance.model_id }))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let info: serde_json::Value = resp.json().await.ok()?;
        info.get("context_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    async fn counter_for(&self, family: &str) -> Arc<dyn TokenCounter> {
        let mut cache = self.cache.lock().await;
        if let Some(counter) = cache.get(family) {
            return counter.clone();
        }
        let counter: Arc<dyn TokenCounter> = match self.exact.get(family) {
            Some(ctor) => ctor(),
            None => Arc::new(HeuristicCounter),
        };
        cache.insert(family.to_string(), counter.clone());
        counter
    }
}

/// "mistral:7b-instruct-v0.3-q3_K_M" → "mistral"
pub(crate) fn family_of(model_id: &str) -> &str {
    model_id
        .split([':', '/'])
        .next()
        .unwrap_or(model_id)
}

pub(crate) fn usable_budget(context_length: u32, family: &str) -> usize {
    let mut budget = f64::from(context_length) * BUDGET_FRACTION;
    if NEAR_FULL_DEGRADING.iter().any(|f| family.starts_with(f)) {
        budget *= NEAR_FULL_FRACTION;
    }
    budget.floor() as usize
}

/// Drops trailing words until the heuristic estimate fits `budget`.
pub(crate) fn truncate_to_budget(prompt: &str, budget: usize) -> String {
    let words: Vec<&str> = prompt.split_whitespace().collect();
    let mut keep = words
        .len()
        .min((budget as f64 / TOKENS_PER_WORD).floor() as usize);
    while keep > 0 && heuristic_estimate(keep) > budget {
        keep -= 1;
    }
    words[..keep].join(" ")
}
