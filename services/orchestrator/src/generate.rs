use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use pipeline::{GenerationResult, PromptData};

use crate::context::ContextEstimator;
use crate::error::{runtime_error, EngineError};
use crate::ndjson::LineBuffer;
use crate::supervisor::RuntimeInstance;

/// One streamed fragment of the generation response.
#[derive(Debug, Deserialize)]
struct GenerateFragment {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Issues streaming generation requests against ready runtimes.
///
/// One request, no retries. A request that outlives its caller-supplied
/// deadline comes back as an empty result with `timed_out` set; the
/// runtime instance stays up either way.
pub struct GenerationClient {
    http: reqwest::Client,
}

impl GenerationClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn generate(
        &self,
        estimator: &ContextEstimator,
        instance: &RuntimeInstance,
        prompt: &PromptData,
    ) -> Result<GenerationResult, EngineError> {
        let text = estimator.fit(&prompt.final_prompt(), instance).await;
        let payload = serde_json::json!({
            "model": instance.model_id,
            "prompt": text,
            "system": prompt.system_message,
            "options": prompt.options,
            "stream": true,
        });
        let url = format!("{}/generate", instance.base_url);
        let started = Instant::now();

        let streamed = match prompt.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.stream(&url, &payload, started)).await {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        warn!(model_id = %instance.model_id, ?limit,
                            "generation timed out, runtime left running");
                        let elapsed = started.elapsed();
                        return Ok(GenerationResult {
                            model: prompt.model.clone(),
                            output_text: String::new(),
                            loading_time: elapsed,
                            generation_time: elapsed,
                            timed_out: true,
                            annotations: Default::default(),
                        });
                    }
                }
            }
            None => self.stream(&url, &payload, started).await?,
        };

        let generation_time = started.elapsed();
        Ok(GenerationResult {
            model: prompt.model.clone(),
            output_text: streamed.output,
            // no fragment ever arrived: loading took the whole request
            loading_time: streamed.first_fragment_after.unwrap_or(generation_time),
            generation_time,
            timed_out: false,
            annotations: Default::default(),
        })
    }

    /// Reads the response as newline-delimited JSON fragments,
    /// accumulating each fragment's text delta. Malformed fragments are
    /// skipped rather than aborting the stream.
    async fn stream(
        &self,
        url: &str,
        payload: &serde_json::Value,
        started: Instant,
    ) -> Result<Streamed, EngineError> {
        let mut resp = self.http.post(url).json(payload).send().await?;
        if !resp.status().is_success() {
            return Err(runtime_error(resp).await);
        }

        let mut streamed = Streamed {
            output: String::new(),
            first_fragment_after: None,
        };
        let mut lines = LineBuffer::new();
        'read: while let Some(chunk) = resp.chunk().await? {
            for line in lines.push(&chunk) {
                if streamed.consume(&line, started) {
                    break 'read;
                }
            }
        }
        if let Some(line) = lines.flush() {
            streamed.consume(&line, started);
        }
        Ok(streamed)
    }
}

impl Default for GenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

struct Streamed {
    output: String,
    first_fragment_after: Option<Duration>,
}

impl Streamed {
    /// Returns true once the runtime marked the stream done.
    fn consume(&mut self, line: &str, started: Instant) -> bool {
        let Ok(fragment) = serde_json::from_str::<GenerateFragment>(line) else {
            debug!("skipping malformed stream fragment");
            return false;
        };
        if self.first_fragment_after.is_none() {
            self.first_fragment_after = Some(started.elapsed());
        }
        self.output.push_str(&fragment.response);
        fragment.done
    }
}
