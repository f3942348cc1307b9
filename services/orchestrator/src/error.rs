use std::time::Duration;

use thiserror::Error;

use crate::container::ContainerError;
use modelreg::UnknownModel;
use pipeline::ModuleLoadError;

/// Engine error taxonomy. A request that merely exceeds its deadline is
/// not represented here: it comes back as a flagged result instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),

    #[error("runtime for '{model_id}' did not become live within {waited:?}")]
    StartupTimeout { model_id: String, waited: Duration },

    #[error("no runtime is running for model '{0}'")]
    NotRunning(String),

    /// Non-2xx answer from a live runtime. The instance is left running.
    #[error("runtime request failed ({status}): {message}")]
    Runtime { status: u16, message: String },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("runtime request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Module(#[from] ModuleLoadError),

    #[error("no free port could be allocated")]
    NoFreePort,
}

/// Builds the `Runtime` variant from a non-2xx response, preferring the
/// structured `error` field of the body over the raw text.
pub(crate) async fn runtime_error(resp: reqwest::Response) -> EngineError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    EngineError::Runtime { status, message }
}
