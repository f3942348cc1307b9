use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use modelreg::ModelRegistry;
use pipeline::{GenerationOptions, GenerationResult, PipelineRegistry, PromptData};

use crate::config::EngineConfig;
use crate::container::ContainerRuntime;
use crate::context::ContextEstimator;
use crate::error::EngineError;
use crate::generate::GenerationClient;
use crate::supervisor::RuntimeSupervisor;

/// Stand-in deadline for callers that pass none: effectively "wait for
/// the answer", but still bounded.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub name: String,
    pub running: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model_id: String,
    pub user_message: String,
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub options: GenerationOptions,
    /// Pipeline modules to apply, by registered name.
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

/// The orchestration API surface a front-end consumes.
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    modules: PipelineRegistry,
    supervisor: RuntimeSupervisor,
    estimator: ContextEstimator,
    client: GenerationClient,
}

impl Orchestrator {
    pub fn new(
        cfg: EngineConfig,
        registry: ModelRegistry,
        modules: PipelineRegistry,
        containers: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let registry = Arc::new(registry);
        let estimator = ContextEstimator::new(cfg.default_context);
        Self {
            supervisor: RuntimeSupervisor::new(cfg, registry.clone(), containers),
            registry,
            modules,
            estimator,
            client: GenerationClient::new(),
        }
    }

    /// Allow-listed models and whether a runtime is up for each.
    pub async fn list_models(&self) -> Vec<ModelStatus> {
        let running = self.supervisor.running_ids().await;
        self.registry
            .descriptors()
            .iter()
            .map(|m| ModelStatus {
                id: m.id.clone(),
                name: m.display_name.clone(),
                running: running.contains(&m.id),
            })
            .collect()
    }

    /// Runs one generation request through the full pipeline:
    /// before-modules → runtime start (idempotent) → streamed
    /// generation → after-modules. The runtime is left running.
    pub async fn generate(&self, req: GenerateRequest) -> Result<GenerationResult, EngineError> {
        let descriptor = self.registry.validate(&req.model_id)?.clone();
        let modules = self.modules.load(&req.modules)?;
        info!(model_id = %req.model_id, modules = modules.len(), "dispatching generation");

        let mut prompt = PromptData::new(descriptor, req.user_message, req.source_code);
        prompt.options = req.options;
        prompt.timeout = Some(req.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT));

        // After-modules see the prompt as the caller supplied it, not
        // the before-enriched one.
        let original = prompt.clone();

        let prompt = self.modules.run_before(&modules, prompt);
        let instance = self.supervisor.start(&req.model_id).await?;
        let result = self
            .client
            .generate(&self.estimator, &instance, &prompt)
            .await?;
        Ok(self.modules.run_after(&modules, result, &original))
    }

    pub async fn stop(&self, model_id: &str) -> Result<(), EngineError> {
        self.supervisor.stop(model_id).await
    }

    pub async fn sweep_orphans(&self) -> Result<usize, EngineError> {
        self.supervisor.sweep_orphans().await
    }

    pub fn supervisor(&self) -> &RuntimeSupervisor {
        &self.supervisor
    }

    pub fn estimator_mut(&mut self) -> &mut ContextEstimator {
        &mut self.estimator
    }
}
