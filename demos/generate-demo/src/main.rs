use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use modelreg::ModelRegistry;
use orchestrator::{DockerCli, EngineConfig, GenerateRequest, Orchestrator};
use pipeline::{ModuleInitError, PipelineModule, PipelineRegistry, PromptData};

/// Minimal before-module: prefixes the user message so the pipeline
/// wiring is visible in the output.
#[derive(Debug)]
struct PromptBanner;

impl PipelineModule for PromptBanner {
    fn name(&self) -> &str {
        "prompt_banner"
    }
    fn applies_before(&self) -> bool {
        true
    }
    fn applies_after(&self) -> bool {
        false
    }
    fn process_prompt(&self, mut prompt: PromptData) -> PromptData {
        prompt.user_message = format!("[generate-demo] {}", prompt.user_message);
        prompt
    }
}

fn banner_ctor() -> Result<Arc<dyn PipelineModule>, ModuleInitError> {
    Ok(Arc::new(PromptBanner))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = EngineConfig::from_env()?;
    let models_path =
        std::env::var("MODELS_PATH").unwrap_or_else(|_| "models.json".to_string());
    let registry = ModelRegistry::from_path(&models_path).context("loading model allow-list")?;

    let mut modules = PipelineRegistry::new();
    modules.register("prompt_banner", banner_ctor);

    let orchestrator = Orchestrator::new(cfg, registry, modules, Arc::new(DockerCli::new()));

    // reclaim whatever a previous crash left behind
    orchestrator.sweep_orphans().await?;

    for model in orchestrator.list_models().await {
        info!(id = %model.id, running = model.running, "allowed model");
    }

    let model_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "qwen2.5-coder:3b-instruct-q8_0".to_string());

    let result = orchestrator
        .generate(GenerateRequest {
            model_id: model_id.clone(),
            user_message: "Write unit tests for the following function.".to_string(),
            source_code: "def add(a, b):\n    return a + b\n".to_string(),
            options: Default::default(),
            modules: vec!["prompt_banner".to_string()],
            timeout: Some(Duration::from_secs(600)),
        })
        .await?;

    info!(
        loading = ?result.loading_time,
        generation = ?result.generation_time,
        timed_out = result.timed_out,
        "generation finished"
    );
    println!("{}", result.output_text);

    orchestrator.stop(&model_id).await?;
    orchestrator.sweep_orphans().await?;
    Ok(())
}
