mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use modelreg::{ModelDescriptor, ModelRegistry};
use orchestrator::supervisor::container_name;
use orchestrator::{
    EngineConfig, EngineError, GenerateRequest, Orchestrator, RuntimeState,
};
use pipeline::{
    GenerationResult, ModuleInitError, PipelineModule, PipelineRegistry, PromptData,
};
use support::{FakeRuntime, StubBehavior};

fn allow_list() -> ModelRegistry {
    ModelRegistry::from_descriptors(vec![ModelDescriptor {
        id: "m1".into(),
        display_name: "Model One".into(),
    }])
}

fn test_config(volume: &TempDir) -> EngineConfig {
    EngineConfig {
        image: "stub-runtime".into(),
        volume_dir: volume.path().to_path_buf(),
        probe_interval: Duration::from_millis(25),
        startup_timeout: Duration::from_millis(500),
        ..EngineConfig::default()
    }
}

fn engine(behavior: StubBehavior) -> (Orchestrator, Arc<FakeRuntime>, TempDir) {
    engine_with(behavior, PipelineRegistry::new())
}

fn engine_with(
    behavior: StubBehavior,
    modules: PipelineRegistry,
) -> (Orchestrator, Arc<FakeRuntime>, TempDir) {
    let volume = TempDir::new().unwrap();
    let fake = Arc::new(FakeRuntime::new(behavior));
    let orchestrator = Orchestrator::new(
        test_config(&volume),
        allow_list(),
        modules,
        fake.clone(),
    );
    (orchestrator, fake, volume)
}

fn engine_raw(fake: Arc<FakeRuntime>) -> (Orchestrator, TempDir) {
    let volume = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        test_config(&volume),
        allow_list(),
        PipelineRegistry::new(),
        fake,
    );
    (orchestrator, volume)
}

fn request(model_id: &str) -> GenerateRequest {
    GenerateRequest {
        model_id: model_id.into(),
        user_message: "hi".into(),
        source_code: String::new(),
        options: Default::default(),
        modules: Vec::new(),
        timeout: None,
    }
}

// The concrete end-to-end scenario: unknown model rejected, start,
// resolve, generate against an echoing runtime, stop, resolve fails.
#[tokio::test]
async fn test_full_lifecycle_scenario() {
    let (orchestrator, _fake, _vol) = engine(StubBehavior::Echo);

    let err = orchestrator.supervisor().start("m2").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownModel(_)));

    let instance = orchestrator.supervisor().start("m1").await.unwrap();
    assert_eq!(instance.state, RuntimeState::Ready);
    let resolved = orchestrator.supervisor().resolve("m1").await.unwrap();
    assert_eq!(resolved.state, RuntimeState::Ready);

    let result = orchestrator.generate(request("m1")).await.unwrap();
    assert!(!result.output_text.is_empty());
    assert!(!result.timed_out);
    assert_eq!(result.output_text, "echo: hi");

    orchestrator.stop("m1").await.unwrap();
    let err = orchestrator.supervisor().resolve("m1").await.unwrap_err();
    assert!(matches!(err, EngineError::NotRunning(_)));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Echo);

    let first = orchestrator.supervisor().start("m1").await.unwrap();
    let second = orchestrator.supervisor().start("m1").await.unwrap();

    assert_eq!(first.port, second.port);
    assert_eq!(first.container_name, second.container_name);
    assert_eq!(fake.run_calls().await, 1);
}

#[tokio::test]
async fn test_concurrent_starts_share_one_instance() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Echo);

    let (a, b) = tokio::join!(
        orchestrator.supervisor().start("m1"),
        orchestrator.supervisor().start("m1"),
    );
    assert_eq!(a.unwrap().port, b.unwrap().port);
    assert_eq!(fake.run_calls().await, 1);
}

#[tokio::test]
async fn test_leftover_container_removed_before_start() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Echo);
    let name = container_name("m1");
    fake.add_preexisting(&name).await;

    orchestrator.supervisor().start("m1").await.unwrap();

    assert_eq!(fake.removed().await, vec![name]);
    assert!(orchestrator.supervisor().resolve("m1").await.is_ok());
}

#[tokio::test]
async fn test_startup_timeout_removes_container() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Dead);

    let err = orchestrator.supervisor().start("m1").await.unwrap_err();
    assert!(matches!(err, EngineError::StartupTimeout { .. }));

    // the dead container was taken down before the error surfaced
    assert_eq!(fake.removed().await, vec![container_name("m1")]);
    assert!(orchestrator.supervisor().resolve("m1").await.is_err());
}

#[tokio::test]
async fn test_timeout_yields_flagged_result_not_error() {
    let (orchestrator, _fake, _vol) = engine(StubBehavior::Stall);

    let mut req = request("m1");
    req.timeout = Some(Duration::from_secs(1));

    let started = Instant::now();
    let result = orchestrator.generate(req).await.unwrap();
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert!(result.output_text.is_empty());
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");

    // the runtime instance is left running; stopping it is the caller's job
    assert!(orchestrator.supervisor().resolve("m1").await.is_ok());
}

#[tokio::test]
async fn test_runtime_error_extracts_structured_message() {
    let (orchestrator, _fake, _vol) = engine(StubBehavior::Error);

    let err = orchestrator.generate(request("m1")).await.unwrap_err();
    match err {
        EngineError::Runtime { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "model exploded");
        }
        other => panic!("expected runtime error, got {other}"),
    }

    // a failing runtime is not torn down
    assert!(orchestrator.supervisor().resolve("m1").await.is_ok());
}

#[tokio::test]
async fn test_sweep_reclaims_orphans_only() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Echo);
    fake.add_preexisting("modelrt-zombie").await;

    orchestrator.supervisor().start("m1").await.unwrap();

    let removed = orchestrator.sweep_orphans().await.unwrap();
    assert_eq!(removed, 1);
    assert!(fake.removed().await.contains(&"modelrt-zombie".to_string()));
    // the registered runtime survived the sweep
    assert!(orchestrator.supervisor().resolve("m1").await.is_ok());
}

#[tokio::test]
async fn test_list_models_reports_running_flag() {
    let (orchestrator, _fake, _vol) = engine(StubBehavior::Echo);

    let before = orchestrator.list_models().await;
    assert_eq!(before.len(), 1);
    assert!(!before[0].running);

    orchestrator.supervisor().start("m1").await.unwrap();
    let after = orchestrator.list_models().await;
    assert!(after[0].running);
}

// A runtime advertising a tiny context window forces the prompt
// through truncation before it reaches the wire.
#[tokio::test]
async fn test_oversized_prompt_is_trimmed_to_budget() {
    let fake = Arc::new(FakeRuntime::with_context_length(StubBehavior::Echo, 100));
    let (orchestrator, _vol) = engine_raw(fake);

    let mut req = request("m1");
    req.user_message = (0..200)
        .map(|i| format!("w{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    let result = orchestrator.generate(req).await.unwrap();

    let echoed = result.output_text.strip_prefix("echo: ").unwrap();
    let words = echoed.split_whitespace().count();
    // budget = 100 * 0.8 = 80 tokens at 1.3 tokens/word
    assert_eq!(words, 61);
    assert!(echoed.starts_with("w0 w1 "));
}

#[tokio::test]
async fn test_unknown_module_fails_whole_request() {
    let (orchestrator, fake, _vol) = engine(StubBehavior::Echo);

    let mut req = request("m1");
    req.modules = vec!["nope".into()];
    let err = orchestrator.generate(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Module(_)));

    // failed before any runtime work
    assert_eq!(fake.run_calls().await, 0);
}

// A before-module rewrites the prompt; an after-module must still see
// the caller's original prompt.
#[derive(Debug)]
struct Composer;

impl PipelineModule for Composer {
    fn name(&self) -> &str {
        "composer"
    }
    fn applies_before(&self) -> bool {
        true
    }
    fn applies_after(&self) -> bool {
        false
    }
    fn process_prompt(&self, mut prompt: PromptData) -> PromptData {
        prompt.derived_prompt = Some("composed prompt".into());
        prompt
    }
}

#[derive(Debug)]
struct Inspector;

impl PipelineModule for Inspector {
    fn name(&self) -> &str {
        "inspector"
    }
    fn applies_before(&self) -> bool {
        false
    }
    fn applies_after(&self) -> bool {
        true
    }
    fn process_response(
        &self,
        mut response: GenerationResult,
        prompt: &PromptData,
    ) -> GenerationResult {
        response.annotations.insert(
            "saw_derived_prompt".into(),
            serde_json::Value::Bool(prompt.derived_prompt.is_some()),
        );
        response
    }
}

fn ctor_composer() -> Result<Arc<dyn PipelineModule>, ModuleInitError> {
    Ok(Arc::new(Composer))
}

fn ctor_inspector() -> Result<Arc<dyn PipelineModule>, ModuleInitError> {
    Ok(Arc::new(Inspector))
}

#[tokio::test]
async fn test_modules_wrap_generation() {
    let mut modules = PipelineRegistry::new();
    modules.register("composer", ctor_composer);
    modules.register("inspector", ctor_inspector);
    let (orchestrator, _fake, _vol) = engine_with(StubBehavior::Echo, modules);

    let mut req = request("m1");
    req.modules = vec!["composer".into(), "inspector".into()];
    let result = orchestrator.generate(req).await.unwrap();

    // the derived prompt replaced the plain concatenation on the wire
    assert_eq!(result.output_text, "echo: composed prompt");
    // the after-module got the pre-pipeline prompt, not the derived one
    assert_eq!(
        result.annotations.get("saw_derived_prompt"),
        Some(&serde_json::Value::Bool(false))
    );
}
