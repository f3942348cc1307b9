use crate::schema::{GenerationResult, PromptData};

/// Phase order used when a module does not declare its own.
pub const DEFAULT_ORDER: i32 = 10;

/// One pluggable processing stage.
///
/// Modules run in two phases around a generation request: the before
/// phase rewrites the prompt, the after phase rewrites the result. A
/// module may participate in either phase or both, and may declare
/// other modules it depends on; the registry loads those too.
pub trait PipelineModule: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Runs over the prompt before it is sent.
    fn applies_before(&self) -> bool;

    /// Runs over the result after the response arrived.
    fn applies_after(&self) -> bool;

    /// Names of modules that must be loaded alongside this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn before_order(&self) -> i32 {
        DEFAULT_ORDER
    }

    fn after_order(&self) -> i32 {
        DEFAULT_ORDER
    }

    fn process_prompt(&self, prompt: PromptData) -> PromptData {
        prompt
    }

    fn process_response(
        &self,
        response: GenerationResult,
        _prompt: &PromptData,
    ) -> GenerationResult {
        response
    }
}
