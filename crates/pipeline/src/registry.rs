use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::module::PipelineModule;
use crate::schema::{GenerationResult, PromptData};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModuleInitError(pub String);

/// Constructor registered for a module name.
pub type ModuleCtor = fn() -> Result<Arc<dyn PipelineModule>, ModuleInitError>;

#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("module '{0}' is not registered")]
    Unknown(String),
    #[error("circular module dependency: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("module '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },
}

/// Name-keyed registry of pipeline modules.
///
/// Constructors are registered up front; instances are created on first
/// load and reused (one singleton per name). Every load failure (unknown
/// name, constructor error, dependency cycle) aborts the whole load: a
/// partial pipeline is never returned.
pub struct PipelineRegistry {
    ctors: HashMap<String, ModuleCtor>,
    loaded: Mutex<HashMap<String, Arc<dyn PipelineModule>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: ModuleCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves `names` and their declared dependencies, recursively.
    ///
    /// Dependencies appear in the returned set even when not requested;
    /// nothing is instantiated twice. Cycles are detected before any
    /// construction along the cycle and reported with the offending
    /// path.
    pub fn load(&self, names: &[String]) -> Result<Vec<Arc<dyn PipelineModule>>, ModuleLoadError> {
        let mut ordered = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = Vec::new();
        for name in names {
            self.load_one(name, &mut ordered, &mut done, &mut visiting)?;
        }
        Ok(ordered)
    }

    fn load_one(
        &self,
        name: &str,
        ordered: &mut Vec<Arc<dyn PipelineModule>>,
        done: &mut HashSet<String>,
        visiting: &mut Vec<String>,
    ) -> Result<(), ModuleLoadError> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|n| n == name) {
            let mut path = visiting[pos..].to_vec();
            path.push(name.to_string());
            return Err(ModuleLoadError::Cycle { path });
        }

        let module = self.instance(name)?;

        visiting.push(name.to_string());
        for dep in module.dependencies() {
            self.load_one(&dep, ordered, done, visiting)?;
        }
        visiting.pop();

        done.insert(name.to_string());
        ordered.push(module);
        Ok(())
    }

    /// Singleton per name: constructed on first use, cached afterwards.
    fn instance(&self, name: &str) -> Result<Arc<dyn PipelineModule>, ModuleLoadError> {
        let mut loaded = self.loaded.lock().expect("module cache poisoned");
        if let Some(module) = loaded.get(name) {
            return Ok(module.clone());
        }
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| ModuleLoadError::Unknown(name.to_string()))?;
        let module = ctor().map_err(|e| ModuleLoadError::Init {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        loaded.insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Applies the before-phase: filter, stable-sort ascending by
    /// `before_order`, thread the prompt through each module in turn.
    pub fn run_before(
        &self,
        modules: &[Arc<dyn PipelineModule>],
        mut prompt: PromptData,
    ) -> PromptData {
        let mut active: Vec<&Arc<dyn PipelineModule>> =
            modules.iter().filter(|m| m.applies_before()).collect();
        active.sort_by_key(|m| m.before_order());
        for module in active {
            prompt = module.process_prompt(prompt);
        }
        prompt
    }

    /// Applies the after-phase over the result. `prompt` is the
    /// pre-pipeline prompt, not the before-phase output.
    pub fn run_after(
        &self,
        modules: &[Arc<dyn PipelineModule>],
        mut response: GenerationResult,
        prompt: &PromptData,
    ) -> GenerationResult {
        let mut active: Vec<&Arc<dyn PipelineModule>> =
            modules.iter().filter(|m| m.applies_after()).collect();
        active.sort_by_key(|m| m.after_order());
        for module in active {
            response = module.process_response(response, prompt);
        }
        response
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
