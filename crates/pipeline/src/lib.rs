//! Processing pipeline around generation requests.
//!
//! Concrete processing stages live outside this crate; they plug in by
//! implementing [`PipelineModule`] and registering a constructor with
//! [`PipelineRegistry`]. The registry resolves declared dependencies,
//! keeps one instance per module name, and applies modules in two
//! ordered phases around each request.

pub mod module;
pub mod registry;
pub mod schema;

pub use module::{PipelineModule, DEFAULT_ORDER};
pub use registry::{ModuleCtor, ModuleInitError, ModuleLoadError, PipelineRegistry};
pub use schema::{GenerationOptions, GenerationResult, PromptData, DEFAULT_SYSTEM_MESSAGE};
