//! Runtime orchestration engine.
//!
//! Provisions and supervises short-lived containerized inference
//! runtimes (one per model), brokers streamed generation requests to
//! them, and routes prompt/response data through the processing
//! pipeline. Consumed by a front-end through [`Orchestrator`].

pub mod api;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod generate;
mod ndjson;
pub mod ports;
pub mod supervisor;

pub use api::{GenerateRequest, ModelStatus, Orchestrator, DEFAULT_REQUEST_TIMEOUT};
pub use config::{AddressingMode, ConfigError, EngineConfig};
pub use container::{ContainerError, ContainerRuntime, ContainerSpec, DockerCli};
pub use context::{ContextEstimator, TokenCounter};
pub use error::EngineError;
pub use generate::GenerationClient;
pub use supervisor::{RuntimeInstance, RuntimeState, RuntimeSupervisor};
