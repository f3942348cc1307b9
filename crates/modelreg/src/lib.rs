//! Static model allow-list.
//!
//! Loaded once at process start; read-only afterwards. Every request
//! entering the engine is validated against it by exact id match.

pub mod registry;
pub mod schema;

pub use registry::{ModelRegistry, RegistryError, UnknownModel};
pub use schema::ModelDescriptor;
