use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::{AllowList, ModelDescriptor};

#[derive(Debug, Error)]
#[error("model '{0}' is not in the allow-list")]
pub struct UnknownModel(pub String);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read allow-list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed allow-list {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Immutable registry of the models this process may serve.
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn from_json(doc: &str) -> Result<Self, serde_json::Error> {
        let list: AllowList = serde_json::from_str(doc)?;
        Ok(Self::from_descriptors(list.models))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let doc = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&doc).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Exact-match lookup; anything not listed is rejected.
    pub fn validate(&self, model_id: &str) -> Result<&ModelDescriptor, UnknownModel> {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| UnknownModel(model_id.to_string()))
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_json(
            r#"{"models": [
                {"id": "m1", "name": "Model One"},
                {"id": "qwen2.5-coder:3b-instruct-q8_0", "name": "Qwen 2.5 Coder 3B"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_known_model() {
        let reg = registry();
        let m = reg.validate("m1").unwrap();
        assert_eq!(m.display_name, "Model One");
    }

    #[test]
    fn test_validate_is_exact_match() {
        let reg = registry();
        assert!(reg.validate("qwen2.5-coder").is_err());
        assert!(reg.validate("qwen2.5-coder:3b-instruct-q8_0").is_ok());
    }

    #[test]
    fn test_validate_unknown_model() {
        let reg = registry();
        let err = reg.validate("m2").unwrap_err();
        assert_eq!(err.to_string(), "model 'm2' is not in the allow-list");
    }

    #[test]
    fn test_descriptors_preserve_order() {
        let reg = registry();
        let ids: Vec<&str> = reg.descriptors().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "qwen2.5-coder:3b-instruct-q8_0"]);
    }
}
