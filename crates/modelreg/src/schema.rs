use serde::{Deserialize, Serialize};

/// One entry of the model allow-list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Runtime model id, e.g. "qwen2.5-coder:3b-instruct-q8_0"
    pub id: String,
    /// Human-readable name
    #[serde(rename = "name")]
    pub display_name: String,
}

/// On-disk shape of the allow-list document: `{"models": [...]}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllowList {
    pub models: Vec<ModelDescriptor>,
}
