use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// How a runtime instance is reached once its container runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressingMode {
    /// Host loopback plus the published ephemeral port.
    Direct,
    /// Container-name DNS on the fixed runtime port (the engine itself
    /// runs inside the same container network).
    Container,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Base runtime image every instance is launched from.
    pub image: String,
    /// Host directory mounted into each container for weight caching.
    pub volume_dir: PathBuf,
    /// Port the runtime serves on inside its container.
    pub container_port: u16,
    pub probe_interval: Duration,
    pub startup_timeout: Duration,
    /// Context length assumed when the runtime does not report one.
    pub default_context: u32,
    pub addressing: AddressingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image: "ollama/ollama".to_string(),
            volume_dir: PathBuf::from("./runtime-models"),
            container_port: 11434,
            probe_interval: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(120),
            default_context: 4096,
            addressing: AddressingMode::Direct,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(image) = std::env::var("RUNTIME_IMAGE") {
            cfg.image = image;
        }
        if let Ok(dir) = std::env::var("RUNTIME_VOLUME_DIR") {
            cfg.volume_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("RUNTIME_STARTUP_TIMEOUT_SECS") {
            let parsed: u64 = secs.parse().map_err(|_| ConfigError::Invalid {
                key: "RUNTIME_STARTUP_TIMEOUT_SECS",
                value: secs.clone(),
            })?;
            cfg.startup_timeout = Duration::from_secs(parsed);
        }
        if let Ok(mode) = std::env::var("RUNTIME_ADDRESSING") {
            cfg.addressing = match mode.as_str() {
                "direct" => AddressingMode::Direct,
                "container" => AddressingMode::Container,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "RUNTIME_ADDRESSING",
                        value: mode,
                    })
                }
            };
        }
        Ok(cfg)
    }
}
