use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{info, warn};

use modelreg::ModelRegistry;

use crate::config::{AddressingMode, EngineConfig};
use crate::container::{ContainerError, ContainerRuntime, ContainerSpec};
use crate::error::{runtime_error, EngineError};
use crate::ndjson::LineBuffer;
use crate::ports::PortAllocator;

/// Prefix of every container this engine owns; orphan sweeps match on it.
pub const CONTAINER_PREFIX: &str = "modelrt-";

const RUN_ATTEMPTS: usize = 3;
const WEIGHTS_MOUNT: &str = "/root/.ollama";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    AwaitingReady,
    Ready,
    Stopping,
    Failed { error: String },
}

/// One running containerized runtime serving a single model.
#[derive(Clone, Debug)]
pub struct RuntimeInstance {
    pub model_id: String,
    pub container_name: String,
    pub port: u16,
    pub base_url: String,
    pub state: RuntimeState,
}

/// Deterministic container name for a model id, so a restart finds (and
/// removes) what a crashed run left behind.
pub fn container_name(model_id: &str) -> String {
    let sanitized: String = model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{CONTAINER_PREFIX}{sanitized}")
}

/// Owns the model-id → runtime-instance registry.
///
/// Calls for different models proceed in parallel; calls for the same
/// model are serialized through a per-id lock so at most one instance
/// per model can ever exist.
pub struct RuntimeSupervisor {
    cfg: EngineConfig,
    registry: Arc<ModelRegistry>,
    containers: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    ports: PortAllocator,
    instances: Mutex<HashMap<String, RuntimeInstance>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RuntimeSupervisor {
    pub fn new(
        cfg: EngineConfig,
        registry: Arc<ModelRegistry>,
        containers: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            cfg,
            registry,
            containers,
            http: reqwest::Client::new(),
            ports: PortAllocator::new(),
            instances: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a runtime for `model_id` and waits until it is ready to
    /// serve, model weights included. A second call while one is
    /// already `Ready` returns the existing instance untouched.
    ///
    /// Blocks the calling task for the whole pull/probe/weight-fetch
    /// sequence, which can take minutes on a cold volume.
    pub async fn start(&self, model_id: &str) -> Result<RuntimeInstance, EngineError> {
        self.registry.validate(model_id)?;

        let lock = self.entry_lock(model_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.lookup(model_id).await {
            if existing.state == RuntimeState::Ready {
                info!(model_id, "runtime already ready");
                return Ok(existing);
            }
        }

        let name = container_name(model_id);

        // The registry and the real containers must never disagree: a
        // leftover container with our name (orphaned by a crash) is
        // removed before anything else.
        if self.containers.exists(&name).await? {
            warn!(container = %name, "removing leftover container");
            self.containers.remove(&name, true).await?;
        }

        self.containers.ensure_image(&self.cfg.image).await?;

        let port = self.launch(&name).await?;
        let base_url = self.base_url(&name, port);
        self.put(RuntimeInstance {
            model_id: model_id.to_string(),
            container_name: name.clone(),
            port,
            base_url: base_url.clone(),
            state: RuntimeState::Starting,
        })
        .await;

        self.set_state(model_id, RuntimeState::AwaitingReady).await;
        if let Err(e) = self.await_ready(model_id, &base_url).await {
            self.abort_start(model_id, &name, port).await;
            return Err(e);
        }
        if let Err(e) = self.ensure_model(model_id, &base_url).await {
            self.abort_start(model_id, &name, port).await;
            return Err(e);
        }

        self.ports.confirm(port).await;
        let instance = RuntimeInstance {
            model_id: model_id.to_string(),
            container_name: name.clone(),
            port,
            base_url,
            state: RuntimeState::Ready,
        };
        self.put(instance.clone()).await;
        info!(model_id, container = %name, port, "runtime ready");
        Ok(instance)
    }

    /// Stops and deregisters the runtime for `model_id`; no-op when
    /// nothing is registered. A failing container stop is logged,
    /// surfaced, and leaves the registry entry in place.
    pub async fn stop(&self, model_id: &str) -> Result<(), EngineError> {
        let lock = self.entry_lock(model_id).await;
        let _guard = lock.lock().await;

        let Some(instance) = self.lookup(model_id).await else {
            info!(model_id, "no runtime to stop");
            return Ok(());
        };

        self.set_state(model_id, RuntimeState::Stopping).await;
        if let Err(e) = self.containers.stop(&instance.container_name).await {
            warn!(model_id, container = %instance.container_name, "container stop failed: {e}");
            self.set_state(
                model_id,
                RuntimeState::Failed {
                    error: e.to_string(),
                },
            )
            .await;
            return Err(e.into());
        }

        self.instances.lock().await.remove(model_id);
        info!(model_id, container = %instance.container_name, "runtime stopped");
        Ok(())
    }

    /// Registry lookup; never starts anything.
    pub async fn resolve(&self, model_id: &str) -> Result<RuntimeInstance, EngineError> {
        match self.lookup(model_id).await {
            Some(instance) if instance.state == RuntimeState::Ready => Ok(instance),
            _ => Err(EngineError::NotRunning(model_id.to_string())),
        }
    }

    /// Force-removes containers carrying our prefix that the registry
    /// does not know. Run at process start and shutdown; a crash
    /// between container creation and registration can still leak until
    /// the next sweep.
    pub async fn sweep_orphans(&self) -> Result<usize, EngineError> {
        let names = self.containers.list_names(CONTAINER_PREFIX).await?;
        let registered: HashSet<String> = self
            .instances
            .lock()
            .await
            .values()
            .map(|i| i.container_name.clone())
            .collect();

        let mut removed = 0;
        for name in names {
            if registered.contains(&name) {
                continue;
            }
            warn!(container = %name, "reclaiming orphaned runtime container");
            self.containers.remove(&name, true).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn running_ids(&self) -> HashSet<String> {
        self.instances
            .lock()
            .await
            .values()
            .filter(|i| i.state == RuntimeState::Ready)
            .map(|i| i.model_id.clone())
            .collect()
    }

    /// Launches the container on a freshly allocated port, re-allocating
    /// when another process grabbed the port first.
    async fn launch(&self, name: &str) -> Result<u16, EngineError> {
        for attempt in 1..=RUN_ATTEMPTS {
            let port = self.ports.allocate().await?;
            let spec = ContainerSpec {
                image: self.cfg.image.clone(),
                name: name.to_string(),
                host_port: port,
                container_port: self.cfg.container_port,
                volume_dir: self.cfg.volume_dir.clone(),
                volume_mount: WEIGHTS_MOUNT.to_string(),
            };
            match self.containers.run(&spec).await {
                Ok(()) => return Ok(port),
                Err(ContainerError::PortConflict(p)) => {
                    warn!(port = p, attempt, "host port raced away, retrying");
                    self.ports.release(port).await;
                }
                Err(e) => {
                    self.ports.release(port).await;
                    return Err(e.into());
                }
            }
        }
        Err(EngineError::NoFreePort)
    }

    /// Polls the liveness endpoint until it answers or the startup
    /// timeout elapses.
    async fn await_ready(&self, model_id: &str, base_url: &str) -> Result<(), EngineError> {
        let url = format!("{base_url}/liveness");
        let deadline = Instant::now() + self.cfg.startup_timeout;
        loop {
            if let Ok(resp) = self.http.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(EngineError::StartupTimeout {
                    model_id: model_id.to_string(),
                    waited: self.cfg.startup_timeout,
                });
            }
            tokio::time::sleep(self.cfg.probe_interval).await;
        }
    }

    /// Asks the runtime to make the model weights present, streaming
    /// progress until done. Deliberately unbounded: a cold pull can take
    /// as long as it takes, only the caller's patience limits it.
    async fn ensure_model(&self, model_id: &str, base_url: &str) -> Result<(), EngineError> {
        let url = format!("{base_url}/ensure-model");
        let mut resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "model": model_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(runtime_error(resp).await);
        }

        let mut lines = LineBuffer::new();
        let mut last_status: Option<String> = None;
        while let Some(chunk) = resp.chunk().await? {
            for line in lines.push(&chunk) {
                Self::log_pull_status(model_id, &line, &mut last_status);
            }
        }
        if let Some(line) = lines.flush() {
            Self::log_pull_status(model_id, &line, &mut last_status);
        }
        Ok(())
    }

    /// Each distinct status is logged once; malformed lines are skipped.
    fn log_pull_status(model_id: &str, line: &str, last_status: &mut Option<String>) {
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            return;
        };
        if let Some(status) = event.get("status").and_then(|s| s.as_str()) {
            if last_status.as_deref() != Some(status) {
                info!(model_id, status, "ensuring model weights");
                *last_status = Some(status.to_string());
            }
        }
    }

    /// Failed mid-start: take the container down, give the port back,
    /// drop the half-registered entry.
    async fn abort_start(&self, model_id: &str, name: &str, port: u16) {
        if let Err(e) = self.containers.remove(name, true).await {
            warn!(container = %name, "cleanup after failed start also failed: {e}");
        }
        self.ports.release(port).await;
        self.instances.lock().await.remove(model_id);
    }

    fn base_url(&self, name: &str, port: u16) -> String {
        match self.cfg.addressing {
            AddressingMode::Direct => format!("http://127.0.0.1:{port}"),
            AddressingMode::Container => {
                format!("http://{name}:{}", self.cfg.container_port)
            }
        }
    }

    async fn lookup(&self, model_id: &str) -> Option<RuntimeInstance> {
        self.instances.lock().await.get(model_id).cloned()
    }

    async fn put(&self, instance: RuntimeInstance) {
        self.instances
            .lock()
            .await
            .insert(instance.model_id.clone(), instance);
    }

    async fn set_state(&self, model_id: &str, state: RuntimeState) {
        if let Some(instance) = self.instances.lock().await.get_mut(model_id) {
            instance.state = state;
        }
    }

    async fn entry_lock(&self, model_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
