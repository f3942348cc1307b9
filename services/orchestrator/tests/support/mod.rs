use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use orchestrator::{ContainerError, ContainerRuntime, ContainerSpec};

/// How a stub runtime behaves once "started".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubBehavior {
    /// Streams the prompt back, with one malformed fragment mixed in.
    Echo,
    /// Live and pulls weights, but never answers a generate request.
    Stall,
    /// Live, but generate requests fail with a structured error body.
    Error,
    /// The container starts but nothing ever listens on the port.
    Dead,
}

#[derive(Default)]
struct Inner {
    servers: HashMap<String, Option<JoinHandle<()>>>,
    preexisting: HashSet<String>,
    removed: Vec<String>,
    run_calls: usize,
}

/// Container runtime stand-in: "running a container" binds an
/// in-process HTTP app speaking the runtime endpoint contract on the
/// exact port the supervisor allocated.
pub struct FakeRuntime {
    behavior: StubBehavior,
    context_length: u32,
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            context_length: 4096,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_context_length(behavior: StubBehavior, context_length: u32) -> Self {
        Self {
            behavior,
            context_length,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a container that "survived a previous crash".
    pub async fn add_preexisting(&self, name: &str) {
        self.inner.lock().await.preexisting.insert(name.to_string());
    }

    pub async fn run_calls(&self) -> usize {
        self.inner.lock().await.run_calls
    }

    pub async fn removed(&self) -> Vec<String> {
        self.inner.lock().await.removed.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        inner.run_calls += 1;

        if self.behavior == StubBehavior::Dead {
            inner.servers.insert(spec.name.clone(), None);
            return Ok(());
        }

        let listener = TcpListener::bind(("127.0.0.1", spec.host_port))
            .await
            .map_err(|_| ContainerError::PortConflict(spec.host_port))?;
        let app = stub_app(self.behavior, self.context_length);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        inner.servers.insert(spec.name.clone(), Some(handle));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        if let Some(Some(handle)) = self.inner.lock().await.servers.remove(name) {
            handle.abort();
        }
        Ok(())
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        inner.removed.push(name.to_string());
        if let Some(Some(handle)) = inner.servers.remove(name) {
            handle.abort();
        }
        inner.preexisting.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        let inner = self.inner.lock().await;
        Ok(inner.servers.contains_key(name) || inner.preexisting.contains(name))
    }

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, ContainerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .servers
            .keys()
            .chain(inner.preexisting.iter())
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn stub_app(behavior: StubBehavior, context_length: u32) -> Router {
    Router::new()
        .route("/liveness", get(|| async { "ok" }))
        .route(
            "/model-info",
            post(move |Json(_req): Json<serde_json::Value>| async move {
                Json(serde_json::json!({ "context_length": context_length }))
            }),
        )
        .route(
            "/ensure-model",
            post(|| async {
                concat!(
                    "{\"status\":\"pulling manifest\"}\n",
                    "{\"status\":\"pulling manifest\"}\n",
                    "{\"status\":\"success\"}\n",
                )
            }),
        )
        .route(
            "/generate",
            post(move |Json(req): Json<serde_json::Value>| async move {
                generate_response(behavior, &req).await
            }),
        )
}

async fn generate_response(behavior: StubBehavior, req: &serde_json::Value) -> Response {
    match behavior {
        StubBehavior::Echo => {
            let prompt = req["prompt"].as_str().unwrap_or("");
            let body = format!(
                "{}\nthis line is not json\n{}\n{}\n",
                serde_json::json!({ "response": "echo: " }),
                serde_json::json!({ "response": prompt }),
                serde_json::json!({ "response": "", "done": true }),
            );
            body.into_response()
        }
        StubBehavior::Stall => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            "".into_response()
        }
        StubBehavior::Error => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "model exploded" })),
        )
            .into_response(),
        StubBehavior::Dead => unreachable!("dead runtimes never serve"),
    }
}
