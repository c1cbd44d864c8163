//! `traffic_tests`
//!
//! A scripted stand-in for the simulation authority, served over real HTTP
//! on an ephemeral port so the client can be exercised end to end.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::debug;
use traffic_shared::net::{encode_positions, EndpointKind, EntitySnapshot};

/// Mutable state behind the mock routes.
#[derive(Debug, Default)]
pub struct AuthorityState {
    /// Car batch served at each step; the last one repeats.
    pub car_script: Vec<Vec<EntitySnapshot>>,
    pub statics: HashMap<EndpointKind, Vec<EntitySnapshot>>,
    pub step: usize,
    pub reject_init: bool,
    pub init_forms: Vec<Vec<(String, String)>>,
    pub requests: Vec<String>,
}

type Shared = Arc<Mutex<AuthorityState>>;

/// Running mock authority.
pub struct MockAuthority {
    pub addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl MockAuthority {
    /// Binds to `127.0.0.1:0` and starts serving.
    pub async fn start(state: AuthorityState) -> anyhow::Result<Self> {
        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/init", post(init))
            .route("/update", get(update))
            .route("/getCars", get(cars))
            .route("/getObstacles", get(|s: State<Shared>| statics(s, EndpointKind::Obstacles)))
            .route("/getTrafficLights", get(|s: State<Shared>| statics(s, EndpointKind::TrafficLights)))
            .route("/getRoad", get(|s: State<Shared>| statics(s, EndpointKind::Roads)))
            .route("/getDestination", get(|s: State<Shared>| statics(s, EndpointKind::Destinations)))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "Mock authority stopped");
            }
        });
        debug!(%addr, "Mock authority listening");
        Ok(Self { addr, state, task })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Runs `f` with the state locked.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut AuthorityState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn requests(&self) -> Vec<String> {
        self.with_state(|s| s.requests.clone())
    }
}

impl Drop for MockAuthority {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(state: &Shared) -> std::sync::MutexGuard<'_, AuthorityState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn payload(snaps: &[EntitySnapshot]) -> Response {
    match encode_positions(snaps) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
    }
}

async fn init(
    State(state): State<Shared>,
    Form(fields): Form<Vec<(String, String)>>,
) -> (StatusCode, Json<Value>) {
    let mut s = lock(&state);
    s.requests.push("POST /init".to_string());
    if s.reject_init {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "model failed to start" })),
        );
    }
    s.init_forms.push(fields);
    s.step = 0;
    (
        StatusCode::OK,
        Json(json!({ "message": "Parameters received, model initiated." })),
    )
}

async fn update(State(state): State<Shared>) -> Json<Value> {
    let mut s = lock(&state);
    s.requests.push("GET /update".to_string());
    if s.step + 1 < s.car_script.len() {
        s.step += 1;
    }
    Json(json!({ "message": format!("Model updated to step {}.", s.step), "currentStep": s.step }))
}

async fn cars(State(state): State<Shared>) -> Response {
    let mut s = lock(&state);
    s.requests.push("GET /getCars".to_string());
    let batch = s.car_script.get(s.step).cloned().unwrap_or_default();
    payload(&batch)
}

async fn statics(State(state): State<Shared>, kind: EndpointKind) -> Response {
    let mut s = lock(&state);
    s.requests.push(format!("GET {kind:?}"));
    let batch = s.statics.get(&kind).cloned().unwrap_or_default();
    payload(&batch)
}
