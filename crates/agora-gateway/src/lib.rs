//! HTTP gateway exposing Agora agents to outside clients.
//!
//! The gateway owns one requester identity on the bus and submits tasks
//! on behalf of HTTP clients, fire-and-forget: `POST /api/tasks`
//! returns a task id immediately and `GET /api/tasks/{id}` polls the
//! outcome. Local agents are listed from their capability registries.

pub mod rate_limit;

use agora_bus::{Agent, AgentHealth};
use agora_types::capability::Capability;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Default timeout for submitted tasks.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Shared gateway state.
pub struct GatewayState {
    /// The bus identity used to submit tasks for HTTP clients.
    requester: Arc<Agent>,
    /// Local agents served by this node, keyed by id.
    agents: HashMap<String, Arc<Agent>>,
}

impl GatewayState {
    /// Build gateway state over a requester agent and the node's local
    /// agents.
    pub fn new(requester: Arc<Agent>, locals: Vec<Arc<Agent>>) -> Arc<Self> {
        let agents = locals.into_iter().map(|a| (a.id().to_string(), a)).collect();
        Arc::new(Self { requester, agents })
    }
}

#[derive(Debug, Serialize)]
struct AgentInfo {
    id: String,
    name: String,
    capabilities: Vec<Capability>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    gateway: AgentHealth,
    agents: HashMap<String, AgentHealth>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub agent_id: String,
    pub task_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Serialize)]
struct SubmitTaskResponse {
    task_id: String,
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<HealthReport> {
    let agents = state
        .agents
        .iter()
        .map(|(id, agent)| (id.clone(), agent.health()))
        .collect();
    let gateway = state.requester.health();
    let status = if gateway.connected { "healthy" } else { "unhealthy" };
    Json(HealthReport {
        status,
        gateway,
        agents,
    })
}

async fn list_agents(State(state): State<Arc<GatewayState>>) -> Json<Vec<AgentInfo>> {
    let mut infos: Vec<AgentInfo> = state
        .agents
        .values()
        .map(|agent| AgentInfo {
            id: agent.id().to_string(),
            name: agent.name().to_string(),
            capabilities: agent.registry().describe(),
        })
        .collect();
    infos.sort_by(|a, b| a.id.cmp(&b.id));
    Json(infos)
}

async fn submit_task(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> (StatusCode, Json<SubmitTaskResponse>) {
    let task_id = state.requester.submit_task(
        &request.agent_id,
        &request.task_type,
        request.data,
        Duration::from_secs(request.timeout_secs),
    );
    (StatusCode::ACCEPTED, Json(SubmitTaskResponse { task_id }))
}

async fn get_task(
    State(state): State<Arc<GatewayState>>,
    Path(task_id): Path<String>,
) -> Result<Json<agora_bus::TaskRecord>, StatusCode> {
    state
        .requester
        .poll_result(&task_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let limiter = rate_limit::create_rate_limiter();
    Router::new()
        .route("/api/health", get(health))
        .route("/api/agents", get(list_agents))
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks/{task_id}", get(get_task))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit::gcra_rate_limit,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve the gateway on an already-bound listener.
pub async fn serve(
    state: Arc<GatewayState>,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Gateway listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
