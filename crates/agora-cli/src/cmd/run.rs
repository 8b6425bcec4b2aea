//! Boot a node (or a standalone relay).
//!
//! A node hosts the built-in capability agents plus the gateway's
//! requester identity, all sharing one transport: the in-process hub,
//! or one relay connection per agent when configured for a relay.

use agora_agents::{FileExecutor, MathExecutor, TextExecutor};
use agora_bus::{
    Agent, AllowListTrust, EventHooks, InProcessTransport, NoopHooks, RelayNode, RelayTransport,
    SecurityGate, SqliteStore, TaskExecutor, Transport,
};
use agora_types::config::{load_config, NodeConfig, TransportMode, TrustMode};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cli::{RelayArgs, RunArgs};

/// Run a relay until interrupted.
pub async fn run_relay(args: RelayArgs) -> anyhow::Result<()> {
    let (_relay, accept_task) = RelayNode::start(args.listen, args.secret).await?;
    accept_task.await?;
    Ok(())
}

/// Run a node until interrupted.
pub async fn run_node(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref());

    let hooks: Arc<dyn EventHooks> = if config.storage.enabled {
        Arc::new(SqliteStore::open(&config.storage.db_path)?)
    } else {
        Arc::new(NoopHooks)
    };

    let hub = Arc::new(InProcessTransport::new());
    let cwd = std::env::current_dir().context("cannot resolve working directory")?;
    let executors: Vec<(&str, &str, Vec<agora_types::Capability>, Arc<dyn TaskExecutor>)> = vec![
        (
            "math-1",
            "Math",
            MathExecutor::capabilities(),
            Arc::new(MathExecutor),
        ),
        (
            "text-1",
            "Text",
            TextExecutor::capabilities(),
            Arc::new(TextExecutor),
        ),
        (
            "files-1",
            "Files",
            FileExecutor::capabilities(),
            Arc::new(FileExecutor::new(vec![cwd])),
        ),
    ];

    let mut agents = Vec::new();
    for (id, name, capabilities, executor) in executors {
        let transport = transport_for(&config, &hub, id).await?;
        let gate = make_gate(&config, id);
        let agent = Agent::with_parts(
            id,
            name,
            capabilities,
            executor,
            transport,
            gate,
            Arc::clone(&hooks),
        );
        agent.initialize().await?;
        agents.push(agent);
    }

    let requester_transport = transport_for(&config, &hub, "gateway").await?;
    let requester = Agent::with_parts(
        "gateway",
        "Gateway",
        Vec::new(),
        Arc::new(NullExecutor),
        requester_transport,
        make_gate(&config, "gateway"),
        Arc::clone(&hooks),
    );
    requester.initialize().await?;

    info!(
        agents = agents.len(),
        transport = ?config.transport.mode,
        "Node is up"
    );

    if config.gateway.enabled {
        let state =
            agora_gateway::GatewayState::new(Arc::clone(&requester), agents.clone());
        let listener = tokio::net::TcpListener::bind(&config.gateway.listen_addr)
            .await
            .with_context(|| format!("cannot bind gateway on {}", config.gateway.listen_addr))?;
        tokio::select! {
            result = agora_gateway::serve(state, listener) => result?,
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutting down");
    for agent in &agents {
        agent.shutdown().await;
    }
    requester.shutdown().await;
    // Give inbound loops a beat to wind down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

/// Build the transport handle for one agent identity.
async fn transport_for(
    config: &NodeConfig,
    hub: &Arc<InProcessTransport>,
    client_id: &str,
) -> anyhow::Result<Arc<dyn Transport>> {
    match config.transport.mode {
        TransportMode::InProcess => Ok(Arc::clone(hub) as Arc<dyn Transport>),
        TransportMode::Relay => {
            let addr: SocketAddr = config
                .transport
                .relay_addr
                .parse()
                .with_context(|| format!("invalid relay_addr {}", config.transport.relay_addr))?;
            let transport =
                RelayTransport::connect(addr, &config.transport.shared_secret, client_id).await?;
            Ok(Arc::new(transport))
        }
    }
}

/// Build an agent's security gate from config.
fn make_gate(config: &NodeConfig, agent_id: &str) -> Arc<SecurityGate> {
    let gate = SecurityGate::new(agent_id).with_rate_limit(
        config.security.max_requests,
        Duration::from_secs(config.security.window_seconds),
    );
    let gate = match config.security.trust {
        TrustMode::Permissive => gate,
        TrustMode::AllowList => gate.with_trust_policy(Box::new(AllowListTrust::new(
            config.security.allow.iter().cloned(),
        ))),
    };
    Arc::new(gate)
}

/// Executor for the gateway identity, which only submits tasks.
struct NullExecutor;

#[async_trait::async_trait]
impl TaskExecutor for NullExecutor {
    async fn execute(
        &self,
        task_type: &str,
        _data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, agora_types::AgoraError> {
        Err(agora_types::AgoraError::UnknownCapability(
            task_type.to_string(),
        ))
    }
}
