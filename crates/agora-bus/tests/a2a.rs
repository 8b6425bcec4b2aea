//! End-to-end tests: agents exchanging tasks over a shared transport.

use agora_bus::{Agent, InProcessTransport, RelayNode, RelayTransport, TaskError, TaskExecutor};
use agora_types::capability::Capability;
use agora_types::error::AgoraError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts invocations so tests can assert a handler never ran.
struct MathExecutor {
    calls: AtomicUsize,
}

impl MathExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskExecutor for MathExecutor {
    async fn execute(
        &self,
        task_type: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, AgoraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let a = data.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = data.get("b").and_then(Value::as_i64).unwrap_or(0);
        match task_type {
            "add" => Ok(json!({ "result": a + b })),
            "fail" => Err(AgoraError::Internal("deliberate failure".to_string())),
            other => Err(AgoraError::UnknownCapability(other.to_string())),
        }
    }
}

/// Executor for agents that only consume tasks.
struct NullExecutor;

#[async_trait]
impl TaskExecutor for NullExecutor {
    async fn execute(
        &self,
        task_type: &str,
        _data: &Map<String, Value>,
    ) -> Result<Value, AgoraError> {
        Err(AgoraError::UnknownCapability(task_type.to_string()))
    }
}

fn math_capabilities() -> Vec<Capability> {
    vec![
        Capability::new("add", "Add two numbers"),
        Capability::new("fail", "Always fails"),
    ]
}

async fn settle() {
    // Let announcements, welcomes, and responses drain.
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_end_to_end_add() {
    let hub = Arc::new(InProcessTransport::new());
    let executor = MathExecutor::new();

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        Arc::clone(&executor) as Arc<dyn TaskExecutor>,
        hub.clone(),
    );
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    calc.initialize().await.unwrap();
    requester.initialize().await.unwrap();
    settle().await;

    let mut data = Map::new();
    data.insert("a".to_string(), Value::from(2));
    data.insert("b".to_string(), Value::from(3));
    let outcome = requester
        .send_task("calc-1", "add", data, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(outcome, json!({ "result": 5 }));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    calc.shutdown().await;
    requester.shutdown().await;
}

#[tokio::test]
async fn test_unknown_capability_rejected_without_execution() {
    let hub = Arc::new(InProcessTransport::new());
    let executor = MathExecutor::new();

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        Arc::clone(&executor) as Arc<dyn TaskExecutor>,
        hub.clone(),
    );
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    calc.initialize().await.unwrap();
    requester.initialize().await.unwrap();
    settle().await;

    let outcome = requester
        .send_task("calc-1", "subtract", Map::new(), Duration::from_secs(5))
        .await;

    match outcome {
        Err(TaskError::Rejected { agent, reason }) => {
            assert_eq!(agent, "calc-1");
            assert!(reason.contains("subtract"), "error must name the capability: {reason}");
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }
    // The executor was never invoked.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

    calc.shutdown().await;
    requester.shutdown().await;
}

#[tokio::test]
async fn test_execution_failure_becomes_failed_response() {
    let hub = Arc::new(InProcessTransport::new());

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        MathExecutor::new() as Arc<dyn TaskExecutor>,
        hub.clone(),
    );
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    calc.initialize().await.unwrap();
    requester.initialize().await.unwrap();
    settle().await;

    let outcome = requester
        .send_task("calc-1", "fail", Map::new(), Duration::from_secs(5))
        .await;
    match outcome {
        Err(TaskError::Rejected { reason, .. }) => {
            assert!(reason.contains("deliberate failure"));
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }
    // The inbound loop survived the failing task.
    assert!(calc.health().connected);

    calc.shutdown().await;
    requester.shutdown().await;
}

#[tokio::test]
async fn test_timeout_against_silent_recipient() {
    let hub = Arc::new(InProcessTransport::new());
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );
    requester.initialize().await.unwrap();

    let started = Instant::now();
    let outcome = requester
        .send_task("ghost", "add", Map::new(), Duration::from_secs(1))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(outcome, Err(TaskError::Timeout { .. })));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500));

    requester.shutdown().await;
}

#[tokio::test]
async fn test_announcement_updates_peer_directories_only() {
    let hub = Arc::new(InProcessTransport::new());

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        MathExecutor::new() as Arc<dyn TaskExecutor>,
        hub.clone(),
    );
    let observer_b = Agent::new(
        "observer-b",
        "ObserverB",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );
    let observer_c = Agent::new(
        "observer-c",
        "ObserverC",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    observer_b.initialize().await.unwrap();
    observer_c.initialize().await.unwrap();
    calc.initialize().await.unwrap();
    settle().await;

    // Every other subscribed agent observed the broadcast...
    let seen_by_b = observer_b.peer("calc-1").expect("B observed calc");
    assert_eq!(seen_by_b.name, "Calculator");
    assert!(seen_by_b.capabilities.iter().any(|c| c.name == "add"));
    assert!(observer_c.peer("calc-1").is_some());

    // ...while the sender's own loop discarded its own broadcast: the
    // directory never lists the agent itself, and its registry is
    // untouched.
    assert!(calc.peer("calc-1").is_none());
    assert_eq!(calc.registry().len(), 2);

    calc.shutdown().await;
    observer_b.shutdown().await;
    observer_c.shutdown().await;
}

#[tokio::test]
async fn test_health_probe() {
    let hub = Arc::new(InProcessTransport::new());
    let agent = Agent::new(
        "solo",
        "Solo",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    assert!(!agent.health().connected);
    agent.initialize().await.unwrap();

    let health = agent.health();
    assert!(health.connected);
    assert_eq!(health.handlers_registered, 5);
    assert_eq!(health.pending_tasks, 0);
    assert_eq!(health.active_tasks, 0);

    agent.shutdown().await;
    assert!(!agent.health().connected);
}

#[tokio::test]
async fn test_end_to_end_over_relay() {
    let (relay, _relay_task) = RelayNode::start("127.0.0.1:0".parse().unwrap(), "e2e-secret")
        .await
        .unwrap();

    let calc_transport = RelayTransport::connect(relay.local_addr(), "e2e-secret", "calc-1")
        .await
        .unwrap();
    let requester_transport =
        RelayTransport::connect(relay.local_addr(), "e2e-secret", "requester-1")
            .await
            .unwrap();

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        MathExecutor::new() as Arc<dyn TaskExecutor>,
        Arc::new(calc_transport),
    );
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        Arc::new(requester_transport),
    );

    calc.initialize().await.unwrap();
    requester.initialize().await.unwrap();
    settle().await;

    let mut data = Map::new();
    data.insert("a".to_string(), Value::from(20));
    data.insert("b".to_string(), Value::from(22));
    let outcome = requester
        .send_task("calc-1", "add", data, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, json!({ "result": 42 }));

    calc.shutdown().await;
    requester.shutdown().await;
}

#[tokio::test]
async fn test_fire_and_forget_submit_then_poll() {
    let hub = Arc::new(InProcessTransport::new());

    let calc = Agent::new(
        "calc-1",
        "Calculator",
        math_capabilities(),
        MathExecutor::new() as Arc<dyn TaskExecutor>,
        hub.clone(),
    );
    let requester = Agent::new(
        "requester-1",
        "Requester",
        Vec::new(),
        Arc::new(NullExecutor),
        hub.clone(),
    );

    calc.initialize().await.unwrap();
    requester.initialize().await.unwrap();
    settle().await;

    let mut data = Map::new();
    data.insert("a".to_string(), Value::from(1));
    data.insert("b".to_string(), Value::from(2));
    let task_id = requester.submit_task("calc-1", "add", data, Duration::from_secs(5));

    let deadline = Instant::now() + Duration::from_secs(5);
    let record = loop {
        let record = requester.poll_result(&task_id).expect("task is tracked");
        if record.state != agora_bus::TaskState::Pending {
            break record;
        }
        assert!(Instant::now() < deadline, "task never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(record.state, agora_bus::TaskState::Completed);
    assert_eq!(record.result.unwrap(), json!({ "result": 3 }));

    calc.shutdown().await;
    requester.shutdown().await;
}
