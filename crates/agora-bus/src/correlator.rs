//! Request/response correlation over the asynchronous bus.
//!
//! `send_task` records a pending entry keyed by a fresh task id,
//! publishes a `TaskRequest`, and suspends the caller on a oneshot
//! until the matching `TaskResponse` resolves it or the deadline
//! elapses. No polling anywhere: the wait is a blocking receive with
//! timeout.
//!
//! A timeout releases the caller only; the remote side may still
//! complete the task afterwards, and its late response is silently
//! ignored. Resolution is single-assignment — the entry leaves the
//! table on first resolution, so duplicates are no-ops.

use agora_types::envelope::{Envelope, EnvelopeKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::Bus;
use crate::error::{BusError, TaskError};
use crate::hooks::EventHooks;

/// A task awaiting its response.
struct PendingTask {
    created_at: Instant,
    deadline: Instant,
    /// Single-assignment result slot; consumed on resolution.
    slot: oneshot::Sender<Map<String, Value>>,
}

/// Terminal state of a tracked (fire-and-forget) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
}

/// Caller-visible record of a tracked task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pending-task table plus the synchronous `send_task` entry point.
pub struct Correlator {
    bus: Arc<Bus>,
    hooks: Arc<dyn EventHooks>,
    pending: Mutex<HashMap<String, PendingTask>>,
    tracked: Mutex<HashMap<String, TaskRecord>>,
}

impl Correlator {
    /// Create a correlator publishing through the given bus.
    pub fn new(bus: Arc<Bus>, hooks: Arc<dyn EventHooks>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            hooks,
            pending: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashMap::new()),
        })
    }

    /// Send a task to another agent and wait for its result.
    ///
    /// Returns the carried result on `success = true`, a
    /// [`TaskError::Rejected`] carrying the remote error on
    /// `success = false`, and [`TaskError::Timeout`] when no response
    /// arrives in time.
    pub async fn send_task(
        &self,
        recipient: &str,
        task_type: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.send_task_with_id(&task_id, recipient, task_type, data, timeout)
            .await
    }

    async fn send_task_with_id(
        &self,
        task_id: &str,
        recipient: &str,
        task_type: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            pending.insert(
                task_id.to_string(),
                PendingTask {
                    created_at: now,
                    deadline: now + timeout,
                    slot: tx,
                },
            );
        }

        let mut payload = Map::new();
        payload.insert("task_id".to_string(), Value::from(task_id));
        payload.insert("task_type".to_string(), Value::from(task_type));
        payload.insert("data".to_string(), Value::Object(data));
        let request = Envelope::new(EnvelopeKind::TaskRequest, self.bus.agent_id(), recipient)
            .with_payload(payload)
            .expecting_response();

        if let Err(e) = self.bus.send(request).await {
            self.remove_pending(task_id);
            return Err(TaskError::Bus(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Self::interpret(recipient, response),
            Ok(Err(_)) => {
                // The slot vanished without being resolved — shutdown.
                Err(TaskError::Bus(BusError::ConnectionClosed))
            }
            Err(_) => {
                self.remove_pending(task_id);
                debug!(task_id, recipient, "Task timed out");
                Err(TaskError::Timeout {
                    task_id: task_id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Drop a pending entry without resolving it (send failure or timeout).
    fn remove_pending(&self, task_id: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(task_id);
    }

    /// Resolve a pending task with a response payload. Returns false
    /// when the id is unknown or already resolved — duplicates and late
    /// responses land here and are ignored.
    pub fn resolve(&self, task_id: &str, response: Map<String, Value>) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(task_id)
        };
        match entry {
            Some(task) => {
                if Instant::now() > task.deadline {
                    debug!(task_id, "Response arrived past its deadline");
                }
                // The receiver may have just timed out; that race is
                // benign and the send result is irrelevant.
                let _ = task.slot.send(response);
                true
            }
            None => {
                debug!(task_id, "Ignoring response for unknown or resolved task");
                false
            }
        }
    }

    /// Submit a task without waiting: the caller gets the task id
    /// immediately and polls [`Self::poll_result`] later.
    pub fn submit_task(
        self: Arc<Self>,
        recipient: &str,
        task_type: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked.insert(
                task_id.clone(),
                TaskRecord {
                    task_id: task_id.clone(),
                    state: TaskState::Pending,
                    result: None,
                    error: None,
                    submitted_at: Utc::now(),
                    completed_at: None,
                },
            );
        }

        let correlator = Arc::clone(&self);
        let id = task_id.clone();
        let recipient = recipient.to_string();
        let task_type = task_type.to_string();
        tokio::spawn(async move {
            let outcome = correlator
                .send_task_with_id(&id, &recipient, &task_type, data, timeout)
                .await;
            correlator.finish_tracked(&id, outcome);
        });

        task_id
    }

    fn finish_tracked(&self, task_id: &str, outcome: Result<Value, TaskError>) {
        let (state, result, error) = match outcome {
            Ok(value) => (TaskState::Completed, Some(value), None),
            Err(e) => (TaskState::Failed, None, Some(e.to_string())),
        };

        let status = match state {
            TaskState::Completed => "completed",
            _ => "failed",
        };
        self.hooks
            .on_task_result(task_id, status, result.as_ref(), error.as_deref());

        let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        match tracked.get_mut(task_id) {
            Some(record) => {
                record.state = state;
                record.result = result;
                record.error = error;
                record.completed_at = Some(Utc::now());
            }
            None => warn!(task_id, "Finished task was never tracked"),
        }
    }

    /// Current record of a submitted task.
    pub fn poll_result(&self, task_id: &str) -> Option<TaskRecord> {
        let tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        tracked.get(task_id).cloned()
    }

    /// Number of tasks currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.len()
    }

    /// How long the oldest pending task has been waiting.
    pub fn oldest_pending(&self) -> Option<Duration> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .values()
            .map(|t| t.created_at.elapsed())
            .max()
    }

    /// Interpret a response payload as result-or-error.
    fn interpret(recipient: &str, response: Map<String, Value>) -> Result<Value, TaskError> {
        let success = response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if success {
            Ok(response.get("result").cloned().unwrap_or(Value::Null))
        } else {
            let reason = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("task failed")
                .to_string();
            Err(TaskError::Rejected {
                agent: recipient.to_string(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::memory::InProcessTransport;
    use crate::security::SecurityGate;
    use crate::transport::Transport;

    fn make_correlator() -> Arc<Correlator> {
        let transport: Arc<dyn Transport> = Arc::new(InProcessTransport::new());
        let bus = Bus::new(
            "tester",
            transport,
            Arc::new(SecurityGate::new("tester")),
            Arc::new(NoopHooks),
        );
        Correlator::new(bus, Arc::new(NoopHooks))
    }

    fn success_payload(result: i64) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("success".to_string(), Value::from(true));
        payload.insert("result".to_string(), Value::from(result));
        payload
    }

    #[tokio::test]
    async fn test_resolution_unblocks_caller() {
        let correlator = make_correlator();

        let inner = Arc::clone(&correlator);
        let waiter = tokio::spawn(async move {
            inner
                .send_task("calc", "add", Map::new(), Duration::from_secs(5))
                .await
        });

        // Wait until the pending entry exists, then resolve it the way
        // the dispatcher would.
        let task_id = loop {
            let ids: Vec<String> = {
                let pending = correlator.pending.lock().unwrap();
                pending.keys().cloned().collect()
            };
            if let Some(id) = ids.first() {
                break id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert!(correlator.resolve(&task_id, success_payload(5)));
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, Value::from(5));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_is_single_assignment() {
        let correlator = make_correlator();

        let inner = Arc::clone(&correlator);
        let waiter = tokio::spawn(async move {
            inner
                .send_task("calc", "add", Map::new(), Duration::from_secs(5))
                .await
        });

        let task_id = loop {
            let ids: Vec<String> = {
                let pending = correlator.pending.lock().unwrap();
                pending.keys().cloned().collect()
            };
            if let Some(id) = ids.first() {
                break id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert!(correlator.resolve(&task_id, success_payload(5)));
        // A duplicate response for the same id is a no-op.
        assert!(!correlator.resolve(&task_id, success_payload(99)));

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, Value::from(5));
    }

    #[tokio::test]
    async fn test_timeout_when_nobody_answers() {
        let correlator = make_correlator();
        let started = Instant::now();

        let outcome = correlator
            .send_task("ghost", "add", Map::new(), Duration::from_secs(1))
            .await;

        let elapsed = started.elapsed();
        assert!(matches!(outcome, Err(TaskError::Timeout { .. })));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1500));
        // The entry is gone; a late response is ignored.
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_response_surfaces_remote_error() {
        let correlator = make_correlator();

        let inner = Arc::clone(&correlator);
        let waiter = tokio::spawn(async move {
            inner
                .send_task("calc", "divide", Map::new(), Duration::from_secs(5))
                .await
        });

        let task_id = loop {
            let ids: Vec<String> = {
                let pending = correlator.pending.lock().unwrap();
                pending.keys().cloned().collect()
            };
            if let Some(id) = ids.first() {
                break id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let mut payload = Map::new();
        payload.insert("success".to_string(), Value::from(false));
        payload.insert("error".to_string(), Value::from("division by zero"));
        correlator.resolve(&task_id, payload);

        match waiter.await.unwrap() {
            Err(TaskError::Rejected { agent, reason }) => {
                assert_eq!(agent, "calc");
                assert_eq!(reason, "division by zero");
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let correlator = make_correlator();

        let task_id = Arc::clone(&correlator).submit_task(
            "ghost",
            "add",
            Map::new(),
            Duration::from_millis(100),
        );

        let record = correlator.poll_result(&task_id).unwrap();
        assert_eq!(record.state, TaskState::Pending);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let record = correlator.poll_result(&task_id).unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.unwrap().contains("timed out"));
        assert!(correlator.poll_result("no-such-task").is_none());
    }
}
