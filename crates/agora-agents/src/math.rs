//! Arithmetic capabilities.

use agora_bus::TaskExecutor;
use agora_types::capability::Capability;
use agora_types::error::AgoraError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Executes `add` and `multiply` over numeric operands.
pub struct MathExecutor;

impl MathExecutor {
    /// The capabilities this executor advertises.
    pub fn capabilities() -> Vec<Capability> {
        vec![
            Capability::new("add", "Add two numbers")
                .with_param("a", "number", "Left operand")
                .with_param("b", "number", "Right operand"),
            Capability::new("multiply", "Multiply two numbers")
                .with_param("a", "number", "Left operand")
                .with_param("b", "number", "Right operand"),
        ]
    }

    fn operand(data: &Map<String, Value>, key: &str) -> Result<f64, AgoraError> {
        data.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| AgoraError::InvalidInput(format!("missing numeric operand '{key}'")))
    }
}

#[async_trait]
impl TaskExecutor for MathExecutor {
    async fn execute(
        &self,
        task_type: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, AgoraError> {
        let a = Self::operand(data, "a")?;
        let b = Self::operand(data, "b")?;
        let result = match task_type {
            "add" => a + b,
            "multiply" => a * b,
            other => return Err(AgoraError::UnknownCapability(other.to_string())),
        };
        Ok(json!({ "result": result }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operands(a: i64, b: i64) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("a".to_string(), Value::from(a));
        data.insert("b".to_string(), Value::from(b));
        data
    }

    #[tokio::test]
    async fn test_add_and_multiply() {
        let executor = MathExecutor;
        let sum = executor.execute("add", &operands(2, 3)).await.unwrap();
        assert_eq!(sum, json!({ "result": 5.0 }));

        let product = executor
            .execute("multiply", &operands(4, 5))
            .await
            .unwrap();
        assert_eq!(product, json!({ "result": 20.0 }));
    }

    #[tokio::test]
    async fn test_missing_operand() {
        let executor = MathExecutor;
        let mut data = Map::new();
        data.insert("a".to_string(), Value::from(1));
        let outcome = executor.execute("add", &data).await;
        assert!(matches!(outcome, Err(AgoraError::InvalidInput(_))));
    }

    #[test]
    fn test_capability_list() {
        let caps = MathExecutor::capabilities();
        assert_eq!(caps.len(), 2);
        assert!(caps.iter().any(|c| c.name == "add"));
        assert!(caps.iter().all(|c| c.parameters.contains_key("a")));
    }
}
