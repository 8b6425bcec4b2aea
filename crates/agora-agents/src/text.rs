//! Text transform capabilities.

use agora_bus::TaskExecutor;
use agora_types::capability::Capability;
use agora_types::error::AgoraError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Executes `echo`, `uppercase`, and `word_count` over input text.
pub struct TextExecutor;

impl TextExecutor {
    /// The capabilities this executor advertises.
    pub fn capabilities() -> Vec<Capability> {
        vec![
            Capability::new("echo", "Echo the input text back")
                .with_param("text", "string", "Text to echo"),
            Capability::new("uppercase", "Uppercase the input text")
                .with_param("text", "string", "Text to transform"),
            Capability::new("word_count", "Count words in the input text")
                .with_param("text", "string", "Text to count"),
        ]
    }

    fn text<'a>(data: &'a Map<String, Value>) -> Result<&'a str, AgoraError> {
        data.get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| AgoraError::InvalidInput("missing 'text' input".to_string()))
    }
}

#[async_trait]
impl TaskExecutor for TextExecutor {
    async fn execute(
        &self,
        task_type: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, AgoraError> {
        let text = Self::text(data)?;
        match task_type {
            "echo" => Ok(json!({ "result": text })),
            "uppercase" => Ok(json!({ "result": text.to_uppercase() })),
            "word_count" => Ok(json!({ "result": text.split_whitespace().count() })),
            other => Err(AgoraError::UnknownCapability(other.to_string())),
        }
    }
}
