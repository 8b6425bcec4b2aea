//! File-processing capabilities, confined to allowed root directories.
//!
//! Every path operand is canonicalized and checked against the allowed
//! roots before any filesystem access; traversal outside them is
//! refused.

use agora_bus::TaskExecutor;
use agora_types::capability::Capability;
use agora_types::error::AgoraError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Executes `read_file`, `write_file`, and `list_directory`.
pub struct FileExecutor {
    allowed_roots: Vec<PathBuf>,
}

impl FileExecutor {
    /// Create an executor confined to the given root directories.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self { allowed_roots }
    }

    /// The capabilities this executor advertises.
    pub fn capabilities() -> Vec<Capability> {
        vec![
            Capability::new("read_file", "Read a text file")
                .with_param("path", "string", "File to read"),
            Capability::new("write_file", "Write a text file")
                .with_param("path", "string", "File to write")
                .with_param("content", "string", "Content to write"),
            Capability::new("list_directory", "List a directory's entries")
                .with_param("path", "string", "Directory to list"),
        ]
    }

    fn path_operand(data: &Map<String, Value>) -> Result<&str, AgoraError> {
        data.get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| AgoraError::InvalidInput("missing 'path' input".to_string()))
    }

    /// Resolve a path and refuse anything outside the allowed roots.
    ///
    /// The parent directory is canonicalized (the file itself may not
    /// exist yet for writes), then the check runs against the resolved
    /// ancestor chain.
    fn resolve_allowed(&self, raw: &str) -> Result<PathBuf, AgoraError> {
        let path = Path::new(raw);
        let canonical = if path.exists() {
            path.canonicalize()?
        } else {
            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| {
                    AgoraError::InvalidInput(format!("path has no parent directory: {raw}"))
                })?;
            let file_name = path.file_name().ok_or_else(|| {
                AgoraError::InvalidInput(format!("path has no file name: {raw}"))
            })?;
            parent.canonicalize()?.join(file_name)
        };

        let allowed = self.allowed_roots.iter().any(|root| {
            root.canonicalize()
                .map(|root| canonical.starts_with(root))
                .unwrap_or(false)
        });
        if allowed {
            Ok(canonical)
        } else {
            debug!(path = %canonical.display(), "Refusing access outside allowed roots");
            Err(AgoraError::AccessDenied(format!(
                "path outside allowed roots: {raw}"
            )))
        }
    }

    async fn read_file(&self, data: &Map<String, Value>) -> Result<Value, AgoraError> {
        let path = self.resolve_allowed(Self::path_operand(data)?)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(json!({
            "path": path.display().to_string(),
            "content": content,
            "size": content.len(),
        }))
    }

    async fn write_file(&self, data: &Map<String, Value>) -> Result<Value, AgoraError> {
        let path = self.resolve_allowed(Self::path_operand(data)?)?;
        let content = data
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| AgoraError::InvalidInput("missing 'content' input".to_string()))?;
        tokio::fs::write(&path, content).await?;
        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }

    async fn list_directory(&self, data: &Map<String, Value>) -> Result<Value, AgoraError> {
        let path = self.resolve_allowed(Self::path_operand(data)?)?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(json!({
            "path": path.display().to_string(),
            "entries": entries,
        }))
    }
}

#[async_trait]
impl TaskExecutor for FileExecutor {
    async fn execute(
        &self,
        task_type: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, AgoraError> {
        match task_type {
            "read_file" => self.read_file(data).await,
            "write_file" => self.write_file(data).await,
            "list_directory" => self.list_directory(data).await,
            other => Err(AgoraError::UnknownCapability(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(path: &Path) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(
            "path".to_string(),
            Value::from(path.display().to_string()),
        );
        data
    }

    #[tokio::test]
    async fn test_write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FileExecutor::new(vec![dir.path().to_path_buf()]);

        let file = dir.path().join("notes.txt");
        let mut data = input(&file);
        data.insert("content".to_string(), Value::from("hello agora"));
        let written = executor.execute("write_file", &data).await.unwrap();
        assert_eq!(written["bytes_written"], json!(11));

        let read = executor.execute("read_file", &input(&file)).await.unwrap();
        assert_eq!(read["content"], json!("hello agora"));

        let listing = executor
            .execute("list_directory", &input(dir.path()))
            .await
            .unwrap();
        assert_eq!(listing["entries"], json!(["notes.txt"]));
    }

    #[tokio::test]
    async fn test_path_outside_roots_denied() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let executor = FileExecutor::new(vec![dir.path().to_path_buf()]);

        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "hidden").unwrap();

        let outcome = executor.execute("read_file", &input(&secret)).await;
        assert!(matches!(outcome, Err(AgoraError::AccessDenied(_))));

        // Traversal through the allowed root is caught by
        // canonicalization.
        let sneaky = dir.path().join("..").join("whatever.txt");
        let outcome = executor.execute("read_file", &input(&sneaky)).await;
        assert!(matches!(outcome, Err(AgoraError::AccessDenied(_))));
    }
}
