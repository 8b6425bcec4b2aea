//! Capability descriptors — named operations an agent can execute.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes one parameter a capability accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter type, e.g. `"string"`, `"number"`, `"object"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// What the parameter means.
    pub description: String,
}

/// A named operation an agent advertises and can execute.
///
/// Capability names are unique within one agent's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Operation name, e.g. `"add"` or `"read_file"`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared parameters, keyed by name.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    /// Capability version.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Capability {
    /// Create a capability with no declared parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            version: default_version(),
        }
    }

    /// Declare a parameter, consuming and returning the capability.
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            ParamSpec {
                type_name: type_name.into(),
                description: description.into(),
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_serialization() {
        let cap = Capability::new("add", "Add two numbers")
            .with_param("a", "number", "Left operand")
            .with_param("b", "number", "Right operand");

        let json = serde_json::to_string(&cap).unwrap();
        assert!(json.contains("\"version\":\"1.0.0\""));
        assert!(json.contains("\"type\":\"number\""));

        let decoded: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.name, "add");
        assert_eq!(decoded.parameters.len(), 2);
    }

    #[test]
    fn test_version_defaults_when_absent() {
        let decoded: Capability =
            serde_json::from_str(r#"{"name":"echo","description":"Echo back"}"#).unwrap();
        assert_eq!(decoded.version, "1.0.0");
        assert!(decoded.parameters.is_empty());
    }
}
