//! Tool gateway trait - the abstraction over the external tool server.
//!
//! Tools are how the model reads and writes learning data: saving domains,
//! recording entries, listing what a user has studied. The gateway owns the
//! channel to wherever those tools actually run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ConnectionError, ToolError};

/// A tool as advertised by the tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's arguments
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

/// A model's request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique call ID (matches the model's tool_use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The textual outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    /// The invocation ID this result answers
    pub tool_invocation_id: String,

    pub text: String,

    #[serde(default)]
    pub is_error: bool,
}

impl ToolInvocationResult {
    pub fn success(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_invocation_id: id.into(),
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_invocation_id: id.into(),
            text: text.into(),
            is_error: true,
        }
    }

    /// Encode a tool failure as an error-flagged result.
    pub fn from_error(id: impl Into<String>, err: &ToolError) -> Self {
        Self::error(id, format!("Error: {err}"))
    }
}

/// The channel to the tool server.
///
/// `call_tool` never fails: transport, validation and remote errors all come
/// back as results with `is_error = true` so the model can see them.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "mcp").
    fn name(&self) -> &str;

    /// Establish the channel and populate the tool catalog.
    async fn connect(&self) -> std::result::Result<(), ConnectionError>;

    /// The cached catalog. Requires a prior successful `connect()`.
    fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, ConnectionError>;

    /// Execute one invocation.
    async fn call_tool(&self, invocation: &ToolInvocation) -> ToolInvocationResult;

    /// Release the channel. Idempotent.
    async fn close(&self);

    fn is_connected(&self) -> bool {
        self.list_tools().is_ok()
    }
}

/// The set of tools advertised by one connection, keyed by name.
///
/// Keeps the server's ordering so the model always sees the same catalog.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self { tools, index }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// All descriptors, in server order.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: json!({
                "type": "object",
                "properties": { "userId": { "type": "number" } },
                "required": ["userId"]
            }),
        }
    }

    #[test]
    fn catalog_lookup_and_order() {
        let catalog = ToolCatalog::new(vec![
            descriptor("saveDomains"),
            descriptor("getAllDomainsofUser"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("getAllDomainsofUser").is_some());
        assert!(catalog.get("nonexistent").is_none());
        assert_eq!(catalog.names(), vec!["saveDomains", "getAllDomainsofUser"]);
    }

    #[test]
    fn descriptor_uses_camel_case_schema_key() {
        let json = serde_json::to_value(descriptor("saveEntry")).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert!(json.get("input_schema").is_none());
    }

    #[test]
    fn descriptor_defaults_missing_fields() {
        let parsed: ToolDescriptor = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert_eq!(parsed.description, "");
        assert_eq!(parsed.input_schema, json!({"type": "object"}));
    }

    #[test]
    fn error_result_is_flagged() {
        let result = ToolInvocationResult::from_error("call_1", &ToolError::NotFound("nope".into()));
        assert!(result.is_error);
        assert_eq!(result.tool_invocation_id, "call_1");
        assert_eq!(result.text, "Error: Tool not found: nope");
    }
}
