use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::protocol::JsonMap;
use crate::domain::error::ToolError;

/// Catalog entry advertised through `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_schema(),
        }
    }

    /// Add a property to the input schema
    pub fn param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        if let Some(properties) = self.input_schema["properties"].as_object_mut() {
            properties.insert(
                name.to_string(),
                json!({ "type": kind, "description": description }),
            );
        }
        if required {
            if let Some(list) = self.input_schema["required"].as_array_mut() {
                list.push(name.into());
            }
        }
        self
    }
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

/// Named tools the server can dispatch to.
///
/// A tool result is a JSON object carrying a boolean `success`; operational
/// failures are reported that way. `ToolError` is reserved for calls that
/// never reached a handler.
#[async_trait]
pub trait ToolRegistry: Send {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn call_tool(&mut self, name: &str, arguments: &JsonMap) -> Result<Value, ToolError>;
}
