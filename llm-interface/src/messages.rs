//! Wire types for the Messages API.
//!
//! Response content blocks stay as raw JSON: the assistant turn has to be
//! echoed back verbatim in a tool continuation, including block kinds this
//! crate never inspects (thinking signatures, remote tool calls).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_blocks(blocks: Vec<Value>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn user_blocks(blocks: Vec<Value>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self { kind: "auto" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled",
            budget_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolConfiguration {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
}

/// A remote MCP server the provider connects to on our behalf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpServer {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_configuration: Option<ToolConfiguration>,
}

impl McpServer {
    pub fn url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: "url",
            name: name.into(),
            url: url.into(),
            authorization_token: None,
            tool_configuration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServer>,
}

impl MessagesRequest {
    pub fn uses_mcp(&self) -> bool {
        !self.mcp_servers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl MessagesResponse {
    /// Concatenation of every `text` block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block_type(block) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect()
    }

    pub fn stopped_for_tool_use(&self) -> bool {
        self.stop_reason.as_deref() == Some("tool_use")
    }

    /// Local `tool_use` blocks. Remote MCP calls are resolved upstream and
    /// not listed.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter(|block| block_type(block) == Some("tool_use"))
            .filter_map(|block| serde_json::from_value(block.clone()).ok())
            .collect()
    }
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

pub fn tool_result_block(tool_use_id: &str, content: &str) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_disabled_options() {
        let request = MessagesRequest {
            model: "m".to_string(),
            max_tokens: 100,
            system: String::new(),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            tool_choice: None,
            thinking: None,
            mcp_servers: Vec::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "m",
                "max_tokens": 100,
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    #[test]
    fn test_response_helpers() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "thinking", "thinking": "...", "signature": "sig" },
                { "type": "text", "text": "Let me check. " },
                { "type": "tool_use", "id": "tu_1", "name": "get_priority_reference", "input": { "query": "refund" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 12, "output_tokens": 34 }
        }))
        .unwrap();

        assert!(response.stopped_for_tool_use());
        assert_eq!(response.text(), "Let me check. ");
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "tu_1");
        assert_eq!(calls[0].input["query"], "refund");
        assert_eq!(response.usage.unwrap().output_tokens, 34);
    }
}
