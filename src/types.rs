//! Core data model for the tool pipeline.
//!
//! - [`ToolCallRequest`]: One tool invocation requested by the LLM
//! - [`ToolResult`]: What a tool implementation returns
//! - [`ToolCallRecord`]: Immutable execution record built when a call finishes
//! - [`ToolMessage`]: Conversation-facing message, one per request
//! - [`ExecutionMode`]: Scheduling of the calls within one batch

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A single tool call requested by the LLM within one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique ID for this tool call (from LLM)
    pub id: String,
    /// Tool name string (for registry lookup)
    pub name: String,
    /// Tool arguments, a JSON object
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Terminal status of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Success,
    Error,
}

impl ToolCallStatus {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content on success, error message on failure
    pub output: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Reference to an artifact persisted by the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Records of tool calls made on behalf of this call (delegation)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_tools: Vec<NestedToolCall>,
    /// Duration of the tool execution in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    #[must_use]
    pub fn with_nested_tools(mut self, nested_tools: Vec<NestedToolCall>) -> Self {
        self.nested_tools = nested_tools;
        self
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Execution record of one finished tool call.
///
/// Records are built exactly once, by the task that finished the call, and
/// are never mutated afterwards. The batch's `tools_end` event carries one
/// record per request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub status: ToolCallStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    /// Truncated result text (empty for failed calls)
    pub result_summary: String,
    /// Truncated error message for failed calls
    pub error: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Tool calls issued by a delegated sub-agent on behalf of this call
    #[serde(
        rename = "nestedTools",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub nested_tools: Vec<NestedToolCall>,
}

/// A tool call made by a sub-agent, owned by its parent's record.
pub type NestedToolCall = ToolCallRecord;

impl ToolCallRecord {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Build the conversation-facing message for this call.
    #[must_use]
    pub fn to_tool_message(&self) -> ToolMessage {
        let content = match (&self.status, &self.error) {
            (ToolCallStatus::Success, _) => self.result_summary.clone(),
            (ToolCallStatus::Error, Some(error)) => {
                format!("Tool '{}' failed: {error}", self.name)
            }
            (ToolCallStatus::Error, None) => format!("Tool '{}' failed", self.name),
        };
        ToolMessage {
            role: ToolMessage::ROLE.to_string(),
            tool_call_id: self.id.clone(),
            name: self.name.clone(),
            content,
        }
    }
}

/// Tool result formatted for the conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub role: String,
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

impl ToolMessage {
    pub const ROLE: &'static str = "tool";
}

/// How the calls of one batch are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every call runs as its own task; the batch waits for all of them
    #[default]
    Parallel,
    /// Each call finishes before the next one starts
    Sequential,
}
