//! Execution lifecycle hooks for customization.
//!
//! Hooks allow you to intercept tool execution at key points:
//!
//! - [`ExecutionHooks::pre_tool_use`] - Allow or block a call before it runs
//! - [`ExecutionHooks::post_tool_use`] - React to a finished call
//! - [`ExecutionHooks::on_event`] - Observe every event before it is emitted
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - Allows every tool, observes nothing
//! - [`LoggingHooks`] - Debug logging for all calls and events

use crate::events::ToolEvent;
use crate::types::ToolCallRecord;
use async_trait::async_trait;
use serde_json::Value;

/// Decision returned by pre-tool hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    /// Allow the tool to execute
    Allow,
    /// Block the tool execution with a message
    Block(String),
}

/// Lifecycle hooks for the batch executor.
/// Implement this trait to customize execution.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Called after argument validation, before a tool is executed.
    /// A blocked call completes with an error and the tool never runs.
    async fn pre_tool_use(&self, _tool_name: &str, _arguments: &Value) -> ToolDecision {
        ToolDecision::Allow
    }

    /// Called once a call's record is final.
    async fn post_tool_use(&self, _record: &ToolCallRecord) {
        // Default: no-op
    }

    /// Called for every event the executor emits, including sub-events.
    async fn on_event(&self, _event: &ToolEvent) {
        // Default: no-op
    }
}

/// Default hooks implementation: allow everything
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

#[async_trait]
impl ExecutionHooks for DefaultHooks {}

/// Hooks that log all calls and events (useful for debugging)
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHooks;

#[async_trait]
impl ExecutionHooks for LoggingHooks {
    async fn pre_tool_use(&self, tool_name: &str, arguments: &Value) -> ToolDecision {
        tracing::debug!(tool = tool_name, ?arguments, "Pre-tool use");
        ToolDecision::Allow
    }

    async fn post_tool_use(&self, record: &ToolCallRecord) {
        tracing::debug!(
            tool = %record.name,
            tool_call_id = %record.id,
            status = ?record.status,
            duration_ms = record.duration_ms,
            "Post-tool use"
        );
    }

    async fn on_event(&self, event: &ToolEvent) {
        tracing::debug!(kind = %event.kind(), ?event, "Tool event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DenyTrades;

    #[async_trait]
    impl ExecutionHooks for DenyTrades {
        async fn pre_tool_use(&self, tool_name: &str, _arguments: &Value) -> ToolDecision {
            if tool_name == "place_order" {
                ToolDecision::Block("trading disabled".to_string())
            } else {
                ToolDecision::Allow
            }
        }
    }

    #[tokio::test]
    async fn test_default_hooks_allow() {
        let decision = DefaultHooks.pre_tool_use("anything", &json!({})).await;
        assert_eq!(decision, ToolDecision::Allow);
    }

    #[tokio::test]
    async fn test_logging_hooks_allow() {
        let decision = LoggingHooks.pre_tool_use("web_search", &json!({"q": 1})).await;
        assert_eq!(decision, ToolDecision::Allow);
    }

    #[tokio::test]
    async fn test_custom_hooks_can_block() {
        let hooks = DenyTrades;
        assert_eq!(
            hooks.pre_tool_use("place_order", &json!({})).await,
            ToolDecision::Block("trading disabled".to_string())
        );
        assert_eq!(
            hooks.pre_tool_use("get_quote", &json!({})).await,
            ToolDecision::Allow
        );
    }
}
