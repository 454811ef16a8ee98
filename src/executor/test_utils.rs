use super::BatchStream;
use crate::events::{EventEnvelope, LogLevel, ToolEvent};
use crate::tools::{DynamicToolName, Tool, ToolContext, ToolRegistry};
use crate::types::{ToolCallRecord, ToolMessage, ToolResult};
use anyhow::{Result, bail};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ===================
// Mock Tools
// ===================

/// Returns its `message` argument.
pub struct EchoTool;

impl Tool<()> for EchoTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("echo")
    }

    fn description(&self) -> &str {
        "Echo the message back"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        let message = input["message"].as_str().unwrap_or_default();
        Ok(ToolResult::success(message))
    }
}

/// Always fails by raising an error.
pub struct FailingTool;

impl Tool<()> for FailingTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("fail")
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        bail!("upstream returned 503")
    }
}

/// Panics inside its body.
pub struct PanickingTool;

impl Tool<()> for PanickingTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("panic")
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    #[allow(clippy::unused_async)]
    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        panic!("index out of bounds")
    }
}

/// Sleeps for `ms` milliseconds, reporting progress on the way.
///
/// Tracks how many instances run at the same time.
pub struct SlowTool {
    pub running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
}

impl SlowTool {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Tool<()> for SlowTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("slow")
    }

    fn description(&self) -> &str {
        "Sleep for a while"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ms": { "type": "integer", "minimum": 0 } }
        })
    }

    async fn execute(&self, ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let ms = input["ms"].as_u64().unwrap_or(10);
        ctx.stream().emit_progress(0.0, "starting");
        tokio::time::sleep(Duration::from_millis(ms / 2)).await;
        ctx.stream().emit_progress(50.0, "half way");
        tokio::time::sleep(Duration::from_millis(ms - ms / 2)).await;
        ctx.stream().emit_progress(100.0, "done");

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolResult::success(format!("slept {ms}ms")))
    }
}

/// Sleeps for a minute unless cancelled.
pub struct StuckTool;

impl Tool<()> for StuckTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("stuck")
    }

    fn description(&self) -> &str {
        "Never finishes on its own"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(60)) => Ok(ToolResult::success("woke up")),
            () = ctx.cancellation().cancelled() => Ok(ToolResult::error("stopped early")),
        }
    }
}

/// Emits status, progress, and log events, then returns results.
pub struct WebSearchTool;

impl Tool<()> for WebSearchTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("web_search")
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        let query = input["query"].as_str().unwrap_or_default();
        ctx.stream().emit_status("searching", format!("Searching for {query}"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        ctx.stream().emit_progress(50.0, "Fetched 3 pages");
        ctx.stream().emit_log(LogLevel::Info, "3 results");
        ctx.stream().emit("sources", json!({ "count": 3 }));
        Ok(ToolResult::success(format!("3 results for {query}")).with_resource_id("search_1"))
    }
}

/// Returns a fixed quote, or an error result for unknown symbols.
pub struct GetQuoteTool;

impl Tool<()> for GetQuoteTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("get_quote")
    }

    fn description(&self) -> &str {
        "Latest quote for a ticker"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "symbol": { "type": "string" } },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        let symbol = input["symbol"].as_str().unwrap_or_default();
        ctx.stream().emit_status("fetching", format!("Quote for {symbol}"));
        if symbol == "AAPL" {
            Ok(ToolResult::success("AAPL 189.12"))
        } else {
            Ok(ToolResult::error(format!("Unknown symbol: {symbol}")))
        }
    }
}

/// Emits a sub-event from a detached task after it has returned.
pub struct LeakyTool;

impl Tool<()> for LeakyTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("leaky")
    }

    fn description(&self) -> &str {
        "Keeps talking after it finished"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        let stream = ctx.stream().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            stream.emit_status("late", "after completion");
        });
        Ok(ToolResult::success("done"))
    }
}

/// Returns a long output to exercise truncation.
pub struct VerboseTool;

impl Tool<()> for VerboseTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("verbose")
    }

    fn description(&self) -> &str {
        "Produces a lot of text"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        Ok(ToolResult::success("é".repeat(500)))
    }
}

// ===================
// Helpers
// ===================

pub fn test_registry() -> ToolRegistry<()> {
    let mut registry = ToolRegistry::new();
    registry
        .register(EchoTool)
        .register(FailingTool)
        .register(PanickingTool)
        .register(SlowTool::new())
        .register(StuckTool)
        .register(WebSearchTool)
        .register(GetQuoteTool)
        .register(LeakyTool)
        .register(VerboseTool);
    registry
}

pub async fn collect(stream: BatchStream) -> Vec<EventEnvelope> {
    stream.collect().await
}

pub fn kinds(events: &[EventEnvelope]) -> Vec<String> {
    events.iter().map(|e| e.event.kind().into_owned()).collect()
}

/// Kinds of the events owned by `id`, in stream order.
pub fn kinds_for(events: &[EventEnvelope], id: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.event.tool_call_id() == Some(id))
        .map(|e| e.event.kind().into_owned())
        .collect()
}

pub fn position(events: &[EventEnvelope], kind: &str, id: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| e.event.kind() == kind && e.event.tool_call_id() == Some(id))
}

/// The payload of the terminal `tools_end` event.
pub fn tools_end(events: &[EventEnvelope]) -> (Vec<ToolMessage>, Vec<ToolCallRecord>) {
    match events.last().map(|e| &e.event) {
        Some(ToolEvent::ToolsEnd {
            tool_messages,
            execution_results,
        }) => (tool_messages.clone(), execution_results.clone()),
        other => panic!("expected tools_end last, got {other:?}"),
    }
}

pub fn record<'a>(results: &'a [ToolCallRecord], id: &str) -> &'a ToolCallRecord {
    results
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no record for {id}"))
}
