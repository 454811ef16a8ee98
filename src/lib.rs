//! Toolstream - tool execution and event streaming for LLM-driven agents.
//!
//! Given the tool calls emitted by one LLM turn, this crate:
//! - Executes them in parallel or sequentially, isolating failures per call
//! - Lets tools stream progress, status, log, and custom events while they run
//! - Emits one ordered, typed event stream ending in a `tools_end` aggregate
//! - Bounds result text with a truncation policy
//! - Runs sub-agents as single tool calls with nested records
//! - Frames the stream as Server-Sent Events for axum
//!
//! # Example
//!
//! ```ignore
//! use toolstream::{
//!     BatchExecutor, PipelineConfig, ToolCallRequest, ToolContext, ToolEvent, ToolRegistry,
//! };
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(WebSearchTool::new(search_client));
//! tools.register(GetQuoteTool::new(market_data));
//!
//! let executor = BatchExecutor::new(Arc::new(tools), PipelineConfig::default())?;
//! let requests = vec![
//!     ToolCallRequest::new("call_a", "web_search", json!({"query": "NVDA earnings"})),
//!     ToolCallRequest::new("call_b", "get_quote", json!({"symbol": "AAPL"})),
//! ];
//!
//! let mut events = executor.execute(requests, ToolContext::new(session))?;
//! while let Some(envelope) = events.recv().await {
//!     println!("{}", toolstream::transport::encode_frame(&envelope));
//! }
//! ```

#![forbid(unsafe_code)]

mod config;
pub mod delegation;
mod error;
mod events;
mod executor;
mod hooks;
mod invoker;
mod schema;
mod stream_handler;
mod tools;
pub mod transport;
mod truncation;
mod types;

pub use config::{PipelineConfig, TruncationConfig};
pub use delegation::{DelegateTool, DelegationMonitor, SubAgent, SubAgentStep};
pub use error::{BatchError, ConfigError};
pub use events::{EventEnvelope, LogLevel, SequenceCounter, ToolEvent};
pub use executor::{BatchExecutor, BatchStream};
pub use hooks::{DefaultHooks, ExecutionHooks, LoggingHooks, ToolDecision};
pub use invoker::ToolInvoker;
pub use stream_handler::ToolStreamHandler;
pub use tools::{
    DynamicToolName, ErasedTool, Tool, ToolContext, ToolDefinition, ToolName, ToolRegistry,
    tool_name_from_str, tool_name_to_string,
};
pub use truncation::TruncationPolicy;
pub use types::{
    ExecutionMode, NestedToolCall, ToolCallRecord, ToolCallRequest, ToolCallStatus, ToolMessage,
    ToolResult,
};
