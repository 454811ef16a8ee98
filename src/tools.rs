//! Tool definition and registry.
//!
//! Tools are the capabilities the LLM can call. This module provides:
//!
//! - [`Tool`] trait - Define custom tools the LLM can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`DynamicToolName`] - Tool names created at runtime
//! - [`ToolRegistry`] - Name → validated schema + handler map
//! - [`ToolContext`] - Context passed to tool execution
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use toolstream::{DynamicToolName, Tool, ToolContext, ToolResult};
//!
//! struct QuoteTool;
//!
//! impl Tool<MyContext> for QuoteTool {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("get_quote") }
//!     fn description(&self) -> &'static str { "Latest quote for a ticker" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(&self, ctx: &ToolContext<MyContext>, input: Value) -> Result<ToolResult> {
//!         ctx.stream().emit_status("fetching", "Contacting market data provider");
//!         Ok(ToolResult::success("AAPL 189.12"))
//!     }
//! }
//! ```

use crate::schema::ArgumentValidator;
use crate::stream_handler::ToolStreamHandler;
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Tool Name Types
// ============================================================================

/// Marker trait for tool names.
///
/// Tool names must be serializable (for storage/logging) and deserializable
/// (for parsing from LLM responses). The string representation is derived
/// from serde serialization.
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "snake_case")]
/// pub enum MarketToolName {
///     GetQuote,
///     WebSearch,
/// }
///
/// impl ToolName for MarketToolName {}
/// ```
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Helper to get string representation of a tool name via serde.
///
/// Names that do not serialize to a JSON string fall back to their JSON text.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(error) => {
            log::warn!("Tool name failed to serialize: {error}");
            String::new()
        }
    }
}

/// Parse a tool name from string via serde.
///
/// # Errors
/// Returns error if the string doesn't match a valid tool name.
pub fn tool_name_from_str<N: ToolName>(s: &str) -> Result<N, serde_json::Error> {
    serde_json::from_value(Value::String(s.to_string()))
}

/// Dynamic tool name for runtime-created tools.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

// ============================================================================
// Tool Context
// ============================================================================

/// Context passed to tool execution
pub struct ToolContext<Ctx> {
    /// Application-specific context (user/session identifiers, credential handles)
    pub app: Ctx,
    /// Tool-specific metadata
    pub metadata: HashMap<String, Value>,
    stream: ToolStreamHandler,
    cancellation: CancellationToken,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub fn new(app: Ctx) -> Self {
        Self {
            app,
            metadata: HashMap::new(),
            stream: ToolStreamHandler::disabled(""),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Use `token` as the cancellation signal. Batches started with this
    /// context are cancelled together with it.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attach a stream handler, binding the context to its tool call.
    #[must_use]
    pub fn with_stream(mut self, stream: ToolStreamHandler) -> Self {
        self.stream = stream;
        self
    }

    /// Handler for emitting progress, status, log, and custom events.
    #[must_use]
    pub const fn stream(&self) -> &ToolStreamHandler {
        &self.stream
    }

    /// The tool call this context belongs to (empty outside a batch).
    #[must_use]
    pub fn tool_call_id(&self) -> &str {
        self.stream.tool_call_id()
    }

    /// Signal that fires when the batch is cancelled, the consumer goes
    /// away, or this call's deadline expires. Long-running tools should
    /// select on it.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derive the context for one call of a batch.
    pub(crate) fn for_call(
        &self,
        stream: ToolStreamHandler,
        cancellation: CancellationToken,
    ) -> Self
    where
        Ctx: Clone,
    {
        Self {
            app: self.app.clone(),
            metadata: self.metadata.clone(),
            stream,
            cancellation,
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Definition of a tool that can be called by the agent.
///
/// # Native Async Support
///
/// This trait uses Rust's native async functions in traits. You do NOT need
/// the `async_trait` crate to implement it.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input.
    ///
    /// Return `ToolResult::error` for expected failures; a returned `Err`
    /// is recorded the same way with its message verbatim.
    ///
    /// # Errors
    /// Returns an error if tool execution fails.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        input: Value,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

/// Name, description, and schema of a registered tool, for the LLM request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ============================================================================
// Type-Erased Tool (for Registry)
// ============================================================================

/// Type-erased tool trait for registry storage.
///
/// This allows tools with different `Name` associated types to be stored
/// in the same registry by erasing the type information.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    /// Get the tool name as a string.
    fn name_str(&self) -> &str;
    /// Get the tool description.
    fn description(&self) -> &str;
    /// Get the JSON schema for tool inputs.
    fn input_schema(&self) -> Value;
    /// Check arguments against the compiled input schema.
    ///
    /// # Errors
    /// Returns a description of the violations.
    fn validate_arguments(&self, arguments: &Value) -> Result<(), String>;
    /// Execute the tool with the given input.
    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult>;
}

/// Wrapper that erases the Name associated type from a Tool.
struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    validator: Option<ArgumentValidator>,
    _marker: PhantomData<fn(Ctx)>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        let validator = ArgumentValidator::compile(&name_cache, &tool.input_schema());
        Self {
            inner: tool,
            name_cache,
            validator,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn validate_arguments(&self, arguments: &Value) -> Result<(), String> {
        self.validator
            .as_ref()
            .map_or(Ok(()), |validator| validator.validate(arguments))
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        self.inner.execute(ctx, input).await
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of available tools.
///
/// Built once at startup. Lookup is by exact name; the invoker fails closed
/// on names that are not registered.
pub struct ToolRegistry<Ctx> {
    tools: HashMap<String, Arc<dyn ErasedTool<Ctx>>>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool in the registry.
    ///
    /// The tool's name is converted to a string via serde serialization and
    /// used as the lookup key; its input schema is compiled once here. A
    /// tool registered under an existing name replaces it.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        if self.tools.insert(name.clone(), Arc::new(wrapper)).is_some() {
            log::warn!("Tool '{name}' registered twice, keeping the latest");
        }
        self
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Filter tools by a predicate.
    ///
    /// Removes tools for which the predicate returns false.
    /// The predicate receives the tool name.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Tool definitions for the LLM request, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name_str().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}
