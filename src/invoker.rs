//! Resolution and execution of a single tool call.

use crate::hooks::{DefaultHooks, ExecutionHooks, ToolDecision};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ToolCallRequest, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Convert u128 milliseconds to u64, capping at `u64::MAX`
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

enum Outcome {
    Finished(anyhow::Result<ToolResult>),
    TimedOut(Duration),
    Cancelled,
}

/// Runs one [`ToolCallRequest`] against a [`ToolRegistry`].
///
/// Every failure mode is folded into an error [`ToolResult`]; `invoke`
/// itself never fails.
pub struct ToolInvoker<Ctx> {
    registry: Arc<ToolRegistry<Ctx>>,
    hooks: Arc<dyn ExecutionHooks>,
    timeout: Option<Duration>,
}

impl<Ctx> Clone for ToolInvoker<Ctx> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            hooks: Arc::clone(&self.hooks),
            timeout: self.timeout,
        }
    }
}

impl<Ctx: Send + Sync + 'static> ToolInvoker<Ctx> {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry<Ctx>>) -> Self {
        Self {
            registry,
            hooks: Arc::new(DefaultHooks),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Per-call deadline. `None` lets tools run until they finish or the
    /// batch is cancelled.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry<Ctx>> {
        &self.registry
    }

    #[must_use]
    pub const fn hooks(&self) -> &Arc<dyn ExecutionHooks> {
        &self.hooks
    }

    /// Execute `request`.
    ///
    /// - unregistered name: `Unknown tool: <name>`
    /// - schema violation: `Invalid arguments for '<name>': ...`, tool not run
    /// - blocked by hooks: `Blocked: <reason>`, tool not run
    /// - deadline: `Tool '<name>' timed out after <n>ms`, context cancelled
    /// - raised error: the error's message
    pub async fn invoke(&self, request: &ToolCallRequest, ctx: &ToolContext<Ctx>) -> ToolResult {
        let Some(tool) = self.registry.get(&request.name) else {
            return ToolResult::error(format!("Unknown tool: {}", request.name));
        };

        if let Err(reason) = tool.validate_arguments(&request.arguments) {
            return ToolResult::error(format!(
                "Invalid arguments for '{}': {reason}",
                request.name
            ));
        }

        if let ToolDecision::Block(reason) = self
            .hooks
            .pre_tool_use(&request.name, &request.arguments)
            .await
        {
            return ToolResult::error(format!("Blocked: {reason}"));
        }

        if ctx.is_cancelled() {
            return ToolResult::error(format!("Tool '{}' was cancelled", request.name));
        }

        let tool_start = Instant::now();
        let deadline = async {
            match self.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            result = tool.execute(ctx, request.arguments.clone()) => Outcome::Finished(result),
            limit = deadline => Outcome::TimedOut(limit),
            () = ctx.cancellation().cancelled() => Outcome::Cancelled,
        };
        let elapsed = millis_to_u64(tool_start.elapsed().as_millis());

        let result = match outcome {
            Outcome::Finished(Ok(result)) => result,
            Outcome::Finished(Err(error)) => ToolResult::error(error.to_string()),
            Outcome::TimedOut(limit) => {
                ctx.cancellation().cancel();
                log::debug!("Tool call {} ({}) hit its deadline", request.id, request.name);
                ToolResult::error(format!(
                    "Tool '{}' timed out after {}ms",
                    request.name,
                    millis_to_u64(limit.as_millis())
                ))
            }
            Outcome::Cancelled => {
                ToolResult::error(format!("Tool '{}' was cancelled", request.name))
            }
        };

        if result.duration_ms.is_some() {
            result
        } else {
            result.with_duration(elapsed)
        }
    }
}
