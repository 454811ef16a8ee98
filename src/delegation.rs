//! Delegation of a task to a sub-agent, exposed as a single tool call.
//!
//! [`DelegateTool`] is registered like any other tool under the name
//! `delegate_execution`. When called it drives a [`SubAgent`] step by step;
//! each step's tool calls run in a nested [`BatchExecutor`] over the
//! delegate's own registry. The outer stream never sees the nested calls as
//! top-level events:
//!
//! - nested lifecycle changes are re-emitted as `tool_delegation` sub-events
//!   of the outer call
//! - the sub-agent's thinking is re-emitted as `tool_thinking` sub-events
//! - the nested records end up in the outer record's `nestedTools`
//!
//! The outer call fails only when the sub-agent reports failure, errors, or
//! runs out of steps. A failing nested call is just history for the next step.
//!
//! # Example
//!
//! ```ignore
//! let delegate = DelegateTool::new(research_agent, BatchExecutor::new(nested_tools, config)?)
//!     .with_max_steps(6);
//! let monitor = delegate.monitor();
//! registry.register(delegate);
//!
//! // elsewhere, while the batch runs:
//! if let Some(snapshot) = monitor.snapshot("call_7") {
//!     show_thinking(snapshot.thinking.as_deref());
//! }
//! ```

use crate::events::ToolEvent;
use crate::executor::BatchExecutor;
use crate::tools::{DynamicToolName, Tool, ToolContext};
use crate::types::{NestedToolCall, ToolCallRequest, ToolCallStatus, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registered name of [`DelegateTool`].
pub const DELEGATE_TOOL_NAME: &str = "delegate_execution";

const DEFAULT_MAX_STEPS: usize = 8;

/// What a sub-agent wants to do next.
#[derive(Clone, Debug)]
pub enum SubAgentStep {
    /// Run these tool calls, then ask again
    ToolCalls {
        thinking: Option<String>,
        requests: Vec<ToolCallRequest>,
    },
    /// The sub-agent is done
    Finish { success: bool, response: String },
}

/// The reasoning loop behind a delegation, usually an LLM conversation.
///
/// `history` holds the records of every nested call made so far, in
/// completion order, so failures can be reasoned about.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Decide the next step for `task`.
    ///
    /// # Errors
    /// An error ends the delegation with an error record.
    async fn next_step(&self, task: &str, history: &[NestedToolCall]) -> Result<SubAgentStep>;
}

/// Phase of a delegation as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPhase {
    Pending,
    Running,
    Aggregating,
    Completed,
    Error,
}

/// Phase of one nested tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedPhase {
    Pending,
    Running,
    Completed,
    Error,
}

impl From<ToolCallStatus> for NestedPhase {
    fn from(status: ToolCallStatus) -> Self {
        match status {
            ToolCallStatus::Success => Self::Completed,
            ToolCallStatus::Error => Self::Error,
        }
    }
}

/// Live state of one nested tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedState {
    pub tool_call_id: String,
    pub tool_name: String,
    pub phase: NestedPhase,
}

/// Point-in-time view of a delegation, for polling consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationSnapshot {
    pub phase: DelegationPhase,
    /// Number of sub-agent steps taken so far
    pub steps: usize,
    /// Latest thinking text from the sub-agent; never part of the record
    pub thinking: Option<String>,
    /// Nested calls in the order they were requested
    pub nested: Vec<NestedState>,
}

impl DelegationSnapshot {
    const fn new() -> Self {
        Self {
            phase: DelegationPhase::Pending,
            steps: 0,
            thinking: None,
            nested: Vec::new(),
        }
    }

    fn nested_mut(&mut self, tool_call_id: &str, tool_name: &str) -> &mut NestedState {
        let index = match self
            .nested
            .iter()
            .position(|n| n.tool_call_id == tool_call_id)
        {
            Some(index) => index,
            None => {
                self.nested.push(NestedState {
                    tool_call_id: tool_call_id.to_string(),
                    tool_name: tool_name.to_string(),
                    phase: NestedPhase::Pending,
                });
                self.nested.len() - 1
            }
        };
        &mut self.nested[index]
    }
}

/// Shared, pollable state of every delegation run by one [`DelegateTool`],
/// keyed by the outer tool call id.
///
/// A finished delegation keeps its entry so its final state can still be
/// polled. Long-lived monitors must release entries with [`remove`] or
/// [`clear_finished`]. A new run under an id that is already present
/// replaces the old entry.
///
/// [`remove`]: Self::remove
/// [`clear_finished`]: Self::clear_finished
#[derive(Clone, Debug, Default)]
pub struct DelegationMonitor {
    states: Arc<RwLock<HashMap<String, DelegationSnapshot>>>,
}

impl DelegationMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of the delegation running as `tool_call_id`.
    #[must_use]
    pub fn snapshot(&self, tool_call_id: &str) -> Option<DelegationSnapshot> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_call_id)
            .cloned()
    }

    /// Forget a finished delegation.
    pub fn remove(&self, tool_call_id: &str) -> Option<DelegationSnapshot> {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_call_id)
    }

    /// Forget every delegation that reached `completed` or `error`.
    /// Returns how many entries were dropped.
    pub fn clear_finished(&self) -> usize {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|_, state| {
            !matches!(
                state.phase,
                DelegationPhase::Completed | DelegationPhase::Error
            )
        });
        before - states.len()
    }

    /// Start tracking a fresh run under `tool_call_id`.
    fn begin(&self, tool_call_id: &str) {
        let mut snapshot = DelegationSnapshot::new();
        snapshot.phase = DelegationPhase::Running;
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_call_id.to_string(), snapshot);
    }

    fn update<R>(&self, tool_call_id: &str, f: impl FnOnce(&mut DelegationSnapshot) -> R) -> R {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        f(states
            .entry(tool_call_id.to_string())
            .or_insert_with(DelegationSnapshot::new))
    }
}

/// Runs a [`SubAgent`] as one tool call. See the module docs.
pub struct DelegateTool<Ctx> {
    agent: Arc<dyn SubAgent>,
    executor: BatchExecutor<Ctx>,
    max_steps: usize,
    monitor: DelegationMonitor,
}

impl<Ctx> DelegateTool<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// `executor` runs the nested batches; its registry is what the
    /// sub-agent may call, and may itself contain a `DelegateTool`.
    #[must_use]
    pub fn new(agent: impl SubAgent + 'static, executor: BatchExecutor<Ctx>) -> Self {
        Self {
            agent: Arc::new(agent),
            executor,
            max_steps: DEFAULT_MAX_STEPS,
            monitor: DelegationMonitor::new(),
        }
    }

    /// Maximum number of sub-agent steps before the delegation fails.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Share an existing monitor, e.g. one per session.
    #[must_use]
    pub fn with_monitor(mut self, monitor: DelegationMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Handle for polling delegations run by this tool.
    #[must_use]
    pub fn monitor(&self) -> DelegationMonitor {
        self.monitor.clone()
    }

    /// Run one batch of nested calls, relaying their progress to the outer
    /// call and collecting their records into `history`.
    async fn run_nested_batch(
        &self,
        ctx: &ToolContext<Ctx>,
        requests: Vec<ToolCallRequest>,
        history: &mut Vec<NestedToolCall>,
    ) -> std::result::Result<(), String> {
        let outer_id = ctx.tool_call_id();

        for request in &requests {
            self.monitor.update(outer_id, |state| {
                state.nested_mut(&request.id, &request.name);
            });
            relay_nested(ctx, &request.id, &request.name, NestedPhase::Pending, None);
        }

        let mut nested_ctx = ToolContext::new(ctx.app.clone())
            .with_cancellation(ctx.cancellation().clone());
        nested_ctx.metadata.clone_from(&ctx.metadata);

        let mut stream = self
            .executor
            .execute(requests, nested_ctx)
            .map_err(|e| format!("Sub-agent produced an invalid batch: {e}"))?;

        while let Some(envelope) = stream.recv().await {
            match envelope.event {
                ToolEvent::ToolCallStart {
                    tool_call_id,
                    tool_name,
                    ..
                } => {
                    let phase = NestedPhase::Running;
                    self.set_nested_phase(outer_id, &tool_call_id, &tool_name, phase);
                    relay_nested(ctx, &tool_call_id, &tool_name, phase, None);
                }
                ToolEvent::ToolCallComplete {
                    tool_call_id,
                    tool_name,
                    status,
                    ..
                } => {
                    let phase = NestedPhase::from(status);
                    self.set_nested_phase(outer_id, &tool_call_id, &tool_name, phase);
                    relay_nested(ctx, &tool_call_id, &tool_name, phase, None);
                }
                ToolEvent::ToolsEnd {
                    execution_results, ..
                } => {
                    history.extend(execution_results);
                }
                event @ (ToolEvent::ToolProgress { .. }
                | ToolEvent::ToolStatus { .. }
                | ToolEvent::ToolLog { .. }
                | ToolEvent::ToolCustom { .. }
                | ToolEvent::Error { .. }) => {
                    let Some(nested_id) = event.tool_call_id().map(str::to_string) else {
                        continue;
                    };
                    let tool_name = self
                        .monitor
                        .snapshot(outer_id)
                        .and_then(|s| {
                            s.nested
                                .into_iter()
                                .find(|n| n.tool_call_id == nested_id)
                                .map(|n| n.tool_name)
                        })
                        .unwrap_or_default();
                    let phase = NestedPhase::Running;
                    relay_nested(ctx, &nested_id, &tool_name, phase, Some(&event));
                }
            }
        }

        Ok(())
    }

    fn set_nested_phase(
        &self,
        outer_id: &str,
        nested_id: &str,
        tool_name: &str,
        phase: NestedPhase,
    ) {
        self.monitor.update(outer_id, |state| {
            state.nested_mut(nested_id, tool_name).phase = phase;
        });
    }

    fn finish(
        &self,
        ctx: &ToolContext<Ctx>,
        result: ToolResult,
        history: Vec<NestedToolCall>,
    ) -> ToolResult {
        let phase = if result.success {
            DelegationPhase::Completed
        } else {
            DelegationPhase::Error
        };
        self.monitor.update(ctx.tool_call_id(), |state| state.phase = phase);
        ctx.stream().emit_status(
            if result.success { "completed" } else { "error" },
            format!("Delegation finished after {} nested tool calls", history.len()),
        );
        result.with_nested_tools(history)
    }
}

/// Emit a `tool_delegation` sub-event on the outer call.
fn relay_nested(
    ctx: &ToolContext<impl Sized>,
    nested_tool_call_id: &str,
    tool_name: &str,
    phase: NestedPhase,
    event: Option<&ToolEvent>,
) {
    let mut data = json!({
        "nested_tool_call_id": nested_tool_call_id,
        "tool_name": tool_name,
        "state": phase,
    });
    if let Some(event) = event
        && let Ok(value) = serde_json::to_value(event)
    {
        data["event"] = value;
    }
    ctx.stream().emit("delegation", data);
}

impl<Ctx> Tool<Ctx> for DelegateTool<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new(DELEGATE_TOOL_NAME)
    }

    fn description(&self) -> &str {
        "Delegate a multi-step task to a sub-agent that can call tools on its own. \
         Returns the sub-agent's final response."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the sub-agent, with all context it needs"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let task = input
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outer_id = ctx.tool_call_id().to_string();
        let mut history: Vec<NestedToolCall> = Vec::new();

        self.monitor.begin(&outer_id);
        ctx.stream().emit_status("running", "Sub-agent started");

        for step in 1..=self.max_steps {
            if ctx.is_cancelled() {
                let result = ToolResult::error("Delegation cancelled");
                return Ok(self.finish(ctx, result, history));
            }

            let next = match self.agent.next_step(&task, &history).await {
                Ok(next) => next,
                Err(error) => {
                    log::debug!("Sub-agent for {outer_id} failed at step {step}: {error}");
                    let result = ToolResult::error(format!("Sub-agent failed: {error}"));
                    return Ok(self.finish(ctx, result, history));
                }
            };
            self.monitor.update(&outer_id, |state| state.steps = step);

            match next {
                SubAgentStep::Finish { success, response } => {
                    self.monitor.update(&outer_id, |state| {
                        state.phase = DelegationPhase::Aggregating;
                    });
                    let result = if success {
                        ToolResult::success(response)
                    } else {
                        ToolResult::error(response)
                    };
                    return Ok(self.finish(ctx, result, history));
                }
                SubAgentStep::ToolCalls { thinking, requests } => {
                    if let Some(thinking) = thinking {
                        ctx.stream().emit("thinking", json!({ "text": thinking }));
                        self.monitor.update(&outer_id, |state| {
                            state.thinking = Some(thinking);
                        });
                    }
                    if let Err(message) = self.run_nested_batch(ctx, requests, &mut history).await
                    {
                        return Ok(self.finish(ctx, ToolResult::error(message), history));
                    }
                }
            }
        }

        let result = ToolResult::error(format!(
            "Delegation exceeded {} steps without finishing",
            self.max_steps
        ));
        Ok(self.finish(ctx, result, history))
    }
}
