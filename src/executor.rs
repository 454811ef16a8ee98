//! Batch execution of the tool calls of one LLM turn.
//!
//! [`BatchExecutor::execute`] validates a batch, spawns a coordinating task,
//! and hands back a [`BatchStream`] of [`EventEnvelope`]s:
//!
//! 1. `tool_call_start` for each request before it is invoked
//! 2. sub-events emitted by running tools, tagged with their call id
//! 3. `tool_call_complete` for each request, after all of its sub-events
//! 4. `tools_end`, always last
//!
//! A failing, panicking, or timed-out tool only affects its own record; the
//! batch always reaches `tools_end` while someone is listening.
//!
//! # Example
//!
//! ```ignore
//! let executor = BatchExecutor::new(Arc::new(registry), PipelineConfig::default())?;
//! let mut stream = executor.execute(requests, ToolContext::new(app_ctx))?;
//!
//! while let Some(envelope) = stream.recv().await {
//!     if let ToolEvent::ToolsEnd { tool_messages, .. } = &envelope.event {
//!         conversation.extend(tool_messages.iter().cloned());
//!     }
//! }
//! ```

mod coordinator;
mod helpers;

use crate::config::PipelineConfig;
use crate::error::{BatchError, ConfigError};
use crate::events::EventEnvelope;
use crate::hooks::ExecutionHooks;
use crate::invoker::ToolInvoker;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ExecutionMode, ToolCallRequest};
use coordinator::BatchRun;
use futures::Stream;
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Executes batches of tool calls against a shared registry.
///
/// The execution mode is fixed per executor; clone it with
/// [`with_mode`](Self::with_mode) to get one with the other mode.
pub struct BatchExecutor<Ctx> {
    invoker: ToolInvoker<Ctx>,
    config: PipelineConfig,
}

impl<Ctx> Clone for BatchExecutor<Ctx> {
    fn clone(&self) -> Self {
        Self {
            invoker: self.invoker.clone(),
            config: self.config.clone(),
        }
    }
}

impl<Ctx> BatchExecutor<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// Create an executor over `registry`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `config` fails
    /// [`PipelineConfig::validate`].
    pub fn new(
        registry: Arc<ToolRegistry<Ctx>>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let invoker = ToolInvoker::new(registry).with_timeout(config.tool_timeout());
        Ok(Self { invoker, config })
    }

    #[must_use]
    pub fn with_hooks<H>(mut self, hooks: H) -> Self
    where
        H: ExecutionHooks + 'static,
    {
        self.invoker = self.invoker.with_hooks(Arc::new(hooks));
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry<Ctx>> {
        self.invoker.registry()
    }

    /// Start executing `requests`.
    ///
    /// `ctx` supplies the application context every call receives. Its
    /// cancellation token is the parent of the batch's token, so cancelling
    /// it cancels the batch.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns a [`BatchError`] without emitting any event if a request has
    /// an empty id or name, ids repeat, or arguments are not a JSON object.
    pub fn execute(
        &self,
        requests: Vec<ToolCallRequest>,
        ctx: ToolContext<Ctx>,
    ) -> Result<BatchStream, BatchError> {
        let requests = prepare_requests(requests)?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = ctx.cancellation().child_token();
        let ctx = ctx.with_cancellation(cancel.clone());

        let run = BatchRun {
            requests,
            ctx,
            invoker: self.invoker.clone(),
            config: self.config.clone(),
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(run.run());

        Ok(BatchStream {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }
}

/// Normalize `null` arguments to `{}` and reject malformed batches.
fn prepare_requests(requests: Vec<ToolCallRequest>) -> Result<Vec<ToolCallRequest>, BatchError> {
    let mut seen = HashSet::with_capacity(requests.len());
    let mut prepared = Vec::with_capacity(requests.len());

    for (index, mut request) in requests.into_iter().enumerate() {
        if request.id.is_empty() {
            return Err(BatchError::EmptyId { index });
        }
        if request.name.is_empty() {
            return Err(BatchError::EmptyName { id: request.id });
        }
        if !seen.insert(request.id.clone()) {
            return Err(BatchError::DuplicateId { id: request.id });
        }
        if request.arguments.is_null() {
            request.arguments = Value::Object(serde_json::Map::new());
        }
        if !request.arguments.is_object() {
            return Err(BatchError::InvalidArguments {
                found: json_type_name(&request.arguments),
                id: request.id,
            });
        }
        prepared.push(request);
    }

    Ok(prepared)
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The ordered event stream of one batch.
///
/// A single forward pass: ends after `tools_end`, or early if the batch is
/// cancelled before a consumer-visible event could be sent. Dropping the
/// stream cancels every call still running.
pub struct BatchStream {
    rx: mpsc::Receiver<EventEnvelope>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl BatchStream {
    /// Receive the next event, or `None` once the batch is over.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }

    /// Cancel every call of the batch. Calls still complete with an error
    /// record, and `tools_end` is still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for BatchStream {
    type Item = EventEnvelope;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod test_utils;
