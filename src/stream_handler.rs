//! Per-call channel adapter for events emitted while a tool runs.

use crate::events::{LogLevel, ToolEvent};
use crate::types::ToolCallRecord;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message carried on a batch's internal channel.
///
/// Sub-events and the completion of a call travel on the same channel, so a
/// call's sub-events are always read before its completion.
#[derive(Debug)]
pub(crate) enum BatchSignal {
    /// A sub-event emitted by a running tool
    SubEvent(ToolEvent),
    /// A call finished and its record is final
    Finished {
        record: ToolCallRecord,
        /// Panic message if the tool panicked
        panic: Option<String>,
    },
}

/// Lets a running tool emit progress, status, log, and custom events.
///
/// A handler is bound to a single tool call. Every emission is tagged with
/// that call's id and enqueued without blocking; the batch executor forwards
/// it to the output stream in the order the tool emitted it.
///
/// A disabled handler accepts every call and drops the event, so tools never
/// need to check whether anyone is listening.
#[derive(Clone, Debug)]
pub struct ToolStreamHandler {
    tool_call_id: Arc<str>,
    tx: Option<mpsc::UnboundedSender<BatchSignal>>,
}

impl ToolStreamHandler {
    pub(crate) fn new(tool_call_id: &str, tx: mpsc::UnboundedSender<BatchSignal>) -> Self {
        Self {
            tool_call_id: Arc::from(tool_call_id),
            tx: Some(tx),
        }
    }

    /// A handler whose emissions are no-ops.
    #[must_use]
    pub fn disabled(tool_call_id: &str) -> Self {
        Self {
            tool_call_id: Arc::from(tool_call_id),
            tx: None,
        }
    }

    /// The tool call this handler is bound to.
    #[must_use]
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Whether emitted events reach the output stream.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Report completion progress; `percent` is clamped to `0..=100`.
    pub fn emit_progress(&self, percent: f64, message: impl Into<String>) {
        self.send(ToolEvent::tool_progress(&*self.tool_call_id, percent, message));
    }

    /// Report a status change (e.g. `"searching"`, `"waiting_for_quote"`).
    pub fn emit_status(&self, status: impl Into<String>, message: impl Into<String>) {
        self.send(ToolEvent::tool_status(&*self.tool_call_id, status, message));
    }

    /// Emit a log line attributed to this call.
    pub fn emit_log(&self, level: LogLevel, message: impl Into<String>) {
        self.send(ToolEvent::tool_log(&*self.tool_call_id, level, message));
    }

    /// Emit a tool-defined event, delivered as `tool_<kind>`.
    pub fn emit(&self, kind: impl Into<String>, data: Value) {
        self.send(ToolEvent::tool_custom(&*self.tool_call_id, kind, data));
    }

    fn send(&self, event: ToolEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(BatchSignal::SubEvent(event)).is_err() {
            log::debug!(
                "Dropping sub-event for tool call {} - batch already finished",
                self.tool_call_id
            );
        }
    }
}
