//! Pipeline events for real-time streaming.
//!
//! The [`ToolEvent`] enum is the closed set of events a batch can produce.
//! Every event leaves the executor wrapped in an [`EventEnvelope`] carrying
//! idempotency metadata.
//!
//! # Event Flow
//!
//! A typical batch looks like:
//! 1. `ToolCallStart` - once per request, before the tool runs
//! 2. `ToolProgress` / `ToolStatus` / `ToolLog` / `ToolCustom` - emitted by tools
//! 3. `ToolCallComplete` - once per request, after all of its sub-events
//! 4. `ToolsEnd` - always last, carries the aggregate results

use crate::types::{ToolCallRecord, ToolCallStatus, ToolMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Severity of a [`ToolEvent::ToolLog`] line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the batch executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// A tool call is about to be invoked
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// A tool call finished (successfully or not)
    ToolCallComplete {
        tool_call_id: String,
        tool_name: String,
        status: ToolCallStatus,
        resource_id: Option<String>,
        error: Option<String>,
        duration_ms: u64,
    },

    /// Progress update from a running tool
    ToolProgress {
        tool_call_id: String,
        /// Completion percentage in `0.0..=100.0`
        percent: f64,
        message: String,
    },

    /// Status change reported by a running tool
    ToolStatus {
        tool_call_id: String,
        status: String,
        message: String,
    },

    /// Log line from a running tool
    ToolLog {
        tool_call_id: String,
        level: LogLevel,
        message: String,
    },

    /// Tool-defined event, sent on the wire as `tool_<kind>`
    ToolCustom {
        tool_call_id: String,
        kind: String,
        data: Value,
    },

    /// Terminal event of a batch
    ToolsEnd {
        /// One message per request, in request order
        tool_messages: Vec<ToolMessage>,
        /// One record per request, in completion order
        execution_results: Vec<ToolCallRecord>,
    },

    /// An error outside of any single tool result
    Error {
        tool_call_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl ToolEvent {
    #[must_use]
    pub fn tool_call_start(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn tool_call_complete(record: &ToolCallRecord) -> Self {
        Self::ToolCallComplete {
            tool_call_id: record.id.clone(),
            tool_name: record.name.clone(),
            status: record.status,
            resource_id: record.resource_id.clone(),
            error: record.error.clone(),
            duration_ms: record.duration_ms,
        }
    }

    #[must_use]
    pub fn tool_progress(
        tool_call_id: impl Into<String>,
        percent: f64,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolProgress {
            tool_call_id: tool_call_id.into(),
            percent: if percent.is_nan() {
                0.0
            } else {
                percent.clamp(0.0, 100.0)
            },
            message: message.into(),
        }
    }

    #[must_use]
    pub fn tool_status(
        tool_call_id: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolStatus {
            tool_call_id: tool_call_id.into(),
            status: status.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn tool_log(
        tool_call_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolLog {
            tool_call_id: tool_call_id.into(),
            level,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn tool_custom(
        tool_call_id: impl Into<String>,
        kind: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::ToolCustom {
            tool_call_id: tool_call_id.into(),
            kind: kind.into(),
            data,
        }
    }

    #[must_use]
    pub const fn tools_end(
        tool_messages: Vec<ToolMessage>,
        execution_results: Vec<ToolCallRecord>,
    ) -> Self {
        Self::ToolsEnd {
            tool_messages,
            execution_results,
        }
    }

    #[must_use]
    pub fn error(
        tool_call_id: Option<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self::Error {
            tool_call_id,
            message: message.into(),
            recoverable,
        }
    }

    /// Wire name of this event (the SSE `event:` field).
    #[must_use]
    pub fn kind(&self) -> Cow<'static, str> {
        match self {
            Self::ToolCallStart { .. } => Cow::Borrowed("tool_call_start"),
            Self::ToolCallComplete { .. } => Cow::Borrowed("tool_call_complete"),
            Self::ToolProgress { .. } => Cow::Borrowed("tool_progress"),
            Self::ToolStatus { .. } => Cow::Borrowed("tool_status"),
            Self::ToolLog { .. } => Cow::Borrowed("tool_log"),
            Self::ToolCustom { kind, .. } => Cow::Owned(format!("tool_{kind}")),
            Self::ToolsEnd { .. } => Cow::Borrowed("tools_end"),
            Self::Error { .. } => Cow::Borrowed("error"),
        }
    }

    /// The tool call this event belongs to, if any.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallStart { tool_call_id, .. }
            | Self::ToolCallComplete { tool_call_id, .. }
            | Self::ToolProgress { tool_call_id, .. }
            | Self::ToolStatus { tool_call_id, .. }
            | Self::ToolLog { tool_call_id, .. }
            | Self::ToolCustom { tool_call_id, .. } => Some(tool_call_id),
            Self::Error { tool_call_id, .. } => tool_call_id.as_deref(),
            Self::ToolsEnd { .. } => None,
        }
    }

    /// Whether this is the terminal `tools_end` event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ToolsEnd { .. })
    }
}

/// Monotonically increasing per-batch counter for event ordering.
///
/// `Ordering::Relaxed` is sufficient because only the coordinating task
/// wraps events; the channel provides the happens-before edge to readers.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`ToolEvent`] with idempotency metadata.
///
/// Clients can use `event_id` for deduplication on reconnect and `sequence`
/// for ordering after persistence. The `event` field is flattened so the
/// event's `type` discriminant sits next to the envelope fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier (UUID v4) for this event emission.
    pub event_id: uuid::Uuid,
    /// Monotonically increasing sequence number within a single batch.
    pub sequence: u64,
    /// UTC timestamp of when the event was emitted.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The actual event payload.
    #[serde(flatten)]
    pub event: ToolEvent,
}

impl EventEnvelope {
    /// Wrap a [`ToolEvent`], assigning it a unique ID, the next sequence
    /// number, and the current UTC timestamp.
    #[must_use]
    pub fn wrap(event: ToolEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}
