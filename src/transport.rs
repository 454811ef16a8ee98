//! Server-Sent Events framing of a batch's event stream.
//!
//! Each event becomes one frame:
//!
//! ```text
//! event: tool_progress
//! data: {"event_id":"…","sequence":3,"timestamp":"…","type":"tool_progress",…}
//!
//! ```
//!
//! Frames are produced as events arrive; nothing is buffered beyond the
//! batch's own channel.

use crate::events::{EventEnvelope, ToolEvent};
use crate::executor::BatchStream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::borrow::Cow;
use std::convert::Infallible;

/// SSE `event:` name for an event. Line breaks in tool-defined kinds would
/// end the field early, so they are replaced.
fn frame_kind(event: &ToolEvent) -> Cow<'static, str> {
    match event {
        ToolEvent::ToolCallStart { .. } => Cow::Borrowed("tool_call_start"),
        ToolEvent::ToolCallComplete { .. } => Cow::Borrowed("tool_call_complete"),
        ToolEvent::ToolProgress { .. } => Cow::Borrowed("tool_progress"),
        ToolEvent::ToolStatus { .. } => Cow::Borrowed("tool_status"),
        ToolEvent::ToolLog { .. } => Cow::Borrowed("tool_log"),
        ToolEvent::ToolCustom { kind, .. } => {
            Cow::Owned(format!("tool_{}", kind.replace(['\r', '\n'], "_")))
        }
        ToolEvent::ToolsEnd { .. } => Cow::Borrowed("tools_end"),
        ToolEvent::Error { .. } => Cow::Borrowed("error"),
    }
}

/// JSON payload of a frame, or the `error` frame that replaces an event
/// that could not be serialized.
fn frame_parts(envelope: &EventEnvelope) -> (Cow<'static, str>, String) {
    match serde_json::to_string(envelope) {
        Ok(data) => (frame_kind(&envelope.event), data),
        Err(error) => {
            log::error!(
                "Failed to serialize {} event {}: {error}",
                envelope.event.kind(),
                envelope.event_id
            );
            let message = format!("Failed to serialize {} event: {error}", envelope.event.kind());
            let fallback = json!({
                "event_id": envelope.event_id,
                "sequence": envelope.sequence,
                "type": "error",
                "tool_call_id": envelope.event.tool_call_id(),
                "message": message,
                "recoverable": true,
            });
            (Cow::Borrowed("error"), fallback.to_string())
        }
    }
}

/// Encode one event as an SSE frame: `event: <kind>\ndata: <json>\n\n`.
#[must_use]
pub fn encode_frame(envelope: &EventEnvelope) -> String {
    let (kind, data) = frame_parts(envelope);
    format!("event: {kind}\ndata: {data}\n\n")
}

/// The encoded frames of a batch, in emission order.
pub fn sse_body(stream: BatchStream) -> impl Stream<Item = String> + Send {
    stream.map(|envelope| encode_frame(&envelope))
}

/// An axum SSE response streaming the batch to the client.
///
/// Dropping the response (client disconnect) drops the stream, which
/// cancels the batch's running calls.
pub fn sse_response(
    stream: BatchStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let events = async_stream::stream! {
        let mut stream = stream;
        while let Some(envelope) = stream.recv().await {
            let (kind, data) = frame_parts(&envelope);
            yield Ok(Event::default().event(kind).data(data));
        }
    };
    Sse::new(events).keep_alive(KeepAlive::default())
}
