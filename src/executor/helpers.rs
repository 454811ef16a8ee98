use crate::events::{EventEnvelope, SequenceCounter, ToolEvent};
use crate::hooks::ExecutionHooks;
use crate::invoker::millis_to_u64;
use crate::truncation::TruncationPolicy;
use crate::types::{ToolCallRecord, ToolCallRequest, ToolCallStatus, ToolResult};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Whether the consumer is still attached after a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Delivery {
    Open,
    Closed,
}

/// Hand an event to the hooks, wrap it, and send it to the consumer.
///
/// Tries a non-blocking send first so backpressure is visible in the logs,
/// then waits for room in the channel. Nothing is dropped: past
/// `send_timeout` a slow consumer is reported and the wait goes on until
/// the event is delivered or the receiver is gone.
pub(super) async fn send_event(
    tx: &mpsc::Sender<EventEnvelope>,
    hooks: &Arc<dyn ExecutionHooks>,
    seq: &SequenceCounter,
    send_timeout: Duration,
    event: ToolEvent,
) -> Delivery {
    hooks.on_event(&event).await;

    let envelope = EventEnvelope::wrap(event, seq);

    match tx.try_send(envelope) {
        Ok(()) => Delivery::Open,
        Err(mpsc::error::TrySendError::Full(envelope)) => {
            log::debug!("Event channel full, waiting for consumer...");
            let send = tx.send(envelope);
            tokio::pin!(send);
            let sent = match tokio::time::timeout(send_timeout, &mut send).await {
                Ok(sent) => sent,
                Err(_) => {
                    log::warn!(
                        "Consumer has not read an event for {}ms, still waiting",
                        send_timeout.as_millis()
                    );
                    send.await
                }
            };
            if sent.is_ok() {
                Delivery::Open
            } else {
                log::warn!("Event channel closed while sending - consumer disconnected");
                Delivery::Closed
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("Event channel closed - consumer disconnected");
            Delivery::Closed
        }
    }
}

/// Build the final record of a call, applying the truncation policy to its
/// result text.
pub(super) fn build_record(
    request: &ToolCallRequest,
    result: ToolResult,
    started_at: OffsetDateTime,
    elapsed: Duration,
    policy: TruncationPolicy,
) -> ToolCallRecord {
    let duration_ms = result
        .duration_ms
        .unwrap_or_else(|| millis_to_u64(elapsed.as_millis()));
    let text = policy.apply(&result.output).into_owned();
    let (status, result_summary, error) = if result.success {
        (ToolCallStatus::Success, text, None)
    } else {
        (ToolCallStatus::Error, String::new(), Some(text))
    };

    ToolCallRecord {
        id: request.id.clone(),
        name: request.name.clone(),
        status,
        started_at,
        ended_at: OffsetDateTime::now_utc(),
        result_summary,
        error,
        resource_id: result.resource_id,
        duration_ms,
        nested_tools: result.nested_tools,
    }
}

/// Best-effort text of a panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::DefaultHooks;
    use serde_json::json;

    #[test]
    fn test_build_record_success() {
        let request = ToolCallRequest::new("c1", "web_search", json!({}));
        let result = ToolResult::success("x".repeat(50)).with_resource_id("doc_1");

        let record = build_record(
            &request,
            result,
            OffsetDateTime::now_utc(),
            Duration::from_millis(7),
            TruncationPolicy::new(10),
        );

        assert_eq!(record.status, ToolCallStatus::Success);
        assert!(record.result_summary.starts_with("xxxxxxxxxx\n\n[truncated: 40"));
        assert_eq!(record.error, None);
        assert_eq!(record.resource_id.as_deref(), Some("doc_1"));
        assert_eq!(record.duration_ms, 7);
        assert!(record.ended_at >= record.started_at);
    }

    #[test]
    fn test_build_record_error_keeps_message() {
        let request = ToolCallRequest::new("c2", "get_quote", json!({}));
        let result = ToolResult::error("rate limited").with_duration(3);

        let record = build_record(
            &request,
            result,
            OffsetDateTime::now_utc(),
            Duration::from_millis(99),
            TruncationPolicy::unbounded(),
        );

        assert_eq!(record.status, ToolCallStatus::Error);
        assert_eq!(record.result_summary, "");
        assert_eq!(record.error.as_deref(), Some("rate limited"));
        assert_eq!(record.duration_ms, 3);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_send_event_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let hooks: Arc<dyn ExecutionHooks> = Arc::new(DefaultHooks);
        let seq = SequenceCounter::new();
        drop(rx);

        let delivery = send_event(
            &tx,
            &hooks,
            &seq,
            Duration::from_millis(10),
            ToolEvent::tools_end(vec![], vec![]),
        )
        .await;

        assert_eq!(delivery, Delivery::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_event_waits_past_timeout_on_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let hooks: Arc<dyn ExecutionHooks> = Arc::new(DefaultHooks);
        let seq = SequenceCounter::new();
        let timeout = Duration::from_millis(10);

        let first =
            send_event(&tx, &hooks, &seq, timeout, ToolEvent::tools_end(vec![], vec![])).await;
        assert_eq!(first, Delivery::Open);

        let blocked = tokio::spawn(async move {
            send_event(&tx, &hooks, &seq, timeout, ToolEvent::tools_end(vec![], vec![])).await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.map(|e| e.sequence), Some(0));
        assert_eq!(blocked.await.ok(), Some(Delivery::Open));
        assert_eq!(rx.recv().await.map(|e| e.sequence), Some(1));
    }
}
