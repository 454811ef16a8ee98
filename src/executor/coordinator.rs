use super::helpers::{Delivery, build_record, panic_message, send_event};
use crate::config::PipelineConfig;
use crate::events::{EventEnvelope, SequenceCounter, ToolEvent};
use crate::hooks::ExecutionHooks;
use crate::invoker::ToolInvoker;
use crate::stream_handler::{BatchSignal, ToolStreamHandler};
use crate::tools::ToolContext;
use crate::truncation::TruncationPolicy;
use crate::types::{ExecutionMode, ToolCallRecord, ToolCallRequest, ToolMessage, ToolResult};
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything the coordinating task of one batch owns.
pub(super) struct BatchRun<Ctx> {
    pub(super) requests: Vec<ToolCallRequest>,
    pub(super) ctx: ToolContext<Ctx>,
    pub(super) invoker: ToolInvoker<Ctx>,
    pub(super) config: PipelineConfig,
    pub(super) tx: mpsc::Sender<EventEnvelope>,
    pub(super) cancel: CancellationToken,
}

/// Single writer of the output channel.
struct Emitter {
    tx: mpsc::Sender<EventEnvelope>,
    hooks: Arc<dyn ExecutionHooks>,
    seq: SequenceCounter,
    send_timeout: Duration,
}

impl Emitter {
    async fn send(&self, event: ToolEvent) -> Delivery {
        send_event(&self.tx, &self.hooks, &self.seq, self.send_timeout, event).await
    }
}

/// Spawns calls with their own stream handler and cancellation token.
struct Launcher<Ctx> {
    ctx: ToolContext<Ctx>,
    invoker: ToolInvoker<Ctx>,
    signal_tx: mpsc::UnboundedSender<BatchSignal>,
    cancel: CancellationToken,
    policy: TruncationPolicy,
    stream_sub_events: bool,
}

impl<Ctx> Launcher<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// Emit the call's `tool_call_start`, then schedule it.
    async fn start(&self, emitter: &Emitter, request: ToolCallRequest) -> Delivery {
        let delivery = emitter
            .send(ToolEvent::tool_call_start(
                &request.id,
                &request.name,
                request.arguments.clone(),
            ))
            .await;
        if delivery == Delivery::Open {
            self.spawn_call(request);
        }
        delivery
    }

    fn spawn_call(&self, request: ToolCallRequest) {
        let stream = if self.stream_sub_events {
            ToolStreamHandler::new(&request.id, self.signal_tx.clone())
        } else {
            ToolStreamHandler::disabled(&request.id)
        };
        let ctx = self.ctx.for_call(stream, self.cancel.child_token());
        let invoker = self.invoker.clone();
        let signal_tx = self.signal_tx.clone();
        let policy = self.policy;

        tokio::spawn(async move {
            let started_at = OffsetDateTime::now_utc();
            let tool_start = Instant::now();
            let outcome = AssertUnwindSafe(invoker.invoke(&request, &ctx))
                .catch_unwind()
                .await;

            let (result, panic) = match outcome {
                Ok(result) => (result, None),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!(
                        "Tool call {} ({}) panicked: {message}",
                        request.id,
                        request.name
                    );
                    let result =
                        ToolResult::error(format!("Tool '{}' panicked: {message}", request.name));
                    (result, Some(message))
                }
            };

            let record = build_record(&request, result, started_at, tool_start.elapsed(), policy);
            // Sub-events already sent by this call are ahead of Finished on the channel.
            drop(ctx);
            if signal_tx
                .send(BatchSignal::Finished { record, panic })
                .is_err()
            {
                log::debug!("Batch gone before tool call {} finished", request.id);
            }
        });
    }
}

impl<Ctx> BatchRun<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    pub(super) async fn run(self) {
        let Self {
            requests,
            ctx,
            invoker,
            config,
            tx,
            cancel,
        } = self;

        let mode = config.execution_mode;
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let emitter = Emitter {
            tx,
            hooks: Arc::clone(invoker.hooks()),
            seq: SequenceCounter::new(),
            send_timeout: config.send_timeout(),
        };
        let launcher = Launcher {
            ctx,
            invoker,
            signal_tx,
            cancel: cancel.clone(),
            policy: config.truncation_policy(),
            stream_sub_events: config.stream_sub_events,
        };

        let order: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
        let mut queue: VecDeque<ToolCallRequest> = requests.into();
        let mut finished: HashSet<String> = HashSet::with_capacity(order.len());
        let mut results: Vec<ToolCallRecord> = Vec::with_capacity(order.len());
        let mut in_flight = 0_usize;

        log::debug!("Starting batch of {} tool calls ({mode:?})", order.len());

        let initial = match mode {
            ExecutionMode::Parallel => queue.len(),
            ExecutionMode::Sequential => queue.len().min(1),
        };
        for request in queue.drain(..initial).collect::<Vec<_>>() {
            if launcher.start(&emitter, request).await == Delivery::Closed {
                cancel.cancel();
                return;
            }
            in_flight += 1;
        }

        while in_flight > 0 {
            let Some(signal) = signal_rx.recv().await else {
                break;
            };

            match signal {
                BatchSignal::SubEvent(event) => {
                    let owner = event.tool_call_id().unwrap_or_default();
                    if finished.contains(owner) {
                        log::debug!(
                            "Dropping late {} event for finished tool call {owner}",
                            event.kind()
                        );
                        continue;
                    }
                    if emitter.send(event).await == Delivery::Closed {
                        cancel.cancel();
                        return;
                    }
                }
                BatchSignal::Finished { record, panic } => {
                    in_flight -= 1;
                    finished.insert(record.id.clone());
                    emitter.hooks.post_tool_use(&record).await;

                    if let Some(error) = &record.error {
                        log::debug!("Tool call {} ({}) failed: {error}", record.id, record.name);
                    }
                    if let Some(message) = panic {
                        let event = ToolEvent::error(
                            Some(record.id.clone()),
                            format!("Tool '{}' panicked: {message}", record.name),
                            true,
                        );
                        if emitter.send(event).await == Delivery::Closed {
                            cancel.cancel();
                            return;
                        }
                    }
                    if emitter.send(ToolEvent::tool_call_complete(&record)).await
                        == Delivery::Closed
                    {
                        cancel.cancel();
                        return;
                    }
                    results.push(record);

                    if mode == ExecutionMode::Sequential
                        && let Some(next) = queue.pop_front()
                    {
                        if launcher.start(&emitter, next).await == Delivery::Closed {
                            cancel.cancel();
                            return;
                        }
                        in_flight += 1;
                    }
                }
            }
        }

        let tool_messages = request_order_messages(&order, &results);
        log::debug!(
            "Batch finished: {} of {} tool calls succeeded",
            results.iter().filter(|r| r.is_success()).count(),
            results.len()
        );
        emitter
            .send(ToolEvent::tools_end(tool_messages, results))
            .await;
    }
}

/// One message per request id, in the order the requests were given.
fn request_order_messages(order: &[String], results: &[ToolCallRecord]) -> Vec<ToolMessage> {
    let by_id: HashMap<&str, &ToolCallRecord> =
        results.iter().map(|r| (r.id.as_str(), r)).collect();
    order
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|record| record.to_tool_message())
        .collect()
}
