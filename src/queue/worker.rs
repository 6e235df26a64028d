use std::sync::Arc;

use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{AckStatus, MessageSource, Publisher, QueueMessage};
use crate::cancel::CancelRegistry;
use crate::engine::{Executor, ASYNC_MARKER};
use crate::error::{QueueError, Result};
use crate::naming::{fmt_rid, key_rid, parse_rid, ReplyRoute};
use crate::wire::{InvocationReply, InvocationRequest};

/// Reply exit code while the worker drains its topics in flush mode.
pub const EXIT_FLUSH: i32 = -6;
/// Reply exit code for a request cancelled before it was dequeued.
pub const EXIT_CANCELLED: i32 = -7;

const FLUSH_MESSAGE: &str = "Topic Flush in process; ignoring this message";
const CANCEL_MESSAGE: &str = "Request cancelled; this job is ignored";

/// Consumes the module's job topics, one message at a time per partition.
pub struct QueueWorker {
    executor: Executor,
    registry: CancelRegistry,
    publisher: Arc<dyn Publisher>,
    flush: bool,
    max_inline: usize,
}

impl QueueWorker {
    pub fn new(
        executor: Executor,
        registry: CancelRegistry,
        publisher: Arc<dyn Publisher>,
        flush: bool,
        max_inline: usize,
    ) -> Self {
        Self {
            executor,
            registry,
            publisher,
            flush,
            max_inline,
        }
    }

    /// Process messages until shutdown. Returns an error when the stream
    /// ends or a fatal fault occurs.
    pub async fn run(&self, source: &dyn MessageSource, shutdown: CancellationToken) -> Result<()> {
        if self.flush {
            warn!("Flush mode enabled, jobs are drained without running");
        }

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Queue worker stopping");
                    return Ok(());
                }
                next = source.next() => next?,
            };
            let Some(message) = next else {
                return Err(QueueError::StreamClosed.into());
            };

            let status = self.process(&message).await?;

            if let Err(e) = source.commit(&message, status).await {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Offset commit failed"
                );
            }
        }
    }

    /// Handle one job message and return the status to commit it with.
    ///
    /// The reply, if any, is published before this returns.
    pub async fn process(&self, message: &QueueMessage) -> Result<AckStatus> {
        let span = info_span!(
            "job",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %key_rid(&message.key),
        );
        self.process_inner(message).instrument(span).await
    }

    async fn process_inner(&self, message: &QueueMessage) -> Result<AckStatus> {
        debug!("Request received in module's topic/group");

        let mut request = match InvocationRequest::decode(message.value.as_slice()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Undecodable job message, skipping");
                return Ok(AckStatus::Invalid);
            }
        };
        let fire_and_forget = request.env.remove(ASYNC_MARKER).is_some();
        if parse_rid(key_rid(&message.key)).ok() != Some(request.id) {
            warn!(
                request_id = %fmt_rid(request.id),
                "Job key does not carry the request id, caller may not match the reply"
            );
        }

        let (reply, status) = if self.flush {
            (
                InvocationReply::short_circuit(&request, EXIT_FLUSH, FLUSH_MESSAGE),
                AckStatus::Flush,
            )
        } else if self.registry.exists(request.id).await {
            info!(rid = %fmt_rid(request.id), "Request cancelled before start");
            (
                InvocationReply::short_circuit(&request, EXIT_CANCELLED, CANCEL_MESSAGE),
                AckStatus::Cancel,
            )
        } else {
            let reply = self.executor.invoke(request, self.max_inline).await?;
            let status = AckStatus::from_exitcode(reply.exitcode);
            (reply, status)
        };

        if fire_and_forget {
            debug!(status = %status, "Fire-and-forget job, reply suppressed");
        } else {
            self.send_reply(&message.key, &reply).await?;
        }

        Ok(status)
    }

    async fn send_reply(&self, key: &str, reply: &InvocationReply) -> Result<()> {
        let Some(route) = ReplyRoute::from_key(key) else {
            warn!(key, "Job key has no caller host, reply dropped");
            return Ok(());
        };
        self.publisher
            .publish(&route.topic, &route.key, reply.encode_to_vec())
            .await?;
        debug!(topic = %route.topic, key = %route.key, exitcode = reply.exitcode, "Reply published");
        Ok(())
    }
}
