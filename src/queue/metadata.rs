use std::time::Duration;

use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{MessageSource, QueueMessage};
use crate::cancel::{CancelRegistry, CANCEL_TTL};
use crate::error::{QueueError, Result};
use crate::naming::fmt_rid;
use crate::wire::{Control, ControlEntry};

/// Applies control-topic entries to the cancellation registry.
pub struct MetadataListener {
    registry: CancelRegistry,
    ttl: Duration,
}

impl MetadataListener {
    pub fn new(registry: CancelRegistry) -> Self {
        Self {
            registry,
            ttl: CANCEL_TTL,
        }
    }

    /// Consume the control stream until shutdown. The stream ending is an
    /// error: the worker must not keep running with a stale registry.
    pub async fn run(&self, source: &dyn MessageSource, shutdown: CancellationToken) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = source.next() => next?,
            };
            match next {
                Some(message) => self.handle(&message).await,
                None => return Err(QueueError::StreamClosed.into()),
            }
        }
    }

    /// Apply one entry. Undecodable entries are logged and skipped.
    pub async fn handle(&self, message: &QueueMessage) {
        let control = match ControlEntry::decode(message.value.as_slice()) {
            Ok(entry) => Control::try_from(entry),
            Err(e) => {
                warn!(offset = message.offset, error = %e, "Undecodable control entry, skipping");
                return;
            }
        };

        match control {
            Ok(Control::Ping) => {
                info!(offset = message.offset, "Control ping received");
            }
            Ok(Control::Cancel(id)) => {
                self.registry.add(id, self.ttl).await;
                info!(rid = %fmt_rid(id), offset = message.offset, "Cancellation registered");
            }
            Err(e) => {
                warn!(offset = message.offset, error = %e, "Empty control entry, skipping");
            }
        }
    }
}
