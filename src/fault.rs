//! Fatal fault delivery.
//!
//! Detached tasks (fire-and-forget invocations, background uploads, queue
//! loops) cannot return errors to anyone. They hand fatal conditions to a
//! [`FaultReporter`]; the node's run loop owns the matching receiver and exits
//! with the first fault, leaving the restart to the external supervisor.

use tokio::sync::mpsc;

use crate::error::WorkerError;

const FAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::Sender<WorkerError>,
}

pub type FaultReceiver = mpsc::Receiver<WorkerError>;

pub fn fault_channel() -> (FaultReporter, FaultReceiver) {
    let (tx, rx) = mpsc::channel(FAULT_CHANNEL_CAPACITY);
    (FaultReporter { tx }, rx)
}

impl FaultReporter {
    /// Report a fatal fault. Never blocks; if the channel is already full a
    /// fault is pending and this one is only logged.
    pub fn report(&self, err: WorkerError) {
        tracing::error!(error = %err, "Fatal fault");
        if let Err(e) = self.tx.try_send(err) {
            tracing::debug!(error = %e, "Fault channel unavailable, dropping duplicate fault");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reported_fault_reaches_receiver() {
        let (reporter, mut rx) = fault_channel();
        reporter.report(WorkerError::Wedged);
        assert!(matches!(rx.recv().await, Some(WorkerError::Wedged)));
    }

    #[tokio::test]
    async fn report_does_not_block_when_full() {
        let (reporter, mut rx) = fault_channel();
        for _ in 0..FAULT_CHANNEL_CAPACITY + 4 {
            reporter.report(WorkerError::Internal("boom".into()));
        }
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, FAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn report_after_receiver_dropped_is_harmless() {
        let (reporter, rx) = fault_channel();
        drop(rx);
        reporter.report(WorkerError::Wedged);
    }
}
