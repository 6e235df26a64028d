use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cancel::CancelRegistry;
use crate::config::WorkerConfig;
use crate::engine::Executor;
use crate::error::{Result, WorkerError};
use crate::fault::fault_channel;
use crate::grpc::{GrpcServer, ModuleServiceImpl};
use crate::queue::{MetadataListener, QueueTransport, QueueWorker, Registration};
use crate::storage::StorageClient;
use crate::tls::TlsIdentity;

/// One worker process: the gRPC listener plus, when a queue transport is
/// given, the queue worker, metadata listener and registration heartbeat.
pub struct Node {
    config: WorkerConfig,
    storage: Arc<dyn StorageClient>,
    tls_identity: Option<TlsIdentity>,
    transport: Option<QueueTransport>,
}

impl Node {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn StorageClient>,
        tls_identity: Option<TlsIdentity>,
        transport: Option<QueueTransport>,
    ) -> Self {
        Self {
            config,
            storage,
            tls_identity,
            transport,
        }
    }

    /// Run every component until `shutdown` fires or one of them fails.
    ///
    /// All components share one fault channel. The first fatal fault (a
    /// wedged invocation, a lost stream, a failed publish, a storage failure
    /// under the fatal policy) stops the node and is returned, so the
    /// process exits non-zero and its supervisor restarts it.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let config = self.config;
        let (faults, mut fault_rx) = fault_channel();
        let stop = shutdown.child_token();

        let executor = Executor::new(
            &config.module,
            config.exec.clone(),
            config.storage.clone(),
            self.storage,
            faults.clone(),
        );
        let registry = CancelRegistry::new();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        if let Some(transport) = self.transport {
            let QueueTransport {
                jobs,
                control,
                publisher,
            } = transport;
            let interval = config
                .queue
                .as_ref()
                .and_then(|q| q.registration_interval);

            let registration = Registration::new(&config.module, publisher.clone(), interval);
            let token = stop.clone();
            tasks.spawn(async move { registration.run(token).await });

            let listener = MetadataListener::new(registry.clone());
            let token = stop.clone();
            tasks.spawn(async move { listener.run(control.as_ref(), token).await });

            let worker = QueueWorker::new(
                executor.clone(),
                registry.clone(),
                publisher,
                config.flush(),
                config.queue_max_inline,
            );
            let token = stop.clone();
            tasks.spawn(async move { worker.run(jobs.as_ref(), token).await });
        } else {
            info!("No queue transport configured, serving gRPC only");
        }

        let service = ModuleServiceImpl::new(executor, faults, config.grpc_max_inline);
        let server = GrpcServer::new(
            config.listen_addr,
            service,
            self.tls_identity,
            config.grpc_max_inline,
        );
        let mut server_task = tokio::spawn(server.run(stop.clone()));
        let mut server_done = false;

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(fault) = fault_rx.recv() => break Err(fault),
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => break Err(e),
                    Err(e) => break Err(WorkerError::Internal(format!("task failed: {e}"))),
                },
                served = &mut server_task => {
                    server_done = true;
                    break match served {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.into()),
                        Err(e) => Err(WorkerError::Internal(format!("gRPC server task failed: {e}"))),
                    };
                }
            }
        };

        stop.cancel();
        tasks.shutdown().await;
        if !server_done {
            if let Err(e) = server_task.await {
                error!(error = %e, "gRPC server task failed during shutdown");
            }
        }

        match &outcome {
            Ok(()) => info!(module = %config.module, "Worker stopped"),
            Err(e) => error!(module = %config.module, error = %e, "Worker stopped on fatal fault"),
        }
        outcome
    }
}
