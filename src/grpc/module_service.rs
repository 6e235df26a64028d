use std::sync::Arc;

use tokio::sync::Semaphore;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::engine::Executor;
use crate::fault::FaultReporter;
use crate::naming::fmt_rid;
use crate::proto::module_service_server::ModuleService;
use crate::wire::{Empty, InvocationReply, InvocationRequest, Pong};

pub const BUSY_MESSAGE: &str = "Busy calculating, please try again later";

/// Synchronous surface of the worker.
///
/// Runs at most one invocation at a time. A call arriving while another is
/// in flight is rejected with `UNAVAILABLE` so the caller can retry
/// elsewhere; nothing is queued.
///
/// The admission permit travels with the invocation task, not the handler:
/// a caller that gives up early does not reopen the gate while its command
/// is still running. Fire-and-forget requests release it with their reply.
pub struct ModuleServiceImpl {
    executor: Executor,
    faults: FaultReporter,
    max_inline: usize,
    admission: Arc<Semaphore>,
}

impl ModuleServiceImpl {
    pub fn new(executor: Executor, faults: FaultReporter, max_inline: usize) -> Self {
        Self {
            executor,
            faults,
            max_inline,
            admission: Arc::new(Semaphore::new(1)),
        }
    }
}

#[tonic::async_trait]
impl ModuleService for ModuleServiceImpl {
    async fn invoke(
        &self,
        request: Request<InvocationRequest>,
    ) -> Result<Response<InvocationReply>, Status> {
        let request = request.into_inner();
        let rid = fmt_rid(request.id);

        let Ok(permit) = self.admission.clone().try_acquire_owned() else {
            warn!(rid = %rid, "Invocation rejected, worker busy");
            return Err(Status::unavailable(BUSY_MESSAGE));
        };
        debug!(rid = %rid, "Invocation admitted");

        match self
            .executor
            .invoke_admitted(request, self.max_inline, permit)
            .await
        {
            Ok(reply) => Ok(Response::new(reply)),
            Err(e) => {
                let status = Status::internal(format!("Invocation failed: {e}"));
                self.faults.report(e);
                Err(status)
            }
        }
    }

    async fn ping(&self, _request: Request<Empty>) -> Result<Response<Pong>, Status> {
        info!("ping");
        Ok(Response::new(Pong {
            val: "pong".to_string(),
        }))
    }
}
