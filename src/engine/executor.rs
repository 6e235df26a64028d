use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, info, info_span, warn, Instrument};

use super::process::{run_command, ProcessOutput};
use crate::config::{ExecConfig, StorageConfig, StorageFailurePolicy};
use crate::error::{Result, StorageError, WorkerError};
use crate::fault::FaultReporter;
use crate::naming::fmt_rid;
use crate::storage::StorageClient;
use crate::wire::{InvocationReply, InvocationRequest};

/// Request env key asking for an immediate empty reply while the command
/// keeps running in the background.
pub const ASYNC_MARKER: &str = "MODSERVE_ASYNC";

/// Reply exit code for a storage failure under [`StorageFailurePolicy::FailRequest`].
pub const EXIT_STORAGE_FAILURE: i32 = -8;

/// Runs invocations of one module's command.
///
/// Cheap to clone; every clone shares the storage client and fault channel.
#[derive(Clone)]
pub struct Executor {
    module: Arc<str>,
    exec: ExecConfig,
    storage_config: StorageConfig,
    storage: Arc<dyn StorageClient>,
    faults: FaultReporter,
}

impl Executor {
    pub fn new(
        module: &str,
        exec: ExecConfig,
        storage_config: StorageConfig,
        storage: Arc<dyn StorageClient>,
        faults: FaultReporter,
    ) -> Self {
        Self {
            module: Arc::from(module),
            exec,
            storage_config,
            storage,
            faults,
        }
    }

    /// Run `request` and build its reply.
    ///
    /// Outputs larger than `max_inline` are offloaded to storage. The only
    /// errors are fatal ones: the watchdog deadline passing (`Wedged`) or a
    /// storage failure under the `Fatal` policy. A request carrying
    /// [`ASYNC_MARKER`] returns an empty reply at once; fatal errors from
    /// its background run go to the fault channel instead.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        max_inline: usize,
    ) -> Result<InvocationReply> {
        self.invoke_inner(request, max_inline, None).await
    }

    /// Like [`invoke`](Self::invoke), holding `permit` until the command
    /// has finished even if the caller stops waiting. A fire-and-forget
    /// request drops it as soon as its empty reply is ready.
    pub async fn invoke_admitted(
        &self,
        request: InvocationRequest,
        max_inline: usize,
        permit: OwnedSemaphorePermit,
    ) -> Result<InvocationReply> {
        self.invoke_inner(request, max_inline, Some(permit)).await
    }

    async fn invoke_inner(
        &self,
        request: InvocationRequest,
        max_inline: usize,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<InvocationReply> {
        let fire_and_forget = request.env.contains_key(ASYNC_MARKER);
        let permit = if fire_and_forget { None } else { permit };
        let span = info_span!("invoke", rid = %fmt_rid(request.id), module = %request.module);
        let early_reply = fire_and_forget.then(|| InvocationReply::for_request(&request));

        let this = self.clone();
        let run = tokio::spawn(
            async move {
                let _permit = permit;
                this.run(request, max_inline, fire_and_forget).await
            }
            .instrument(span),
        );
        let deadline = self.exec.watchdog_deadline();

        let watched = async move {
            match tokio::time::timeout(deadline, run).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(WorkerError::Internal(format!("invocation task failed: {e}"))),
                Err(_) => {
                    error!(
                        deadline_ms = deadline.as_millis() as u64,
                        "Invocation exceeded watchdog deadline"
                    );
                    Err(WorkerError::Wedged)
                }
            }
        };

        match early_reply {
            Some(reply) => {
                let faults = self.faults.clone();
                tokio::spawn(async move {
                    if let Err(e) = watched.await {
                        faults.report(e);
                    }
                });
                Ok(reply)
            }
            None => watched.await,
        }
    }

    async fn run(
        &self,
        request: InvocationRequest,
        max_inline: usize,
        fire_and_forget: bool,
    ) -> Result<InvocationReply> {
        let mut record = CallRecord {
            start: Instant::now(),
            fire_and_forget,
            stdin_bytes: 0,
            stdout_bytes: 0,
            timed_out: false,
        };
        let mut reply = InvocationReply::for_request(&request);

        let payload = match self.resolve_payload(&request).await {
            Ok(payload) => payload,
            Err(e) => return self.storage_failure(reply, e, &record),
        };
        record.stdin_bytes = payload.len();

        let ProcessOutput {
            stdout,
            stderr,
            exitcode,
            timed_out,
        } = run_command(&self.exec, &self.module, &request.env, payload).await;

        reply.exitcode = exitcode;
        reply.stderr = stderr;
        record.stdout_bytes = stdout.len();
        record.timed_out = timed_out;

        if stdout.len() > max_inline {
            match self.offload(stdout).await {
                Ok(url) => reply.payload_url = url,
                Err(e) => return self.storage_failure(reply, e, &record),
            }
        } else {
            reply.stdout = stdout;
        }

        record.emit(&reply);
        Ok(reply)
    }

    /// Inline stdin wins; otherwise fetch `payload_url` when set.
    async fn resolve_payload(
        &self,
        request: &InvocationRequest,
    ) -> std::result::Result<Vec<u8>, StorageError> {
        if !request.stdin.is_empty() || request.payload_url.is_empty() {
            return Ok(request.stdin.clone());
        }

        let start = Instant::now();
        info!(payload_url = %request.payload_url, "Downloading external payload");
        let payload = self.storage.download(&request.payload_url).await?;
        info!(
            payload_size = payload.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Payload download successful"
        );
        Ok(payload)
    }

    /// Start uploading `stdout` and return its reference.
    async fn offload(&self, stdout: Vec<u8>) -> std::result::Result<String, StorageError> {
        let start = Instant::now();
        let upload = self.storage.upload(stdout).await?;
        let url = upload.url.clone();

        if self.storage_config.await_upload {
            upload.wait().await?;
            info!(
                blob_url = %url,
                duration_ms = start.elapsed().as_millis() as u64,
                "Payload upload done"
            );
            return Ok(url);
        }

        let policy = self.storage_config.failure_policy;
        let faults = self.faults.clone();
        let blob_url = url.clone();
        tokio::spawn(
            async move {
                match upload.wait().await {
                    Ok(()) => info!(
                        blob_url = %blob_url,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Payload upload done"
                    ),
                    Err(e) => match policy {
                        StorageFailurePolicy::Fatal => faults.report(e.into()),
                        StorageFailurePolicy::FailRequest => {
                            warn!(blob_url = %blob_url, error = %e, "Detached payload upload failed")
                        }
                    },
                }
            }
            .in_current_span(),
        );
        Ok(url)
    }

    fn storage_failure(
        &self,
        mut reply: InvocationReply,
        err: StorageError,
        record: &CallRecord,
    ) -> Result<InvocationReply> {
        match self.storage_config.failure_policy {
            StorageFailurePolicy::Fatal => Err(err.into()),
            StorageFailurePolicy::FailRequest => {
                warn!(error = %err, "Storage failure, failing request");
                reply.exitcode = EXIT_STORAGE_FAILURE;
                reply.stdout.clear();
                reply.payload_url.clear();
                reply.stderr = format!("{}: {err}\n", self.module).into_bytes();
                record.emit(&reply);
                Ok(reply)
            }
        }
    }
}

/// Measurements for the one completion record each invocation logs.
struct CallRecord {
    start: Instant,
    fire_and_forget: bool,
    stdin_bytes: usize,
    stdout_bytes: usize,
    timed_out: bool,
}

impl CallRecord {
    fn emit(&self, reply: &InvocationReply) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        let mode = if self.fire_and_forget { "async" } else { "sync" };
        let offloaded = !reply.payload_url.is_empty();

        if reply.exitcode == 0 {
            info!(
                stdin_bytes = self.stdin_bytes,
                stdout_bytes = self.stdout_bytes,
                stderr_bytes = reply.stderr.len(),
                exitcode = reply.exitcode,
                duration_ms,
                mode,
                timed_out = self.timed_out,
                offloaded,
                "Invocation finished"
            );
        } else {
            error!(
                stdin_bytes = self.stdin_bytes,
                stdout_bytes = self.stdout_bytes,
                stderr_bytes = reply.stderr.len(),
                exitcode = reply.exitcode,
                duration_ms,
                mode,
                timed_out = self.timed_out,
                offloaded,
                "Invocation finished"
            );
        }
    }
}
