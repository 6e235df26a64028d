use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Largest reply kept inline on the gRPC path (100 MiB).
pub const MAX_GRPC_INLINE_BYTES: usize = 1024 * 1024 * 100;
/// Largest reply kept inline on the queue path (100 KiB).
pub const MAX_QUEUE_INLINE_BYTES: usize = 1024 * 100;

/// How the module's command is run.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Program to execute. Looked up on `PATH`, no shell interpretation.
    pub command: String,
    /// Arguments passed to every invocation.
    pub args: Vec<String>,
    /// Per-invocation limit before the process group is sent SIGTERM.
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL for a timed-out process group.
    pub kill_grace: Duration,
    /// Extra time past `timeout` after which the worker considers itself
    /// wedged and stops.
    pub watchdog_grace: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command: "cat".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
            kill_grace: Duration::from_secs(5),
            watchdog_grace: Duration::from_secs(15),
        }
    }
}

impl ExecConfig {
    /// Upper bound on one invocation, payload fetch included.
    pub fn watchdog_deadline(&self) -> Duration {
        self.timeout + self.watchdog_grace
    }
}

/// What a storage failure does to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageFailurePolicy {
    /// Stop the worker; an external supervisor restarts it.
    #[default]
    Fatal,
    /// Fail only the affected request with a reserved exit code.
    FailRequest,
}

/// Blob storage used for oversized payloads.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `host:port` or full URL of the storage service.
    pub endpoint: String,
    pub failure_policy: StorageFailurePolicy,
    /// Wait for an offloaded upload to finish before replying.
    pub await_upload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "babl.sh:4443".to_string(),
            failure_policy: StorageFailurePolicy::Fatal,
            await_upload: false,
        }
    }
}

/// Queue transport settings. Absent when no brokers are configured.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    /// Drain every job without running it.
    pub flush: bool,
    /// Number of most recent control entries replayed on startup.
    pub replay_window: i64,
    /// Re-publish the registration heartbeat on this interval. `None` sends
    /// a single heartbeat at startup.
    pub registration_interval: Option<Duration>,
}

impl QueueConfig {
    pub fn new(brokers: Vec<String>) -> Self {
        Self {
            brokers,
            client_id: "modserve".to_string(),
            flush: false,
            replay_window: 1000,
            registration_interval: None,
        }
    }
}

/// TLS configuration for the gRPC listener.
///
/// The server always presents `cert_path`/`key_path`. When `ca_cert_path`
/// is set, clients must also present a certificate signed by that CA.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// CA used to verify client certificates (optional).
    pub ca_cert_path: Option<PathBuf>,

    /// Path to the server certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to the server private key (PEM format).
    pub key_path: Option<PathBuf>,

    /// When true and TLS files are missing, runs in plaintext mode with a
    /// warning. When false and TLS files are missing, fails to start.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is enabled with the files a server needs.
    pub fn is_complete(&self) -> bool {
        self.enabled && self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Everything a worker needs, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Module identity (`owner/name`).
    pub module: String,
    pub listen_addr: SocketAddr,
    pub exec: ExecConfig,
    pub storage: StorageConfig,
    pub queue: Option<QueueConfig>,
    pub grpc_max_inline: usize,
    pub queue_max_inline: usize,
}

impl WorkerConfig {
    pub fn new(module: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            module: module.into(),
            listen_addr,
            exec: ExecConfig::default(),
            storage: StorageConfig::default(),
            queue: None,
            grpc_max_inline: MAX_GRPC_INLINE_BYTES,
            queue_max_inline: MAX_QUEUE_INLINE_BYTES,
        }
    }

    pub fn with_exec(mut self, exec: ExecConfig) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Whether the worker reports and relays flush mode.
    pub fn flush(&self) -> bool {
        self.queue.as_ref().is_some_and(|q| q.flush)
    }
}
