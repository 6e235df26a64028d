use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use modserve::config::{
    ExecConfig, QueueConfig, StorageConfig, StorageFailurePolicy, TlsConfig, WorkerConfig,
    MAX_GRPC_INLINE_BYTES, MAX_QUEUE_INLINE_BYTES,
};
use modserve::naming::validate_module_name;
use modserve::node::Node;
use modserve::queue::QueueTransport;
use modserve::shutdown::install_shutdown_handler;
use modserve::storage::HttpStorageClient;
use modserve::tls::TlsIdentity;

#[derive(Parser, Debug)]
#[command(name = "modserve")]
#[command(version)]
#[command(about = "Serves one function module over gRPC and a Kafka job queue")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a module worker
    Server(ServerArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Module identity, `owner/name`
    #[arg(long, env = "MODSERVE_MODULE")]
    module: String,

    /// Program to run for every invocation
    #[arg(long = "cmd", env = "MODSERVE_CMD", default_value = "cat")]
    command: String,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,

    /// Per-invocation timeout, e.g. `30s`, `500ms`, `2m`
    #[arg(long, env = "MODSERVE_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL for a timed-out command
    #[arg(long, env = "MODSERVE_KILL_GRACE", default_value = "5s", value_parser = humantime::parse_duration)]
    kill_grace: Duration,

    /// Port to listen on for gRPC
    #[arg(long, env = "MODSERVE_PORT", default_value = "4444")]
    port: u16,

    /// Kafka brokers (comma-separated); enables the job queue
    #[arg(long, env = "MODSERVE_KAFKA_BROKERS", value_delimiter = ',')]
    kafka_brokers: Vec<String>,

    /// Drain queued jobs without running them
    #[arg(long, env = "MODSERVE_KAFKA_FLUSH")]
    kafka_flush: bool,

    /// Re-publish the registration heartbeat on this interval
    #[arg(long, env = "MODSERVE_REGISTRATION_INTERVAL", value_parser = humantime::parse_duration)]
    registration_interval: Option<Duration>,

    /// Storage service for oversized payloads, `host:port` or URL
    #[arg(long, env = "MODSERVE_STORAGE", default_value = "babl.sh:4443")]
    storage: String,

    /// Fail only the affected request on storage errors instead of exiting
    #[arg(long, env = "MODSERVE_STORAGE_FAIL_REQUEST")]
    storage_fail_request: bool,

    /// Wait for offloaded output to finish uploading before replying
    #[arg(long, env = "MODSERVE_AWAIT_UPLOAD")]
    await_upload: bool,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, env = "MODSERVE_DEBUG")]
    debug: bool,

    /// Log output format
    #[arg(long, env = "MODSERVE_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    // === TLS Options ===
    /// Enable TLS for the gRPC listener
    #[arg(long)]
    tls: bool,

    /// CA certificate for verifying client certificates (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Server certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Server private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Allow running without TLS even when --tls is specified but certs are missing.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            init_tracing(server_args.debug, server_args.log_format);
            if let Err(e) = run_server(server_args).await {
                tracing::error!(error = %e, "Worker exited");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn load_tls(config: &TlsConfig) -> Result<Option<TlsIdentity>, Box<dyn std::error::Error>> {
    if config.is_complete() {
        match TlsIdentity::load(config).await {
            Ok(identity) => {
                tracing::info!(
                    client_verification = identity.verifies_clients(),
                    "TLS enabled"
                );
                Ok(Some(identity))
            }
            Err(e) => {
                if config.allow_insecure {
                    tracing::warn!(
                        error = %e,
                        "TLS certificate loading failed, running in insecure mode"
                    );
                    Ok(None)
                } else {
                    Err(format!("TLS certificate loading failed: {}", e).into())
                }
            }
        }
    } else if config.enabled {
        if config.allow_insecure {
            tracing::warn!("TLS enabled but certificate paths incomplete, running in insecure mode");
            Ok(None)
        } else {
            Err("TLS enabled but missing required paths (--cert, --key)".into())
        }
    } else {
        Ok(None)
    }
}

#[cfg(feature = "kafka")]
fn connect_queue(
    queue: Option<&QueueConfig>,
    module: &str,
) -> Result<Option<QueueTransport>, Box<dyn std::error::Error>> {
    match queue {
        Some(queue) => Ok(Some(modserve::queue::kafka::connect(queue, module)?)),
        None => Ok(None),
    }
}

#[cfg(not(feature = "kafka"))]
fn connect_queue(
    queue: Option<&QueueConfig>,
    _module: &str,
) -> Result<Option<QueueTransport>, Box<dyn std::error::Error>> {
    match queue {
        Some(_) => Err("Kafka brokers configured but this binary was built without the `kafka` feature".into()),
        None => Ok(None),
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !validate_module_name(&args.module) {
        return Err(format!(
            "Invalid module name {:?}: expected owner/name using [a-z0-9_-]",
            args.module
        )
        .into());
    }

    let tls_config = TlsConfig {
        enabled: args.tls,
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        allow_insecure: args.allow_insecure,
    };
    let tls_identity = load_tls(&tls_config).await?;

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let exec = ExecConfig {
        command: args.command,
        args: args.args,
        timeout: args.timeout,
        kill_grace: args.kill_grace,
        ..ExecConfig::default()
    };

    let storage_config = StorageConfig {
        endpoint: args.storage,
        failure_policy: if args.storage_fail_request {
            StorageFailurePolicy::FailRequest
        } else {
            StorageFailurePolicy::Fatal
        },
        await_upload: args.await_upload,
    };
    let storage = HttpStorageClient::new(&storage_config.endpoint)?;

    let queue = if args.kafka_brokers.is_empty() {
        None
    } else {
        let mut queue = QueueConfig::new(args.kafka_brokers);
        queue.flush = args.kafka_flush;
        queue.registration_interval = args.registration_interval;
        Some(queue)
    };

    let config = WorkerConfig {
        module: args.module,
        listen_addr,
        exec,
        storage: storage_config,
        queue,
        grpc_max_inline: MAX_GRPC_INLINE_BYTES,
        queue_max_inline: MAX_QUEUE_INLINE_BYTES,
    };

    let transport = connect_queue(config.queue.as_ref(), &config.module)?;

    tracing::info!(
        module = %config.module,
        command = %config.exec.command,
        timeout = %humantime::format_duration(config.exec.timeout),
        listen_addr = %config.listen_addr,
        storage = %storage.base_url(),
        kafka = transport.is_some(),
        flush = config.flush(),
        tls_enabled = tls_identity.is_some(),
        "Starting module worker"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config, Arc::new(storage), tls_identity, transport);
    node.run(shutdown).await?;

    Ok(())
}
