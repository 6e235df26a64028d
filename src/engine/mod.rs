//! Execution engine: runs the module's command once per request.
//!
//! - [`Executor`]: payload resolution, watchdog, offloading of large output
//! - [`process`]: the subprocess itself (process group, stdin writer, timeout)
//! - [`stderr`]: module-prefixed error-stream drain
//!
//! # Invocation flow
//!
//! 1. Resolve input: inline stdin, else download `payload_url`
//! 2. Spawn the command in its own process group with the request env
//! 3. Feed stdin from a separate task while stdout and stderr are drained
//! 4. On timeout, SIGTERM the whole group, SIGKILL after a grace period
//! 5. Offload stdout above the inline threshold and reply with its URL

pub mod executor;
pub mod process;
pub mod stderr;

pub use executor::{Executor, ASYNC_MARKER, EXIT_STORAGE_FAILURE};
pub use process::{EXIT_ABNORMAL, VARS_ENV};
