//! One subprocess run: spawn in a fresh process group, feed stdin, collect
//! stdout and prefixed stderr, and enforce the command timeout on the whole
//! group.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::stderr::drain_prefixed;
use crate::config::ExecConfig;

/// Exit code reported when the command did not exit normally.
pub const EXIT_ABNORMAL: i32 = 255;

/// Environment variable listing the caller-supplied variable names.
pub const VARS_ENV: &str = "MODSERVE_VARS";

#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exitcode: i32,
    pub timed_out: bool,
}

/// Comma-separated, sorted list of the request's variable names.
pub fn vars_list(env: &HashMap<String, String>) -> String {
    let mut names: Vec<&str> = env.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(",")
}

/// Run the configured command once with `payload` on stdin.
///
/// Command failures, including a failed spawn, are reported through the
/// returned exit code and stderr; this never errors.
pub async fn run_command(
    exec: &ExecConfig,
    module: &str,
    env: &HashMap<String, String>,
    payload: Vec<u8>,
) -> ProcessOutput {
    let prefix = format!("{module}: ");

    let mut cmd = Command::new(&exec.command);
    cmd.args(&exec.args)
        .envs(env)
        .env(VARS_ENV, vars_list(env))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(command = %exec.command, error = %e, "Failed to start command");
            return ProcessOutput {
                stderr: format!("{prefix}failed to start {}: {e}\n", exec.command).into_bytes(),
                exitcode: EXIT_ABNORMAL,
                ..Default::default()
            };
        }
    };

    let writer = child.stdin.take().map(|stdin| spawn_stdin_writer(stdin, payload));
    let drain = child
        .stderr
        .take()
        .map(|stream| tokio::spawn(async move { drain_prefixed(stream, &prefix).await }));

    let timed_out = Arc::new(AtomicBool::new(false));
    let timer = child
        .id()
        .map(|pid| spawn_group_timer(pid, exec.timeout, exec.kill_grace, timed_out.clone()));

    let mut stdout = Vec::new();
    if let Some(mut stream) = child.stdout.take() {
        if let Err(e) = stream.read_to_end(&mut stdout).await {
            error!(error = %e, "Reading command stdout failed");
        }
    }

    let stderr = match drain {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            warn!(error = %e, "Stderr drain task failed");
            Vec::new()
        }),
        None => Vec::new(),
    };

    let exitcode = match child.wait().await {
        Ok(status) => exit_code(status),
        Err(e) => {
            error!(error = %e, "Waiting for command failed");
            EXIT_ABNORMAL
        }
    };

    if let Some(timer) = timer {
        timer.abort();
    }
    if let Some(writer) = writer {
        writer.abort();
    }

    ProcessOutput {
        stdout,
        stderr,
        exitcode,
        timed_out: timed_out.load(Ordering::SeqCst),
    }
}

/// Write the payload without blocking the reader side, then close stdin.
fn spawn_stdin_writer(mut stdin: ChildStdin, payload: Vec<u8>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&payload).await {
            // The command may exit without reading its input.
            if e.kind() != ErrorKind::BrokenPipe {
                warn!(error = %e, "Writing command stdin failed");
            }
        }
        drop(stdin);
    })
}

/// SIGTERM the process group once `timeout` elapses, SIGKILL it after
/// `kill_grace` more.
fn spawn_group_timer(
    pid: u32,
    timeout: Duration,
    kill_grace: Duration,
    timed_out: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timed_out.store(true, Ordering::SeqCst);
        error!(
            timeout_ms = timeout.as_millis() as u64,
            "Command timed out after {}, killing process group",
            humantime::format_duration(timeout)
        );
        signal_group(pid, GroupSignal::Terminate);

        tokio::time::sleep(kill_grace).await;
        warn!(pid, "Process group still alive, sending SIGKILL");
        signal_group(pid, GroupSignal::Kill);
    })
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // The child leads its own group, so its pid is the group id.
    let pgid = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(pgid, sig) {
        debug!(pid, signal = ?sig, error = %e, "Signalling process group failed");
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: GroupSignal) {
    warn!(pid, ?signal, "Process group signals are not supported on this platform");
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        warn!(signal = ?status.signal(), "Command terminated by signal");
    }
    #[cfg(not(unix))]
    warn!(status = %status, "Command terminated abnormally");
    EXIT_ABNORMAL
}
