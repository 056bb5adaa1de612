//! Runs the `ssh` (or local `sh`) child that carries one remote command.
//!
//! Every lifecycle step is one child process, so a wedged connection or a
//! hung remote script is bounded here: the child is killed at the deadline
//! and its captured output is capped.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Per-command bounds taken from the transport config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; anything past this is counted and dropped.
    pub output_limit_bytes: usize,
}

/// One captured stream of the transport child.
#[derive(Debug, Default)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub dropped: usize,
}

/// What a transport child left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    /// Killed at the deadline; never a success, whatever the status says.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout.bytes).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr.bytes).into_owned()
    }

    /// Remote exit code, or `None` for a signal or a deadline kill.
    pub fn code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }
}

/// Run the transport child until it exits or `limits.timeout` passes.
///
/// stdout and stderr are drained on their own threads while waiting, so a
/// remote command that writes a lot cannot stall on a full pipe.
#[instrument(
    skip_all,
    fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes)
)]
pub fn run_transport(mut cmd: Command, limits: CommandLimits) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "starting transport");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, program = ?cmd.get_program(), "transport did not start");
        anyhow!(err).context(format!("start {:?}", cmd.get_program()))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("transport stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("transport stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout = thread::spawn(move || capture(stdout, limit));
    let stderr = thread::spawn(move || capture(stderr, limit));

    let waited = child
        .wait_timeout(limits.timeout)
        .context("wait for transport")?;
    let (status, timed_out) = match waited {
        Some(status) => (status, false),
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "remote command hit its deadline, killing transport"
            );
            child.kill().context("kill transport")?;
            (child.wait().context("reap killed transport")?, true)
        }
    };

    let stdout = finish_capture(stdout).context("capture stdout")?;
    let stderr = finish_capture(stderr).context("capture stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "remote output over limit"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "transport finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn finish_capture(handle: JoinHandle<Result<CapturedStream>>) -> Result<CapturedStream> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output capture thread panicked")))
}

fn capture(mut reader: impl Read, limit: usize) -> Result<CapturedStream> {
    let mut stream = CapturedStream::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read transport output")?;
        if n == 0 {
            return Ok(stream);
        }
        let keep = n.min(limit.saturating_sub(stream.bytes.len()));
        stream.bytes.extend_from_slice(&chunk[..keep]);
        stream.dropped += n - keep;
    }
}
