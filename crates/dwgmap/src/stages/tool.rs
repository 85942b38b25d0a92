//! Bounded subprocess runner for the external conversion tools.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::StageError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured output of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` with `args`, killing it once `timeout` elapses.
///
/// Stdout and stderr are drained on separate threads so a chatty tool can
/// never fill a pipe and deadlock against the wait loop. A non-zero exit is
/// reported with the tail of stderr; timeout expiry is its own error so
/// callers can phrase it differently from a crash.
pub fn run_tool(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ToolOutput, StageError> {
    debug!(tool = program, ?args, "Launching external tool");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| StageError::ToolSpawn {
            tool: program.to_string(),
            source,
        })?;

    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, program, timeout)?;

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    if !status.success() {
        let detail = if stderr.trim().is_empty() {
            format!("exited with {}", status)
        } else {
            tail(&stderr, 2048)
        };
        return Err(StageError::ToolFailed {
            tool: program.to_string(),
            detail,
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(
    child: &mut Child,
    program: &str,
    timeout: Duration,
) -> Result<std::process::ExitStatus, StageError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StageError::Timeout {
                tool: program.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn tail(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max;
    // Avoid slicing inside a UTF-8 sequence.
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(start);
    trimmed[start..].to_string()
}
