//! Subprocess execution with idle-timeout enforcement and process-group
//! teardown, used by the skill script runner and the completion checker's
//! command checks.
//!
//! Adapted from the teacher's process-spawning crate, simplified: this crate
//! only enforces an idle timeout and kills the whole process group on
//! expiry. It does not implement cgroup/rlimit resource sandboxing, since
//! nothing downstream of it needs quota enforcement, only a bounded wait and
//! a guaranteed kill.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::sleep;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const READ_CHUNK_SIZE: usize = 4096;
const SUMMARY_MAX_LEN: usize = 200;

/// Captured output and outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    pub stderr_output: String,
    pub summary: String,
    pub exit_code: i32,
    pub idle_timed_out: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.idle_timed_out
    }
}

pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub idle_timeout: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions {
            cwd: None,
            env: Vec::new(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Spawns `program args...` and waits for completion or idle timeout,
/// capturing stdout/stderr as they arrive.
pub async fn run_and_capture(
    program: &str,
    args: &[String],
    options: SpawnOptions,
) -> anyhow::Result<ExecutionResult> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn `{program}`"))?;

    wait_and_capture_with_idle_timeout(child, options.idle_timeout).await
}

/// Races stdout/stderr reads against an idle-timeout clock: if no byte
/// arrives on either stream for `idle_timeout`, the whole process group is
/// killed and the result is reported as a timeout with exit code 137.
pub async fn wait_and_capture_with_idle_timeout(
    mut child: Child,
    idle_timeout: Duration,
) -> anyhow::Result<ExecutionResult> {
    let pid = child.id();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    let mut last_activity = Instant::now();
    let mut idle_timed_out = false;
    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();

    let exit_status = loop {
        if !stdout_open && !stderr_open {
            break Some(child.wait().await?);
        }

        let read_stdout = read_chunk(stdout.as_mut());
        let read_stderr = read_chunk(stderr.as_mut());

        tokio::select! {
            n = read_stdout, if stdout_open => {
                match n? {
                    Some(chunk) if !chunk.is_empty() => {
                        out_buf.extend_from_slice(&chunk);
                        last_activity = Instant::now();
                    }
                    _ => stdout_open = false,
                }
            }
            n = read_stderr, if stderr_open => {
                match n? {
                    Some(chunk) if !chunk.is_empty() => {
                        err_buf.extend_from_slice(&chunk);
                        last_activity = Instant::now();
                    }
                    _ => stderr_open = false,
                }
            }
            _ = sleep(IDLE_POLL_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    idle_timed_out = true;
                    if let Some(pid) = pid {
                        kill_child_process_group(pid as i32);
                    }
                    let _ = child.start_kill();
                    break None;
                }
            }
        }
    };

    let exit_code = match exit_status {
        Some(status) => status.code().unwrap_or(-1),
        None => {
            let _ = child.wait().await;
            137
        }
    };

    let output = String::from_utf8_lossy(&out_buf).into_owned();
    let stderr_output = String::from_utf8_lossy(&err_buf).into_owned();
    let summary = if idle_timed_out {
        format!("timed out after {}s of inactivity", idle_timeout.as_secs())
    } else if exit_code == 0 {
        extract_summary(&output)
    } else {
        failure_summary(&output, &stderr_output, exit_code)
    };

    Ok(ExecutionResult { output, stderr_output, summary, exit_code, idle_timed_out })
}

fn read_chunk<R: AsyncRead + Unpin>(
    reader: Option<&mut R>,
) -> impl std::future::Future<Output = io::Result<Option<Vec<u8>>>> + '_ {
    async move {
        let Some(reader) = reader else { return Ok(None) };
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some(buf))
        }
    }
}

/// Sends SIGKILL to the whole process group led by `pid`, so child processes
/// spawned by the subprocess (shells, interpreters) die with it.
#[cfg(unix)]
pub fn kill_child_process_group(pid: i32) {
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_child_process_group(_pid: i32) {}

/// One-line summary for a successful run: the last non-empty stdout line,
/// truncated.
pub fn extract_summary(output: &str) -> String {
    match last_non_empty_line(output) {
        Some(line) => truncate_line(line, SUMMARY_MAX_LEN),
        None => "(no output)".to_string(),
    }
}

/// One-line summary for a failed run: exit code plus the last non-empty line
/// of whichever stream has output, preferring stderr.
pub fn failure_summary(output: &str, stderr_output: &str, exit_code: i32) -> String {
    let tail = last_non_empty_line(stderr_output)
        .or_else(|| last_non_empty_line(output))
        .unwrap_or("(no output)");
    format!("exit code {exit_code}: {}", truncate_line(tail, SUMMARY_MAX_LEN))
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|l| !l.trim().is_empty())
}

fn truncate_line(line: &str, max_len: usize) -> String {
    if line.chars().count() <= max_len {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_len).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn extract_summary_uses_last_non_empty_line() {
        let output = "building...\nlinking...\ndone\n\n";
        assert_eq!(extract_summary(output), "done");
    }

    #[test]
    fn extract_summary_handles_empty_output() {
        assert_eq!(extract_summary(""), "(no output)");
    }

    #[test]
    fn failure_summary_prefers_stderr_tail() {
        let summary = failure_summary("stdout line", "stderr error here", 1);
        assert_eq!(summary, "exit code 1: stderr error here");
    }

    #[test]
    fn failure_summary_falls_back_to_stdout() {
        let summary = failure_summary("only stdout", "", 2);
        assert_eq!(summary, "exit code 2: only stdout");
    }

    #[test]
    fn truncate_line_passes_short_lines_through() {
        assert_eq!(truncate_line("short", 200), "short");
    }

    #[test]
    fn truncate_line_truncates_with_ellipsis() {
        let long = "a".repeat(250);
        let truncated = truncate_line(&long, 200);
        assert_eq!(truncated.len(), 203);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn run_and_capture_reports_success_and_output() {
        let result = run_and_capture(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            SpawnOptions::default(),
        )
        .await
        .unwrap();
        assert!(result.succeeded());
        assert_eq!(result.output.trim(), "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn run_and_capture_reports_nonzero_exit() {
        let result = run_and_capture(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            SpawnOptions::default(),
        )
        .await
        .unwrap();
        assert!(!result.succeeded());
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn run_and_capture_times_out_on_idle_process() {
        let options = SpawnOptions { idle_timeout: StdDuration::from_millis(300), ..Default::default() };
        let result = run_and_capture(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            options,
        )
        .await
        .unwrap();
        assert!(result.idle_timed_out);
        assert_eq!(result.exit_code, 137);
    }
}
