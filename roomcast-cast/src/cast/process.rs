//! Child process supervision shared by the decoder and acquisition tools
//!
//! Children are spawned with `kill_on_drop` so an aborted pipeline never leaks
//! a process. Stderr is forwarded to the log and its tail kept for error
//! messages.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stderr lines kept per child
const STDERR_TAIL_LINES: usize = 8;

/// How long to wait for stderr EOF after the child exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Last few stderr lines of a child
#[derive(Clone, Default)]
pub struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Joined tail, empty if the child wrote nothing
    pub fn text(&self) -> String {
        let lines = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.iter().map(String::as_str).collect::<Vec<_>>().join(" | ")
    }
}

/// Supervised external process
pub struct ManagedChild {
    tool: &'static str,
    program: String,
    child: Child,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl ManagedChild {
    /// Spawn `program` with piped stdio
    ///
    /// A missing executable maps to `ExecutableNotFound`; other spawn
    /// failures to `ProcessFailure`.
    pub fn spawn(tool: &'static str, program: &str, args: &[String], pipe_stdin: bool) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ExecutableNotFound {
                tool,
                program: program.to_string(),
            },
            _ => Error::ProcessFailure {
                tool,
                message: format!("failed to spawn {}: {}", program, e),
            },
        })?;

        debug!("Spawned {} ({}) pid={:?}", tool, program, child.id());

        let stderr_tail = StderrTail::default();
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("{}: {}", tool, line);
                    tail.push(line);
                }
            })
        });

        Ok(Self {
            tool,
            program: program.to_string(),
            child,
            stderr_tail,
            stderr_task,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.text()
    }

    /// Exit status if the child has already exited
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Wait for natural exit, then drain the stderr reader
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            // A grandchild may still hold stderr open
            let abort = task.abort_handle();
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
        Ok(status)
    }

    /// Ask the child to exit, then force-kill it if it outlives `grace`
    ///
    /// On unix the request is SIGTERM; elsewhere closing the pipes is the
    /// only request the child gets.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_exit_status() {
            return Some(status);
        }
        self.request_exit();
        self.settle(grace).await
    }

    /// Wait up to `grace` for the child to exit on its own, then force-kill it
    pub async fn settle(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_exit_status() {
            return Some(status);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("{} ({}) exited: {}", self.tool, self.program, status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!("Failed waiting for {} ({}): {}", self.tool, self.program, e);
                None
            }
            Err(_) => {
                warn!(
                    "{} ({}) still running after {:?}, killing",
                    self.tool, self.program, grace
                );
                if let Err(e) = self.child.start_kill() {
                    warn!("Failed to kill {} ({}): {}", self.tool, self.program, e);
                }
                self.child.wait().await.ok()
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            // ESRCH once the child has already been reaped
            debug!("SIGTERM to {} pid={} failed: {}", self.tool, pid, e);
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&self) {}
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Human-readable exit description for error messages
pub fn describe_exit(status: Option<ExitStatus>, stderr_tail: &str) -> String {
    let status = match status {
        Some(s) => s.to_string(),
        None => "exit status unknown".to_string(),
    };
    if stderr_tail.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr_tail)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::time::Instant;

    fn sh(script: &str) -> ManagedChild {
        ManagedChild::spawn("test", "sh", &["-c".to_string(), script.to_string()], false).unwrap()
    }

    #[tokio::test]
    async fn test_terminate_sends_sigterm_before_grace() {
        let mut child = sh("exec sleep 30");

        let started = Instant::now();
        let status = child.terminate(Duration::from_secs(5)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn test_terminate_kills_child_ignoring_sigterm() {
        let mut child = sh("trap '' TERM; while :; do sleep 0.05; done");
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let grace = Duration::from_millis(300);
        let started = Instant::now();
        let status = child.terminate(grace).await.unwrap();

        assert!(started.elapsed() >= grace);
        assert_eq!(status.signal(), Some(9));
    }

    #[tokio::test]
    async fn test_settle_keeps_natural_exit_status() {
        let mut child = sh("echo oops >&2; exit 3");

        let status = child.settle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let result = ManagedChild::spawn("decoder", "/nonexistent/roomcast-tool", &[], false);

        assert!(matches!(
            result,
            Err(Error::ExecutableNotFound { tool: "decoder", .. })
        ));
    }

    #[tokio::test]
    async fn test_stderr_tail_after_wait() {
        let mut child = sh("echo first >&2; echo second >&2; exit 1");

        let status = child.wait().await.unwrap();

        assert!(!status.success());
        assert_eq!(child.stderr_tail(), "first | second");
        assert!(describe_exit(Some(status), &child.stderr_tail()).ends_with(": first | second"));
    }
}
