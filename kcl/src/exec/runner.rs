//! Runs a resolved invocation under its timeout and captures combined output

use super::{ExecError, ResolvedInvocation};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tfplug::context::Context;
use tokio::process::{Child, Command};

enum Outcome {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run the tool once. Returns the untrimmed combined output on a zero exit.
///
/// The tool and everything it started are killed when the timeout expires or
/// `ctx` is cancelled, and the output captured up to that point is kept in
/// the error.
pub async fn run(ctx: &Context, invocation: &ResolvedInvocation) -> Result<String, ExecError> {
    tracing::info!(
        command = %invocation.command,
        args = ?invocation.args,
        work_dir = %invocation.work_dir.display(),
        timeout_secs = invocation.timeout.as_secs(),
        "running kcl"
    );

    let mut command = Command::new(program(&invocation.command));
    command
        .args(&invocation.args)
        .current_dir(&invocation.work_dir)
        .env_clear()
        .envs(invocation.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let (mut child, mut capture) = capture::spawn(&mut command)
        .map_err(|e| failed(invocation, format!("failed to start: {}", e), String::new()))?;
    // Our copies of the write ends must close for the reader to see EOF
    drop(command);

    let run_ctx = ctx.with_timeout(invocation.timeout);
    let outcome = {
        let finished = async {
            capture.read_all().await?;
            child.wait().await
        };
        tokio::select! {
            status = finished => Outcome::Exited(status),
            _ = run_ctx.cancelled() => {
                if ctx.is_cancelled() {
                    Outcome::Cancelled
                } else {
                    Outcome::TimedOut
                }
            }
        }
    };

    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => {
            let output = capture.into_output();
            tracing::debug!(bytes = output.len(), "kcl finished");
            Ok(output)
        }
        Outcome::Exited(Ok(status)) => Err(failed(
            invocation,
            status.to_string(),
            capture.into_output(),
        )),
        Outcome::Exited(Err(e)) => Err(failed(invocation, e.to_string(), capture.into_output())),
        Outcome::TimedOut => {
            tracing::warn!(
                command = %invocation.command,
                timeout_secs = invocation.timeout.as_secs(),
                "kcl timed out, killing"
            );
            terminate(&mut child).await;
            Err(ExecError::Timeout {
                command: invocation.command.clone(),
                args: invocation.args.clone(),
                timeout: invocation.timeout,
                output: capture.into_output(),
            })
        }
        Outcome::Cancelled => {
            tracing::warn!(command = %invocation.command, "kcl cancelled, killing");
            terminate(&mut child).await;
            Err(ExecError::Cancelled {
                command: invocation.command.clone(),
                args: invocation.args.clone(),
                output: capture.into_output(),
            })
        }
    }
}

/// Bare names are looked up on the provider's own PATH, never the child's.
/// A name that is not found is passed through so spawning reports it.
fn program(command: &str) -> PathBuf {
    let path = Path::new(command);
    if path.is_absolute() || path.components().count() != 1 {
        return path.to_path_buf();
    }

    match which::which(command) {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(command, error = %e, "command not found on PATH");
            path.to_path_buf()
        }
    }
}

async fn terminate(child: &mut Child) {
    kill_process_group(child);
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill kcl process");
    }
}

/// The child leads its own group, so its pid is the group id
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pgid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only takes integer arguments
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        tracing::warn!(
            error = %io::Error::last_os_error(),
            "failed to kill kcl process group"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn failed(invocation: &ResolvedInvocation, reason: String, output: String) -> ExecError {
    ExecError::ExecutionFailed {
        command: invocation.command.clone(),
        args: invocation.args.clone(),
        reason,
        output,
    }
}

#[cfg(unix)]
mod capture {
    use std::io;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;
    use tokio::net::unix::pipe;
    use tokio::process::{Child, Command};

    /// One pipe shared by stdout and stderr, so bytes arrive in production order
    pub(super) struct Capture {
        receiver: pipe::Receiver,
        buf: Vec<u8>,
    }

    pub(super) fn spawn(command: &mut Command) -> io::Result<(Child, Capture)> {
        let (sender, receiver) = pipe::pipe()?;
        let stdout = sender.into_blocking_fd()?;
        let stderr = stdout.try_clone()?;
        command
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let child = command.spawn()?;
        Ok((
            child,
            Capture {
                receiver,
                buf: Vec::new(),
            },
        ))
    }

    impl Capture {
        pub(super) async fn read_all(&mut self) -> io::Result<()> {
            while self.receiver.read_buf(&mut self.buf).await? > 0 {}
            Ok(())
        }

        pub(super) fn into_output(mut self) -> String {
            // Pick up whatever is already buffered in the pipe
            let mut chunk = [0u8; 8192];
            while let Ok(n) = self.receiver.try_read(&mut chunk) {
                if n == 0 {
                    break;
                }
                self.buf.extend_from_slice(&chunk[..n]);
            }
            String::from_utf8_lossy(&self.buf).into_owned()
        }
    }
}

#[cfg(not(unix))]
mod capture {
    use std::io;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;
    use tokio::process::{Child, ChildStderr, ChildStdout, Command};

    /// Separate pipes, joined stdout first
    pub(super) struct Capture {
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        out: Vec<u8>,
        err: Vec<u8>,
    }

    pub(super) fn spawn(command: &mut Command) -> io::Result<(Child, Capture)> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let capture = Capture {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            out: Vec::new(),
            err: Vec::new(),
        };
        Ok((child, capture))
    }

    impl Capture {
        pub(super) async fn read_all(&mut self) -> io::Result<()> {
            let Capture {
                stdout,
                stderr,
                out,
                err,
            } = self;
            let read_out = async move {
                if let Some(stdout) = stdout {
                    while stdout.read_buf(&mut *out).await? > 0 {}
                }
                Ok::<_, io::Error>(())
            };
            let read_err = async move {
                if let Some(stderr) = stderr {
                    while stderr.read_buf(&mut *err).await? > 0 {}
                }
                Ok::<_, io::Error>(())
            };
            tokio::try_join!(read_out, read_err)?;
            Ok(())
        }

        pub(super) fn into_output(mut self) -> String {
            self.out.append(&mut self.err);
            String::from_utf8_lossy(&self.out).into_owned()
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::{Duration, Instant};

    fn shell(script: &str, timeout: Duration) -> ResolvedInvocation {
        ResolvedInvocation {
            work_dir: std::env::temp_dir(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: std::env::vars_os().collect(),
            timeout,
        }
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_combined_in_order() {
        let invocation = shell("echo hello; echo world >&2", Duration::from_secs(10));

        let output = run(&Context::new(), &invocation).await.unwrap();

        assert_eq!(output, "hello\nworld\n");
        assert_eq!(output.trim(), "hello\nworld");
    }

    #[tokio::test]
    async fn timeout_kills_the_process_and_keeps_partial_output() {
        let invocation = shell("echo started; exec sleep 5", Duration::from_secs(1));
        let started = Instant::now();

        let err = run(&Context::new(), &invocation).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            ExecError::Timeout {
                output, timeout, ..
            } => {
                assert_eq!(output, "started\n");
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_execution_failure_with_output() {
        let invocation = shell("echo broken >&2; exit 3", Duration::from_secs(10));

        let err = run(&Context::new(), &invocation).await.unwrap_err();

        match err {
            ExecError::ExecutionFailed { reason, output, .. } => {
                assert!(reason.contains('3'), "reason was {}", reason);
                assert_eq!(output, "broken\n");
            }
            other => panic!("expected execution failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_command_fails_to_start() {
        let mut invocation = shell("", Duration::from_secs(10));
        invocation.command = "/nonexistent/kcl-binary".to_string();

        let err = run(&Context::new(), &invocation).await.unwrap_err();

        assert!(
            matches!(err, ExecError::ExecutionFailed { ref reason, .. } if reason.starts_with("failed to start"))
        );
    }

    #[tokio::test]
    async fn child_sees_exactly_the_resolved_environment() {
        let mut invocation = shell("echo \"$A-$B\"", Duration::from_secs(10));
        invocation.env = vec![
            (OsString::from("A"), OsString::from("1")),
            (OsString::from("B"), OsString::from("3")),
            (OsString::from("A"), OsString::from("2")),
        ];

        let output = run(&Context::new(), &invocation).await.unwrap();

        assert_eq!(output.trim(), "2-3");
    }

    #[tokio::test]
    async fn bare_command_is_found_on_the_provider_path_not_the_child_path() {
        let mut invocation = shell("echo ok", Duration::from_secs(10));
        invocation
            .env
            .push((OsString::from("PATH"), OsString::from("/nonexistent")));

        let output = run(&Context::new(), &invocation).await.unwrap();

        assert_eq!(output, "ok\n");
    }

    #[test]
    fn program_resolves_only_bare_names() {
        assert_eq!(program("/opt/kcl/bin/kcl"), PathBuf::from("/opt/kcl/bin/kcl"));
        assert_eq!(program("./bin/kcl"), PathBuf::from("./bin/kcl"));
        assert_eq!(
            program("kcl-binary-that-is-not-installed"),
            PathBuf::from("kcl-binary-that-is-not-installed")
        );

        let sh = program("sh");
        assert!(sh.is_absolute(), "{}", sh.display());
        assert!(sh.ends_with("sh"));
    }

    #[tokio::test]
    async fn timeout_also_kills_processes_the_tool_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut invocation = shell(
            "echo started; sh -c 'sleep 2; touch marker'",
            Duration::from_secs(1),
        );
        invocation.work_dir = dir.path().to_path_buf();

        let err = run(&Context::new(), &invocation).await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout { ref output, .. } if output == "started\n"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn cancelled_context_stops_the_process() {
        let ctx = Context::new();
        let invocation = shell("echo waiting; exec sleep 5", Duration::from_secs(30));

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = run(&ctx, &invocation).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, ExecError::Cancelled { ref output, .. } if output == "waiting\n"));
    }

    #[tokio::test]
    async fn runs_inside_the_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.k"), "a = 1\n").unwrap();
        let mut invocation = shell("ls", Duration::from_secs(10));
        invocation.work_dir = dir.path().to_path_buf();

        let output = run(&Context::new(), &invocation).await.unwrap();

        assert_eq!(output.trim(), "main.k");
    }
}
