//! Process runner with incremental output capture.
//!
//! Each run spawns one child with piped stdout/stderr. Two reader tasks
//! append lines to the owning [`Operation`] as they arrive, so pollers see
//! partial output. Both readers are joined before the terminal status is
//! decided; a poller never sees `done` with output still in flight.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::operation::{FailureKind, Operation, OperationError};
use crate::{tlog_debug, tlog_trace, tlog_warn, Error, Result};

/// How long readers may keep draining after the child was killed. A
/// grandchild that inherited the pipes can otherwise hold them open forever.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Environment applied to every child so nothing blocks on a credential
/// prompt.
const NON_INTERACTIVE_ENV: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0")];

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Build from an argv list; `None` when the list is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in NON_INTERACTIVE_ENV {
            cmd.env(key, value);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Run `spec` to completion and finalize `op` with the outcome.
    pub async fn run(
        op: &Operation,
        spec: &CommandSpec,
        cancel: CancellationToken,
        limit: Option<Duration>,
    ) {
        let result = Self::run_step(op, spec, cancel, limit).await;
        op.finish(result).await;
    }

    /// Run `spec`, streaming its output into `op`, without finalizing `op`.
    ///
    /// Used directly when one operation spans several commands.
    pub async fn run_step(
        op: &Operation,
        spec: &CommandSpec,
        cancel: CancellationToken,
        limit: Option<Duration>,
    ) -> std::result::Result<(), OperationError> {
        let display = spec.display();
        tlog_debug!(
            "ProcessRunner::run_step op={} cmd={} cwd={:?}",
            op.id().short(),
            display,
            spec.cwd
        );

        let mut child = match spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start `{}`: {}", display, e);
                tlog_warn!("op={} {}", op.id().short(), message);
                op.append_line(&message).await;
                return Err(OperationError::new(FailureKind::Spawn, message));
            }
        };

        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(op.clone(), stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(op.clone(), stderr, "stderr"));
        }

        let deadline = async {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = cancel.cancelled() => Ending::Cancelled,
            limit = deadline => Ending::TimedOut(limit),
        };

        let killed = !matches!(ending, Ending::Exited(_));
        if killed {
            if let Err(e) = child.kill().await {
                tlog_warn!("op={} failed to kill `{}`: {}", op.id().short(), display, e);
            }
        }

        drain(readers, killed, op).await;

        let result = match ending {
            Ending::Exited(Ok(status)) if status.success() => Ok(()),
            Ending::Exited(Ok(status)) => Err(OperationError::new(
                FailureKind::Exit,
                format!("`{}` exited with {}", display, status),
            )),
            Ending::Exited(Err(e)) => Err(OperationError::new(
                FailureKind::Io,
                format!("waiting for `{}` failed: {}", display, e),
            )),
            Ending::Cancelled => Err(OperationError::new(
                FailureKind::Cancelled,
                format!("`{}` was cancelled", display),
            )),
            Ending::TimedOut(limit) => Err(OperationError::new(
                FailureKind::Timeout,
                format!("`{}` timed out after {:?}", display, limit),
            )),
        };
        tlog_debug!(
            "ProcessRunner::run_step op={} cmd={} result={:?}",
            op.id().short(),
            display,
            result.as_ref().map_err(|e| e.kind)
        );
        result
    }

    /// Run `spec` to completion and collect its output, feeding `stdin` if
    /// given. The child is killed when `limit` elapses.
    pub async fn output(spec: &CommandSpec, stdin: Option<&str>, limit: Duration) -> Result<Output> {
        let display = spec.display();
        let mut child = spec
            .command()
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: display.clone(),
                message: e.to_string(),
            })?;

        let input = stdin.map(str::to_owned);
        let mut pipe = child.stdin.take();
        let run = async move {
            if let (Some(pipe), Some(input)) = (pipe.as_mut(), input) {
                pipe.write_all(input.as_bytes()).await?;
            }
            drop(pipe);
            child.wait_with_output().await
        };

        match tokio::time::timeout(limit, run).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(Error::Timeout(limit)),
        }
    }
}

fn spawn_reader<R>(op: Operation, stream: R, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    tlog_trace!("op={} {}: {}", op.id().short(), name, line);
                    op.append_line(line).await;
                }
                Err(e) => {
                    tlog_warn!("op={} {} read failed: {}", op.id().short(), name, e);
                    break;
                }
            }
        }
    })
}

async fn drain(readers: Vec<JoinHandle<()>>, killed: bool, op: &Operation) {
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    let join = futures::future::join_all(readers);
    if killed {
        if tokio::time::timeout(KILL_DRAIN_GRACE, join).await.is_err() {
            tlog_warn!(
                "op={} output pipes still open after kill; abandoning readers",
                op.id().short()
            );
            for abort in aborts {
                abort.abort();
            }
        }
    } else {
        for joined in join.await {
            if let Err(e) = joined {
                tlog_warn!("op={} reader task failed: {}", op.id().short(), e);
            }
        }
    }
}
