//! Process runner for the external sync executable.
//!
//! Commands are built as an explicit argument list ([`CommandLine`]) and run
//! without a shell. The rendered form (`CommandLine::display`) is quoted with
//! POSIX shell rules so the transcript shows a line an operator can paste.
//!
//! The runner never retries. Every failure is returned as a [`ProcessError`]
//! carrying whatever output was captured, and the caller decides whether to
//! continue.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Default cap on captured bytes per stream (64 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `arg` only when `cond` holds.
    pub fn arg_if(self, cond: bool, arg: impl Into<String>) -> Self {
        if cond { self.arg(arg) } else { self }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Whether any argument equals `flag`.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Shell-quoted rendering for logs and transcripts.
    pub fn display(&self) -> String {
        let program = self.program.to_string_lossy();
        std::iter::once(program.as_ref())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| shell_words::quote(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Which output stream hit the capture limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Failure of one external invocation.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {}", exit_description(.code))]
    Exit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{command} produced more than {limit} bytes on {stream}")]
    OutputLimit {
        command: String,
        stream: Stream,
        limit: usize,
        /// Output captured before the child was killed.
        stdout: String,
        stderr: String,
    },

    #[error("{command} timed out after {} seconds", .after.as_secs())]
    Timeout {
        command: String,
        after: Duration,
        /// Output captured before the child was killed.
        stdout: String,
        stderr: String,
    },

    #[error("I/O error while running {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl ProcessError {
    /// Captured stdout, when the process got far enough to produce any.
    pub fn stdout(&self) -> &str {
        match self {
            Self::Exit { stdout, .. }
            | Self::OutputLimit { stdout, .. }
            | Self::Timeout { stdout, .. } => stdout,
            _ => "",
        }
    }

    /// Captured stderr, when the process got far enough to produce any.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Exit { stderr, .. }
            | Self::OutputLimit { stderr, .. }
            | Self::Timeout { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Attach output read before a kill to the errors that interrupt capture.
    fn with_partial_output(mut self, out: &[u8], err: &[u8]) -> Self {
        if let Self::OutputLimit { stdout, stderr, .. } | Self::Timeout { stdout, stderr, .. } =
            &mut self
        {
            *stdout = String::from_utf8_lossy(out).into_owned();
            *stderr = String::from_utf8_lossy(err).into_owned();
        }
        self
    }

    /// One-line summary plus captured stderr, for transcripts.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr().trim();
        if stderr.is_empty() {
            self.to_string()
        } else {
            format!("{self}\n{stderr}")
        }
    }
}

/// Something that can run a [`CommandLine`] to completion.
///
/// The orchestration layer is generic over this so tests can script the
/// external tool.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        command: &CommandLine,
    ) -> impl Future<Output = Result<ProcessOutput, ProcessError>> + Send;
}

impl<R: CommandRunner> CommandRunner for &R {
    fn run(
        &self,
        command: &CommandLine,
    ) -> impl Future<Output = Result<ProcessOutput, ProcessError>> + Send {
        (**self).run(command)
    }
}

/// Runs commands as tokio child processes.
#[derive(Debug, Clone)]
pub struct TokioRunner {
    max_output_bytes: usize,
    timeout: Option<Duration>,
}

impl Default for TokioRunner {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: None,
        }
    }
}

impl TokioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-stream capture limit.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set a per-invocation timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run_inner(&self, command: &CommandLine) -> Result<ProcessOutput, ProcessError> {
        let rendered = command.display();
        let mut child = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program().display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;
        // Outlive the capture future so a timeout still sees what was read.
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let collect = async {
            tokio::try_join!(
                read_capped(stdout, &mut out_buf, limit, Stream::Stdout, &rendered),
                read_capped(stderr, &mut err_buf, limit, Stream::Stderr, &rendered),
            )?;
            child.wait().await.map_err(|source| ProcessError::Io {
                command: rendered.clone(),
                source,
            })
        };

        let collected = match self.timeout {
            Some(after) => match tokio::time::timeout(after, collect).await {
                Ok(result) => result,
                Err(_) => Err(ProcessError::Timeout {
                    command: rendered.clone(),
                    after,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
            },
            None => collect.await,
        };

        let status = match collected {
            Ok(status) => status,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    tracing::debug!(error = %kill_err, "child already exited");
                }
                return Err(e.with_partial_output(&out_buf, &err_buf));
            }
        };
        let stdout = String::from_utf8_lossy(&out_buf).into_owned();
        let stderr = String::from_utf8_lossy(&err_buf).into_owned();

        if !status.success() {
            return Err(ProcessError::Exit {
                command: rendered,
                code: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

impl CommandRunner for TokioRunner {
    fn run(
        &self,
        command: &CommandLine,
    ) -> impl Future<Output = Result<ProcessOutput, ProcessError>> + Send {
        self.run_inner(command)
    }
}

/// Read a whole stream into `buf`, failing once more than `limit` bytes arrive.
///
/// Bytes are appended chunk by chunk, so `buf` holds everything read so far
/// even if this future is dropped.
async fn read_capped<R>(
    reader: Option<R>,
    buf: &mut Vec<u8>,
    limit: usize,
    stream: Stream,
    command: &str,
) -> Result<(), ProcessError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|source| ProcessError::Io {
                command: command.to_string(),
                source,
            })?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > limit {
            let room = limit - buf.len();
            buf.extend_from_slice(&chunk[..room]);
            return Err(ProcessError::OutputLimit {
                command: command.to_string(),
                stream,
                limit,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
