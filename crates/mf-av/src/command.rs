//! Builder for executing external engine commands under a deadline, a
//! cancellation token and OS resource limits.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use mf_core::{EngineErrorKind, Error, ResourceLimits};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline used when the caller sets none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bytes of stdout/stderr retained per stream.
pub const EXCERPT_BYTES: usize = 4096;

/// Address space granted on top of the memory cap. Engines map shared
/// libraries and thread stacks that never count against their pixel cache.
pub const ADDRESS_SPACE_HEADROOM: u64 = 512 * 1024 * 1024;

/// How long to wait for output readers after the child has been killed.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Lowercase stderr fragments that mean the engine ran out of a resource.
const EXHAUSTION_MARKERS: &[&str] = &[
    "cache resources exhausted",
    "memory allocation failed",
    "cannot allocate memory",
    "out of memory",
    "bad_alloc",
    "width or height exceeds limit",
    "file too large",
    "no space left on device",
];

/// OS-level limits installed in the child before `exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessLimits {
    /// `RLIMIT_AS` in bytes.
    pub address_space: Option<u64>,
    /// `RLIMIT_FSIZE` in bytes.
    pub file_size: Option<u64>,
}

impl ProcessLimits {
    /// Memory cap plus [`ADDRESS_SPACE_HEADROOM`], and the disk cap.
    pub fn from_resource_limits(limits: &ResourceLimits) -> Self {
        Self {
            address_space: Some(limits.memory.saturating_add(ADDRESS_SPACE_HEADROOM)),
            file_size: Some(limits.disk),
        }
    }

    #[cfg(unix)]
    fn apply(&self) -> std::io::Result<()> {
        use nix::sys::resource::{setrlimit, Resource};

        if let Some(bytes) = self.address_space {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(bytes) = self.file_size {
            setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
        }
        Ok(())
    }
}

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Tail of standard output (lossy UTF-8, at most the excerpt size).
    pub stdout: String,
    /// Tail of standard error (lossy UTF-8, at most the excerpt size).
    pub stderr: String,
    /// Wall time from spawn to exit.
    pub elapsed: Duration,
}

impl ToolOutput {
    /// Turn a non-successful exit into a classified engine error.
    ///
    /// The error message is a summary only; stderr stays in the output.
    pub fn check(&self, tool: &str) -> mf_core::Result<()> {
        if self.status.success() {
            return Ok(());
        }
        let (kind, message) = classify_failure(&self.status, &self.stderr);
        Err(Error::engine(kind, tool, message))
    }
}

/// Classify a failed exit from its status and stderr excerpt.
pub fn classify_failure(status: &ExitStatus, stderr: &str) -> (EngineErrorKind, String) {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        use std::os::unix::process::ExitStatusExt;

        if let Some(sig) = status.signal() {
            return match Signal::try_from(sig) {
                Ok(Signal::SIGXFSZ) => (
                    EngineErrorKind::ResourceExceeded,
                    "file size limit exceeded".into(),
                ),
                Ok(Signal::SIGKILL) => (
                    EngineErrorKind::ResourceExceeded,
                    "killed by the operating system".into(),
                ),
                _ => (
                    EngineErrorKind::Crashed,
                    format!("terminated by signal {sig}"),
                ),
            };
        }
    }

    let lower = stderr.to_ascii_lowercase();
    if EXHAUSTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return (
            EngineErrorKind::ResourceExceeded,
            "engine reported resource exhaustion".into(),
        );
    }

    match status.code() {
        Some(code) => (EngineErrorKind::Crashed, format!("exited with status {code}")),
        None => (EngineErrorKind::Crashed, "terminated abnormally".into()),
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// Arguments are passed to the OS as a vector; no shell is involved. The
/// child is killed when the deadline passes, when the cancellation token
/// fires, and when the returned future is dropped.
///
/// # Example
///
/// ```no_run
/// use mf_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> mf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("magick"))
///     .arg("-ping")
///     .arg("pdf:/tmp/job/input.pdf")
///     .args(["-format", "%n\n", "info:"])
///     .timeout(Duration::from_secs(30))
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    limits: Option<ProcessLimits>,
    excerpt_bytes: usize,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            deadline: None,
            cancel: None,
            limits: None,
            excerpt_bytes: EXCERPT_BYTES,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time, starting now.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.deadline = Some(Instant::now() + d);
        self
    }

    /// Set an absolute deadline.
    pub fn deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Kill the child when `token` is cancelled.
    pub fn cancel_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Install OS resource limits in the child.
    pub fn limits(&mut self, limits: ProcessLimits) -> &mut Self {
        self.limits = Some(limits);
        self
    }

    /// Bytes of stdout/stderr to retain.
    pub fn excerpt_bytes(&mut self, n: usize) -> &mut Self {
        self.excerpt_bytes = n;
        self
    }

    /// The argument vector as it will be passed to the OS.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, used in errors and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command and fail on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Everything [`run`](Self::run) returns, plus the classified exit
    /// failure from [`ToolOutput::check`].
    pub async fn execute(&self) -> mf_core::Result<ToolOutput> {
        let output = self.run().await?;
        output.check(&self.program_name())?;
        Ok(output)
    }

    /// Execute the command and return its output whatever the exit status.
    ///
    /// # Errors
    ///
    /// - `EngineNotFound` if the executable does not exist.
    /// - `EngineTimeout` if the deadline passes first (the child is killed).
    /// - [`Error::Cancelled`] if the token fires first (the child is killed).
    /// - `EngineCrashed` if spawning or waiting fails for another reason.
    pub async fn run(&self) -> mf_core::Result<ToolOutput> {
        let tool = self.program_name();
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + DEFAULT_TIMEOUT);

        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(Error::cancelled("job cancelled"));
        }
        if Instant::now() >= deadline {
            return Err(Error::engine(
                EngineErrorKind::Timeout,
                tool,
                "deadline expired before start",
            ));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            // Own process group, so delegates (e.g. ghostscript) die with us.
            cmd.process_group(0);
            if let Some(limits) = self.limits {
                // SAFETY: the closure only calls setrlimit(2), which is
                // async-signal-safe and touches no parent state.
                unsafe {
                    cmd.pre_exec(move || limits.apply());
                }
            }
        }

        let started = std::time::Instant::now();
        let mut child = cmd.spawn().map_err(|e| spawn_error(&tool, e))?;

        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_tail(s, self.excerpt_bytes)));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_tail(s, self.excerpt_bytes)));

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    Error::engine(
                        EngineErrorKind::Crashed,
                        tool.clone(),
                        format!("failed waiting for process: {}", e.kind()),
                    )
                })?;
                Ok(ToolOutput {
                    status,
                    stdout: collect(stdout, None).await,
                    stderr: collect(stderr, None).await,
                    elapsed: started.elapsed(),
                })
            }
            _ = tokio::time::sleep_until(deadline) => {
                kill_tree(&mut child).await;
                let stderr = collect(stderr, Some(READER_GRACE)).await;
                tracing::warn!(%tool, elapsed = ?started.elapsed(), stderr = %stderr.trim(), "Deadline exceeded; child killed");
                Err(Error::engine(EngineErrorKind::Timeout, tool, "deadline exceeded"))
            }
            _ = cancelled(self.cancel.as_ref()) => {
                kill_tree(&mut child).await;
                tracing::info!(%tool, "Cancelled; child killed");
                Err(Error::cancelled("job cancelled"))
            }
        }
    }
}

fn spawn_error(tool: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::engine(EngineErrorKind::NotFound, tool, "executable not found")
    } else {
        Error::engine(
            EngineErrorKind::Crashed,
            tool,
            format!("failed to spawn: {}", e.kind()),
        )
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn collect(handle: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match grace {
        None => handle.await.unwrap_or_default(),
        Some(d) => match tokio::time::timeout(d, handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => String::new(),
        },
    }
}

/// Drain `reader`, keeping only the last `cap` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > cap {
                    let excess = tail.len() - cap;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}
