//! Subprocess bridge.
//!
//! [`spawn`] starts a program, forwards an optional input stream into its
//! stdin on a dedicated task, drains stderr on another, and hands stdout back
//! as a lazy stream of chunks. Input and output therefore move concurrently:
//! git is free to write a large response before it has read all of its
//! request without either side blocking on a full pipe.
//!
//! Dropping the [`ProcessOutput`] kills the child and aborts both helper
//! tasks, which is what happens when a client disconnects mid-response.

use crate::{GitError, Result};
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::Span;

/// Default size of the chunks moved in either direction.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How much stderr is kept for the failure message.
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;

/// How long a feeder may take to settle once the child has exited.
const FEEDER_GRACE: Duration = Duration::from_millis(250);

/// An input stream forwarded to the child's stdin.
pub type ProcessInput = Box<dyn AsyncRead + Send + Unpin>;

/// A program and its fixed argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    /// Starts a command line for `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument. Arguments are passed as-is, never through a shell.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The program to run.
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Aborts the task when dropped.
struct TaskGuard<T>(Option<JoinHandle<T>>);

impl<T> TaskGuard<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self(Some(tokio::spawn(future)))
    }

    async fn join(mut self) -> Option<T> {
        let handle = self.0.take()?;
        handle.await.ok()
    }

    /// Joins the task, or aborts it if it has not ended within `grace`.
    async fn join_within(mut self, grace: Duration) -> Option<T> {
        let handle = self.0.as_mut()?;
        match tokio::time::timeout(grace, handle).await {
            Ok(joined) => {
                self.0 = None;
                joined.ok()
            }
            Err(_) => None,
        }
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// The live half of a running process, owned by the output stream.
struct Pump {
    child: Child,
    stdout: ReaderStream<tokio::process::ChildStdout>,
    feeder: Option<TaskGuard<io::Result<u64>>>,
    stderr: Option<TaskGuard<Vec<u8>>>,
    command: String,
    log: Span,
}

impl Pump {
    /// Runs once stdout is exhausted: reaps the child and decides whether the
    /// exchange succeeded.
    async fn finish(mut self) -> io::Result<()> {
        let status = self.child.wait().await?;

        // The child is gone. A feeder that failed writing settles almost at
        // once; one still waiting on request input has nobody left to
        // deliver to and is aborted.
        let fed = match self.feeder.take() {
            Some(feeder) => feeder.join_within(FEEDER_GRACE).await,
            None => None,
        };
        let stderr = match self.stderr.take() {
            Some(task) => task.join().await.unwrap_or_default(),
            None => Vec::new(),
        };

        if let Some(Err(e)) = fed {
            tracing::warn!(parent: &self.log, command = %self.command, error = %e, "input forwarding failed");
            return Err(self.failure(format!("forwarding input failed: {e}")));
        }

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            tracing::warn!(parent: &self.log, command = %self.command, %status, stderr = %stderr.trim_end(), "process failed");
            return Err(self.failure(format!("{status}: {}", stderr.trim_end())));
        }

        if !stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&stderr);
            tracing::warn!(parent: &self.log, command = %self.command, stderr = %stderr.trim_end(), "process wrote to stderr");
            return Err(self.failure(stderr.trim_end().to_string()));
        }

        if let Some(Ok(bytes)) = fed {
            tracing::debug!(parent: &self.log, command = %self.command, input_bytes = bytes, "process completed");
        }
        Ok(())
    }

    fn failure(&self, reason: String) -> io::Error {
        io::Error::other(GitError::Process {
            command: self.command.clone(),
            reason,
        })
    }
}

/// Standard output of a running process as a stream of chunks.
///
/// The stream yields any prefix chunks first, then stdout in production
/// order. A process that exits unsuccessfully, writes to stderr, or stops
/// accepting its input ends the stream with a final `Err` item.
pub struct ProcessOutput {
    pid: Option<u32>,
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl ProcessOutput {
    /// OS process id of the child, if it was still running when spawned.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Runs `action` after the stream has ended successfully, before the
    /// stream reports its end. Not run when the stream fails or is dropped.
    pub fn on_success<F, Fut>(self, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let inner = stream::unfold(Some((self.inner, action)), |state| async move {
            let (mut inner, action) = state?;
            match inner.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), Some((inner, action)))),
                Some(Err(e)) => Some((Err(e), None)),
                None => {
                    action().await;
                    None
                }
            }
        })
        .boxed();

        Self {
            pid: self.pid,
            inner,
        }
    }
}

impl Stream for ProcessOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOutput").field("pid", &self.pid).finish()
    }
}

/// Starts `command` and returns its output stream.
///
/// `prefix` chunks are emitted ahead of the process output. When `input` is
/// given it is copied into stdin in `chunk_size` pieces on its own task and
/// stdin is closed at its end; otherwise stdin is `/dev/null`.
///
/// A program that cannot be started yields [`GitError::Launch`]; anything that
/// goes wrong afterwards surfaces through the stream. Must be called from
/// within a tokio runtime.
pub fn spawn(
    command: &CommandLine,
    input: Option<ProcessInput>,
    prefix: Vec<Bytes>,
    chunk_size: usize,
    log: &Span,
) -> Result<ProcessOutput> {
    let rendered = command.to_string();
    let mut child = command
        .command()
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| GitError::Launch {
            command: rendered.clone(),
            source,
        })?;

    let pid = child.id();
    tracing::debug!(parent: log, command = %rendered, pid, "process started");

    let stdout = child.stdout.take().ok_or_else(|| GitError::Process {
        command: rendered.clone(),
        reason: "stdout was not captured".to_string(),
    })?;

    let feeder = match (input, child.stdin.take()) {
        (Some(input), Some(stdin)) => Some(TaskGuard::spawn(forward_input(input, stdin, chunk_size))),
        _ => None,
    };
    let stderr = child.stderr.take().map(|s| TaskGuard::spawn(capture_stderr(s)));

    let pump = Pump {
        child,
        stdout: ReaderStream::with_capacity(stdout, chunk_size),
        feeder,
        stderr,
        command: rendered,
        log: log.clone(),
    };

    let body = stream::unfold(Some(pump), |state| async move {
        let mut pump = state?;
        match pump.stdout.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some(pump))),
            // Dropping the pump here kills the child.
            Some(Err(e)) => Some((Err(e), None)),
            None => match pump.finish().await {
                Ok(()) => None,
                Err(e) => Some((Err(e), None)),
            },
        }
    });

    Ok(ProcessOutput {
        pid,
        inner: stream::iter(prefix.into_iter().map(Ok::<_, io::Error>))
            .chain(body)
            .boxed(),
    })
}

/// Runs `command` to completion with no input, discarding stdout.
///
/// Used for short administrative commands; the same launch/runtime failure
/// split as [`spawn`] applies.
pub async fn run(command: &CommandLine, log: &Span) -> Result<()> {
    let rendered = command.to_string();
    let output = command
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| GitError::Launch {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(parent: log, command = %rendered, status = %output.status, stderr = %stderr.trim_end(), "command failed");
        return Err(GitError::Process {
            command: rendered,
            reason: format!("{}: {}", output.status, stderr.trim_end()),
        });
    }

    tracing::debug!(parent: log, command = %rendered, "command completed");
    Ok(())
}

async fn forward_input(
    mut input: ProcessInput,
    mut stdin: ChildStdin,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    stdin.shutdown().await?;
    Ok(total)
}

async fn capture_stderr(mut stderr: ChildStderr) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let keep = n.min(STDERR_CAPTURE_LIMIT.saturating_sub(captured.len()));
                captured.extend_from_slice(&buf[..keep]);
            }
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").arg("-c").arg(script)
    }

    async fn collect(mut output: ProcessOutput) -> (Vec<u8>, Option<io::Error>) {
        let mut out = Vec::new();
        while let Some(item) = output.next().await {
            match item {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[test]
    fn test_command_line_display() {
        let cmd = CommandLine::new("git")
            .arg("upload-pack")
            .arg("--stateless-rpc")
            .arg("/srv/repo.git");
        assert_eq!(cmd.to_string(), "git upload-pack --stateless-rpc /srv/repo.git");
        assert_eq!(cmd.program(), "git");
        assert_eq!(cmd.args().len(), 3);
    }

    #[tokio::test]
    async fn test_launch_failure_is_distinct() {
        let cmd = CommandLine::new("/nonexistent/definitely-not-git");
        let err = spawn(&cmd, None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap_err();
        assert!(err.is_launch_failure());
    }

    #[tokio::test]
    async fn test_prefix_comes_first() {
        let output = spawn(
            &sh("printf world"),
            None,
            vec![Bytes::from_static(b"hello ")],
            DEFAULT_CHUNK_SIZE,
            &Span::none(),
        )
        .unwrap();

        let (out, err) = collect(output).await;
        assert!(err.is_none());
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_input_is_forwarded() {
        let input: ProcessInput = Box::new(&b"ping\n"[..]);
        let output = spawn(&sh("cat"), Some(input), Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();

        let (out, err) = collect(output).await;
        assert!(err.is_none());
        assert_eq!(out, b"ping\n");
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let mut output = spawn(
            &sh("head -c 300000 /dev/zero"),
            None,
            Vec::new(),
            16 * 1024,
            &Span::none(),
        )
        .unwrap();

        let mut total = 0;
        while let Some(chunk) = output.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 16 * 1024);
            total += chunk.len();
        }
        assert_eq!(total, 300_000);
    }

    #[tokio::test]
    async fn test_output_before_input_does_not_deadlock() {
        // Writes 1 MiB, far beyond any pipe buffer, before reading anything.
        let script = "head -c 1048576 /dev/zero; wc -c | tr -d ' '";
        let input: ProcessInput = Box::new(std::io::Cursor::new(vec![1u8; 1024 * 1024]));
        let output = spawn(&sh(script), Some(input), Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();

        let (out, err) = tokio::time::timeout(Duration::from_secs(60), collect(output))
            .await
            .expect("bridge deadlocked");

        assert!(err.is_none(), "unexpected failure: {err:?}");
        assert_eq!(out.len() - 1048576, "1048576\n".len());
        assert!(out.ends_with(b"1048576\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_ends_stream_with_error() {
        let output = spawn(&sh("printf partial; exit 3"), None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();

        let (out, err) = collect(output).await;
        assert_eq!(out, b"partial");
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn test_stderr_output_is_a_failure() {
        let output = spawn(&sh("printf ok; echo oops >&2"), None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();

        let (out, err) = collect(output).await;
        assert_eq!(out, b"ok");
        assert!(err.unwrap().to_string().contains("oops"));
    }

    #[tokio::test]
    async fn test_closed_stdin_is_a_failure() {
        // The child exits without reading; writing 4 MiB hits a broken pipe.
        let input: ProcessInput = Box::new(std::io::Cursor::new(vec![0u8; 4 * 1024 * 1024]));
        let output = spawn(
            &sh("exec 0<&-; sleep 1"),
            Some(input),
            Vec::new(),
            DEFAULT_CHUNK_SIZE,
            &Span::none(),
        )
        .unwrap();

        let (_, err) = tokio::time::timeout(Duration::from_secs(30), collect(output))
            .await
            .unwrap();
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn test_input_failure_reported_after_quick_exit() {
        // The child is reaped before the feeder task has observed its
        // broken pipe.
        let input: ProcessInput = Box::new(std::io::Cursor::new(vec![0u8; 4 * 1024 * 1024]));
        let output = spawn(
            &sh("exec 0<&-; printf out"),
            Some(input),
            Vec::new(),
            DEFAULT_CHUNK_SIZE,
            &Span::none(),
        )
        .unwrap();

        let (out, err) = tokio::time::timeout(Duration::from_secs(30), collect(output))
            .await
            .unwrap();
        assert_eq!(out, b"out");
        assert!(err.unwrap().to_string().contains("forwarding input failed"));
    }

    #[tokio::test]
    async fn test_stalled_input_does_not_hold_the_stream() {
        // The request body never ends; the child answers without reading it.
        let (_client, server) = tokio::io::duplex(64);
        let input: ProcessInput = Box::new(server);
        let output = spawn(&sh("printf ready"), Some(input), Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();

        let (out, err) = tokio::time::timeout(Duration::from_secs(10), collect(output))
            .await
            .unwrap();
        assert_eq!(out, b"ready");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_on_success_runs_after_output() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let output = spawn(&sh("printf done"), None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none())
            .unwrap()
            .on_success(move || async move { flag.store(true, Ordering::SeqCst) });

        let (out, err) = collect(output).await;
        assert!(err.is_none());
        assert_eq!(out, b"done");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_on_success_skipped_on_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let output = spawn(&sh("exit 1"), None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none())
            .unwrap()
            .on_success(move || async move { flag.store(true, Ordering::SeqCst) });

        let (_, err) = collect(output).await;
        assert!(err.is_some());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_drop_kills_process() {
        let mut output = spawn(&sh("echo started; exec sleep 60"), None, Vec::new(), DEFAULT_CHUNK_SIZE, &Span::none()).unwrap();
        let pid = output.id().unwrap();

        let first = output.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"started\n");
        drop(output);

        let proc_path = format!("/proc/{pid}/stat");
        let mut gone = false;
        for _ in 0..100 {
            match std::fs::read_to_string(&proc_path) {
                Err(_) => {
                    gone = true;
                    break;
                }
                // Killed but not yet reaped.
                Ok(stat) if stat.contains(") Z") => {
                    gone = true;
                    break;
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        assert!(gone, "process {pid} still running after output was dropped");
    }

    #[tokio::test]
    async fn test_run_reports_status() {
        assert!(run(&sh("exit 0"), &Span::none()).await.is_ok());

        let err = run(&sh("echo bad >&2; exit 2"), &Span::none()).await.unwrap_err();
        assert!(matches!(err, GitError::Process { .. }));
        assert!(err.to_string().contains("bad"));

        let err = run(&CommandLine::new("/nonexistent/tool"), &Span::none()).await.unwrap_err();
        assert!(err.is_launch_failure());
    }
}
