//! Supervision of the ffmpeg process that remuxes a resolved stream.
//!
//! ffmpeg reads the HLS playlist with browser headers and writes fragmented
//! MP4 (`empty_moov`, no seek index) to stdout, so output can be relayed
//! while it is produced. A [`TranscodeSession`] owns one process for one
//! consumer and always reaps it: on end of output, on error, on
//! [`TranscodeSession::cancel`] and when dropped.

use std::{
    ffi::OsString,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStderr, ChildStdout, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::resolve::StreamDescriptor;

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

/// Keep at most this much of ffmpeg's stderr for diagnostics.
const STDERR_LIMIT: u64 = 64 * 1024;

/// Request headers ffmpeg sends to the media host.
pub const STREAM_HEADERS: &str = "User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36\r\n\
Accept: */*\r\n\
Accept-Language: en-US,en;q=0.9\r\n\
Origin: https://www.redbull.com\r\n\
Referer: https://www.redbull.com/\r\n\
Sec-Fetch-Dest: empty\r\n\
Sec-Fetch-Mode: cors\r\n\
Sec-Fetch-Site: same-site\r\n\
sec-ch-ua: \"Chromium\";v=\"140\", \"Not=A?Brand\";v=\"24\", \"Google Chrome\";v=\"140\"\r\n\
sec-ch-ua-mobile: ?0\r\n\
sec-ch-ua-platform: \"Windows\"\r\n";

#[derive(thiserror::Error, Debug)]
pub enum TranscodeError {
    #[error("could not start {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("transcoder failed ({}): {diagnostics}", describe_status(.status))]
    ProcessFailure {
        status: Option<ExitStatus>,
        diagnostics: String,
    },
}

fn describe_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    pub program: PathBuf,
    /// How long a terminated process gets to exit before it is killed.
    pub grace: Duration,
    pub chunk_size: usize,
}

impl Default for Transcoder {
    fn default() -> Self {
        Transcoder {
            program: PathBuf::from("ffmpeg"),
            grace: DEFAULT_GRACE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Transcoder {
    /// Arguments for remuxing `stream` into fragmented MP4 on stdout.
    pub fn args(&self, stream: &StreamDescriptor) -> Vec<OsString> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-headers",
            STREAM_HEADERS,
            "-i",
            stream.media_url.as_str(),
            "-c",
            "copy",
            "-bsf:a",
            "aac_adtstoasc",
            "-movflags",
            "frag_keyframe+empty_moov+default_base_moof",
            "-f",
            "mp4",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    pub fn command(&self, stream: &StreamDescriptor) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args(stream));
        command
    }

    /// Starts remuxing `stream`.
    pub fn open(&self, stream: &StreamDescriptor) -> Result<TranscodeSession, TranscodeError> {
        self.spawn(self.command(stream))
    }

    /// Like [`open`](Transcoder::open), but the session is also cancelled
    /// when `parent` is.
    pub fn open_linked(
        &self,
        stream: &StreamDescriptor,
        parent: &CancellationToken,
    ) -> Result<TranscodeSession, TranscodeError> {
        self.spawn_with(self.command(stream), parent.child_token())
    }

    /// Runs an arbitrary command under the same supervision as [`open`].
    ///
    /// [`open`]: Transcoder::open
    pub fn spawn(&self, command: Command) -> Result<TranscodeSession, TranscodeError> {
        self.spawn_with(command, CancellationToken::new())
    }

    fn spawn_with(
        &self,
        mut command: Command,
        cancel: CancellationToken,
    ) -> Result<TranscodeSession, TranscodeError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Keep terminal signals (Ctrl-C) away from ffmpeg; it is stopped
        // through the session only.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| TranscodeError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        debug!("Started transcoder (pid {:?})", child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(collect_stderr);

        Ok(TranscodeSession {
            child: Some(child),
            stdout,
            stderr,
            status: None,
            cancel,
            grace: self.grace,
            chunk_size: self.chunk_size.max(1),
            bytes_out: 0,
        })
    }
}

pub struct TranscodeSession {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    status: Option<ExitStatus>,
    cancel: CancellationToken,
    grace: Duration,
    chunk_size: usize,
    bytes_out: u64,
}

impl TranscodeSession {
    /// Token that stops the session from another task. The teardown itself
    /// happens at the next [`next_chunk`](Self::next_chunk) call.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// OS process id while the process has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Exit status once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Stops the process now: SIGTERM, up to the grace period to exit, then
    /// SIGKILL. Returns once the process is reaped.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        self.shutdown().await;
    }

    /// Reads the next chunk of output, at most `chunk_size` bytes.
    ///
    /// `Ok(None)` means the output is finished: end of stream with a clean
    /// exit, or the session was cancelled.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TranscodeError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0; self.chunk_size];
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            read = stdout.read(&mut buf) => Some(read),
        };

        match read {
            None => {
                debug!("Transcode cancelled after {} bytes", self.bytes_out);
                self.shutdown().await;
                Ok(None)
            }
            Some(Ok(0)) => self.finish().await.map(|()| None),
            Some(Ok(n)) => {
                buf.truncate(n);
                self.bytes_out += n as u64;
                Ok(Some(Bytes::from(buf)))
            }
            Some(Err(e)) => {
                self.shutdown().await;
                Err(TranscodeError::Io(e))
            }
        }
    }

    /// Output hit end of stream: reap and judge the exit.
    async fn finish(&mut self) -> Result<(), TranscodeError> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            self.status = match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    debug!("Waiting for transcoder failed: {}", e);
                    terminate(&mut child, self.grace).await
                }
                // stdout closed but the process lingers
                Err(_) => terminate(&mut child, self.grace).await,
            };
        }

        let diagnostics = self.drain_diagnostics().await;
        let exited_cleanly = self.status.map_or(false, |s| s.success());
        if exited_cleanly && (self.bytes_out > 0 || diagnostics.is_empty()) {
            if !diagnostics.is_empty() {
                debug!("Transcoder stderr: {}", diagnostics);
            }
            return Ok(());
        }

        Err(TranscodeError::ProcessFailure {
            status: self.status,
            diagnostics,
        })
    }

    async fn shutdown(&mut self) {
        // stdout stays open until the process is gone, so it dies of the
        // signal we send rather than of a broken pipe.
        if let Some(mut child) = self.child.take() {
            self.status = terminate(&mut child, self.grace).await;
        }
        self.stdout = None;

        let diagnostics = self.drain_diagnostics().await;
        if !diagnostics.is_empty() {
            debug!("Transcoder stderr after shutdown: {}", diagnostics);
        }
    }

    /// Collected stderr; read errors and a stuck reader only lose the text.
    async fn drain_diagnostics(&mut self) -> String {
        let Some(mut handle) = self.stderr.take() else {
            return String::new();
        };

        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Ok(Err(e)) => {
                debug!("stderr reader failed: {}", e);
                String::new()
            }
            Err(_) => {
                handle.abort();
                debug!("Gave up reading transcoder stderr");
                String::new()
            }
        }
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // The consumer went away mid stream (e.g. the client disconnected).
        let grace = self.grace;
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let status = terminate(&mut child, grace).await;
                    drop(stdout);
                    debug!("Abandoned transcoder reaped: {:?}", status);
                    if let Some(stderr) = stderr {
                        stderr.abort();
                    }
                });
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!("Could not kill abandoned transcoder: {}", e);
                }
            }
        }
    }
}

/// Two-phase stop. Never waits longer than `grace` for a graceful exit.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    request_terminate(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return Some(status),
        Ok(Err(e)) => debug!("Waiting for transcoder failed: {}", e),
        Err(_) => warn!("Transcoder did not exit within {:?}, killing it", grace),
    }

    if let Err(e) = child.kill().await {
        debug!("Killing transcoder failed: {}", e);
    }
    child.try_wait().ok().flatten()
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("SIGTERM to {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Terminating transcoder failed: {}", e);
    }
}

fn collect_stderr(stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    tokio::spawn(read_capped(stderr, STDERR_LIMIT))
}

/// Reads up to `limit` bytes, then discards the rest so the writer never
/// blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: u64) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut limited = reader.take(limit);
    if let Err(e) = limited.read_to_end(&mut captured).await {
        debug!("Reading transcoder stderr failed: {}", e);
        return captured;
    }

    let mut rest = limited.into_inner();
    if let Err(e) = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
        debug!("Discarding transcoder stderr failed: {}", e);
    }
    captured
}
