//! FFmpeg process orchestration.
//!
//! [`Transcoder::new`] checks paths and probes the source duration. [`Transcoder::start`]
//! spawns FFmpeg, drains its stderr on a background task and waits for the process on the
//! calling task. Progress records, errors and the final [`RunOutcome`] reach the consumer
//! through [`RunEvents`]. Whichever side sees the end of the run first finalizes it; the
//! other side finds nothing left to do.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ffprobe::probe_duration;
use super::progress::{Progress, ProgressLayout, RunContext, parse_progress_line};
use super::{DeliveryPolicy, TranscoderConfig, path_to_string};
use crate::error::TranscodeError;

/// Keep only the last N bytes of non-progress stderr for failure reports.
const MAX_STDERR_BYTES: usize = 64 * 1024;
/// How long to wait for the reader to hit EOF once FFmpeg has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a run ended, as reported on the completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// FFmpeg exited without being cancelled or aborted. Its exit status is the result of
    /// [`Transcoder::start`].
    Completed,
    /// The caller's token was cancelled. Partial output was removed.
    Cancelled,
    /// Unreadable progress output ended the run. Partial output was removed.
    Aborted,
}

impl RunOutcome {
    pub fn is_completed(self) -> bool {
        self == RunOutcome::Completed
    }
}

/// Source, destination and the encoder arguments placed between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub args: Vec<String>,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Consumer side of a run. All three close once the run is finalized.
#[derive(Debug)]
pub struct RunEvents {
    pub progress: mpsc::Receiver<Progress>,
    pub errors: mpsc::Receiver<TranscodeError>,
    pub done: oneshot::Receiver<RunOutcome>,
}

struct RunChannels {
    progress: mpsc::Sender<Progress>,
    errors: mpsc::Sender<TranscodeError>,
    done: oneshot::Sender<RunOutcome>,
}

/// State shared by the waiting caller and the stderr reader.
struct RunShared {
    context: RunContext,
    layout: ProgressLayout,
    delivery: DeliveryPolicy,
    /// Caller's token.
    cancel: CancellationToken,
    /// Child of `cancel`; also cancelled by the reader on unreadable progress.
    abort: CancellationToken,
    /// `Some` until the run is finalized. The lock is held for the whole finalization so a
    /// second caller returns only after the first one is done.
    channels: Mutex<Option<RunChannels>>,
    /// Set by the finalization that won the latch.
    recorded: OnceLock<RunOutcome>,
    stderr_tail: Mutex<Vec<u8>>,
}

impl RunShared {
    fn outcome(&self) -> RunOutcome {
        if self.cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else if self.abort.is_cancelled() {
            RunOutcome::Aborted
        } else {
            RunOutcome::Completed
        }
    }

    /// Finalize the run once: remove partial output if it did not complete, report the
    /// outcome and close every channel. Returns `None` if the run was already finalized.
    fn finish(&self) -> Option<RunOutcome> {
        self.finalize(true)
    }

    /// Finalize a run whose FFmpeg never started. Whatever sits at the destination is not
    /// ours, so it is left alone.
    fn finish_unspawned(&self) -> Option<RunOutcome> {
        self.finalize(false)
    }

    fn finalize(&self, remove_partial: bool) -> Option<RunOutcome> {
        let mut guard = self.channels.lock();
        let RunChannels {
            progress,
            errors,
            done,
        } = guard.take()?;
        let outcome = self.outcome();
        let _ = self.recorded.set(outcome);

        if remove_partial && !outcome.is_completed() {
            match fs::remove_file(&self.context.destination) {
                Ok(()) => log::debug!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "Removed partial output {}",
                    self.context.destination.display()
                ),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "Could not remove partial output {}: {}",
                    self.context.destination.display(),
                    e
                ),
            }
        }

        drop(progress);
        drop(errors);
        // The consumer may have dropped the receiver.
        let _ = done.send(outcome);
        log::debug!(
            target: "tiny_vid_progress::ffmpeg::runner",
            "Run finalized: {:?}",
            outcome
        );
        Some(outcome)
    }

    fn try_deliver<T>(&self, value: T, sender: fn(&RunChannels) -> &mpsc::Sender<T>) {
        let guard = self.channels.lock();
        if let Some(channels) = guard.as_ref()
            && let Err(mpsc::error::TrySendError::Full(_)) = sender(channels).try_send(value)
        {
            log::trace!(
                target: "tiny_vid_progress::ffmpeg::runner",
                "No listener ready, dropped {}",
                std::any::type_name::<T>()
            );
        }
    }

    async fn deliver<T>(&self, value: T, sender: fn(&RunChannels) -> &mpsc::Sender<T>) {
        match self.delivery {
            DeliveryPolicy::DropWhenFull => self.try_deliver(value, sender),
            DeliveryPolicy::Block => {
                let tx = self.channels.lock().as_ref().map(|c| sender(c).clone());
                if let Some(tx) = tx {
                    tokio::select! {
                        _ = tx.send(value) => {}
                        _ = self.abort.cancelled() => {}
                    }
                }
            }
        }
    }

    fn remember_stderr(&self, line: &str) {
        let mut tail = self.stderr_tail.lock();
        tail.extend_from_slice(line.as_bytes());
        tail.push(b'\n');
        if tail.len() > MAX_STDERR_BYTES {
            let excess = tail.len() - MAX_STDERR_BYTES;
            tail.drain(..excess);
        }
    }

    fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr_tail.lock()).into_owned()
    }

    /// Outcome reported on the completion channel; token state if not finalized yet.
    fn recorded_outcome(&self) -> RunOutcome {
        self.recorded.get().copied().unwrap_or_else(|| self.outcome())
    }

    /// `start`'s result for an exited FFmpeg, consistent with what the consumer was told.
    fn run_result(&self, status: ExitStatus) -> Result<(), TranscodeError> {
        match self.recorded_outcome() {
            RunOutcome::Cancelled => {
                log::warn!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "FFmpeg run cancelled: {}",
                    path_to_string(&self.context.destination)
                );
                Err(TranscodeError::Cancelled)
            }
            RunOutcome::Aborted => Err(TranscodeError::Aborted),
            RunOutcome::Completed if status.success() => {
                log::info!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "FFmpeg completed successfully"
                );
                Ok(())
            }
            RunOutcome::Completed => {
                let stderr = self.stderr_tail();
                let err_preview = stderr
                    .lines()
                    .rev()
                    .take(3)
                    .collect::<Vec<_>>()
                    .join("; ");
                log::error!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "FFmpeg failed (code={:?}): {}",
                    status.code(),
                    err_preview
                );
                Err(TranscodeError::process_failed(status.code(), stderr))
            }
        }
    }

    /// Returns false when the line ended the run.
    async fn handle_line(&self, line: &str) -> bool {
        match parse_progress_line(line, &self.context, self.layout) {
            Ok(progress) => {
                self.deliver(progress, |c| &c.progress).await;
                true
            }
            Err(e) if e.is_skip() => {
                self.remember_stderr(line);
                true
            }
            Err(e) => {
                log::error!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "Unreadable progress line {:?}: {}",
                    line,
                    e
                );
                self.remember_stderr(line);
                self.deliver(TranscodeError::from(e), |c| &c.errors).await;
                false
            }
        }
    }
}

/// Reads `\r`-terminated units until EOF, then finalizes the run.
async fn read_stderr(shared: Arc<RunShared>, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut unit = Vec::with_capacity(256);
    let mut parsing = true;
    loop {
        unit.clear();
        match reader.read_until(b'\r', &mut unit).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!(
                    target: "tiny_vid_progress::ffmpeg::runner",
                    "stderr read failed: {}",
                    e
                );
                break;
            }
        }
        if !parsing {
            // Run is being aborted; drain until FFmpeg is gone.
            continue;
        }
        // Banner and warning lines end in `\n` and can precede a progress line in one unit.
        let text = String::from_utf8_lossy(&unit);
        for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
            if !shared.handle_line(line).await {
                parsing = false;
                shared.abort.cancel();
                break;
            }
        }
    }
    shared.finish();
}

async fn terminate(child: &mut Child) -> io::Result<std::process::ExitStatus> {
    log::info!(
        target: "tiny_vid_progress::ffmpeg::runner",
        "Terminating FFmpeg process"
    );
    if let Err(e) = child.kill().await {
        // Already exited between the wakeup and the kill.
        log::debug!(
            target: "tiny_vid_progress::ffmpeg::runner",
            "kill failed: {}",
            e
        );
    }
    child.wait().await
}

/// One transcode attempt. Consumed by [`Transcoder::start`].
pub struct Transcoder {
    shared: Arc<RunShared>,
    ffmpeg_path: PathBuf,
    args: Vec<String>,
}

impl Transcoder {
    /// Validate paths, probe the source duration and open the run's channels.
    ///
    /// Blocks on ffprobe. Inside a tokio runtime use [`Transcoder::prepare`].
    pub fn new(
        cancel: CancellationToken,
        request: TranscodeRequest,
        config: TranscoderConfig,
    ) -> Result<(Self, RunEvents), TranscodeError> {
        let TranscodeRequest {
            source,
            destination,
            args,
        } = request;

        if !source.exists() {
            return Err(TranscodeError::SourceMissing(source));
        }
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TranscodeError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        if config.reject_existing_destination && destination.exists() {
            return Err(TranscodeError::DestinationExists(destination));
        }

        let total_duration = probe_duration(&config.ffprobe_path, &source)?;
        if total_duration.is_zero() {
            log::warn!(
                target: "tiny_vid_progress::ffmpeg::runner",
                "{} reports zero duration; percent complete will stay at 0",
                source.display()
            );
        }

        let capacity = config.effective_channel_capacity();
        let (progress_tx, progress_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);
        let (done_tx, done_rx) = oneshot::channel();

        let shared = Arc::new(RunShared {
            context: RunContext::new(source, destination, total_duration),
            layout: config.layout,
            delivery: config.delivery,
            abort: cancel.child_token(),
            cancel,
            channels: Mutex::new(Some(RunChannels {
                progress: progress_tx,
                errors: errors_tx,
                done: done_tx,
            })),
            recorded: OnceLock::new(),
            stderr_tail: Mutex::new(Vec::new()),
        });

        let transcoder = Self {
            shared,
            ffmpeg_path: config.ffmpeg_path,
            args,
        };
        let events = RunEvents {
            progress: progress_rx,
            errors: errors_rx,
            done: done_rx,
        };
        Ok((transcoder, events))
    }

    /// [`Transcoder::new`] on the blocking pool.
    pub async fn prepare(
        cancel: CancellationToken,
        request: TranscodeRequest,
        config: TranscoderConfig,
    ) -> Result<(Self, RunEvents), TranscodeError> {
        tokio::task::spawn_blocking(move || Self::new(cancel, request, config))
            .await
            .map_err(|e| TranscodeError::Setup(e.to_string()))?
    }

    pub fn context(&self) -> &RunContext {
        &self.shared.context
    }

    /// `-y -i <source> <args...> <destination>`
    pub fn command_args(&self) -> Vec<OsString> {
        let context = &self.shared.context;
        let mut args = vec![
            OsString::from("-y"),
            OsString::from("-i"),
            context.source.clone().into_os_string(),
        ];
        args.extend(self.args.iter().map(OsString::from));
        args.push(context.destination.clone().into_os_string());
        args
    }

    /// Run FFmpeg to completion, cancellation or abort.
    ///
    /// Returns `Ok(())` only when FFmpeg exited successfully and the run was not
    /// interrupted. The completion channel has been sent to and every channel closed by
    /// the time this returns.
    pub async fn start(self) -> Result<(), TranscodeError> {
        let args = self.command_args();
        let Transcoder {
            shared,
            ffmpeg_path,
            ..
        } = self;
        let context = &shared.context;

        if shared.cancel.is_cancelled() {
            shared.finish_unspawned();
            return Err(TranscodeError::Cancelled);
        }

        log::debug!(
            target: "tiny_vid_progress::ffmpeg::runner",
            "Spawning FFmpeg: path={}, input={}, output={}",
            ffmpeg_path.display(),
            path_to_string(&context.source),
            path_to_string(&context.destination)
        );

        let mut cmd = Command::new(&ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                shared.abort.cancel();
                shared.finish_unspawned();
                return Err(TranscodeError::Spawn(e));
            }
        };

        let Some(stderr) = child.stderr.take() else {
            let _ = terminate(&mut child).await;
            shared.abort.cancel();
            shared.finish_unspawned();
            return Err(TranscodeError::StderrUnavailable);
        };

        let mut reader = tokio::spawn(read_stderr(Arc::clone(&shared), stderr));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = shared.abort.cancelled() => terminate(&mut child).await,
        };

        if shared.abort.is_cancelled() {
            // FFmpeg is gone; nothing else can write the destination.
            shared.finish();
        }
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            log::warn!(
                target: "tiny_vid_progress::ffmpeg::runner",
                "stderr still open {:?} after FFmpeg exited",
                READER_DRAIN_TIMEOUT
            );
            reader.abort();
        }
        shared.finish();

        let status = status.map_err(TranscodeError::Wait)?;
        shared.run_result(status)
    }
}
