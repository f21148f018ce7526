//! `tiny-vid-progress <input> <output> [ffmpeg args...]`
//!
//! Runs one transcode and writes its events to stdout as JSON lines:
//! `{"event":"progress","payload":{...}}`, `{"event":"error","payload":...}` and a final
//! `{"event":"done","payload":"completed"}`. Logs go to stderr. Ctrl-C cancels the run and
//! removes the partial output.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;

use tiny_vid_progress::{
    ProgressPayload, RunEvents, TranscodeError, TranscodeRequest, Transcoder, TranscoderConfig,
};
use tokio_util::sync::CancellationToken;

/// Enough slack that a terminal consumer rarely loses records.
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, serde::Serialize)]
struct Event<'a, T: serde::Serialize> {
    event: &'a str,
    payload: T,
}

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize event: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn emit<T: serde::Serialize>(event: &str, payload: T) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = write_json_line(&mut stdout, &Event { event, payload }) {
        log::warn!(target: "tiny_vid_progress", "Could not write {} event: {}", event, e);
    }
}

async fn print_events(mut events: RunEvents) {
    let mut progress_open = true;
    let mut errors_open = true;
    while progress_open || errors_open {
        tokio::select! {
            progress = events.progress.recv(), if progress_open => match progress {
                Some(progress) => emit("progress", ProgressPayload::from(&progress)),
                None => progress_open = false,
            },
            error = events.errors.recv(), if errors_open => match error {
                Some(error) => emit("error", &error),
                None => errors_open = false,
            },
        }
    }
    if let Ok(outcome) = events.done.await {
        emit("done", outcome);
    }
}

async fn run(request: TranscodeRequest) -> Result<(), TranscodeError> {
    let config = TranscoderConfig::discover()?.channel_capacity(EVENT_CAPACITY);
    let token = CancellationToken::new();
    let (transcoder, events) = Transcoder::prepare(token.clone(), request, config).await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!(target: "tiny_vid_progress", "Interrupted, cancelling transcode");
            token.cancel();
        }
    });

    let printer = tokio::spawn(print_events(events));
    let result = transcoder.start().await;
    let _ = printer.await;
    result
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Option<TranscodeRequest> {
    let source = args.next()?;
    let destination = args.next()?;
    let ffmpeg_args = args.map(|a| a.to_string_lossy().into_owned());
    Some(TranscodeRequest::new(source, destination).args(ffmpeg_args))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let Some(request) = parse_args(std::env::args_os().skip(1)) else {
        eprintln!("usage: tiny-vid-progress <input> <output> [ffmpeg args...]");
        return ExitCode::from(2);
    };

    match run(request).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(TranscodeError::Cancelled) => ExitCode::from(130),
        Err(e) => {
            log::error!(target: "tiny_vid_progress", "{}", e);
            emit("failed", &e);
            ExitCode::FAILURE
        }
    }
}
