//! FFprobe-based duration lookup for the source file.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use crate::error::TranscodeError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

/// Extract `format.duration` from `ffprobe -print_format json -show_format` output.
pub fn parse_ffprobe_duration(json: &str) -> Result<Duration, TranscodeError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| TranscodeError::ProbeDuration(format!("invalid ffprobe JSON: {}", e)))?;

    let raw = output
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| TranscodeError::ProbeDuration("no format.duration in ffprobe output".into()))?;
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| TranscodeError::ProbeDuration(format!("{raw:?} is not a number of seconds")))?;

    Duration::try_from_secs_f64(seconds)
        .map_err(|_| TranscodeError::ProbeDuration(format!("{raw:?} is not a valid duration")))
}

/// Run ffprobe on `path` and return the container duration. Blocks until ffprobe exits.
pub fn probe_duration(ffprobe: &Path, path: &Path) -> Result<Duration, TranscodeError> {
    let path_str = path.to_string_lossy();

    log::debug!(
        target: "tiny_vid_progress::ffmpeg::ffprobe",
        "probe_duration: ffprobe={}, path={}",
        ffprobe.display(),
        path_str
    );

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            &path_str,
        ])
        .stdin(Stdio::null())
        .output()
        .map_err(TranscodeError::ProbeSpawn)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        log::warn!(
            target: "tiny_vid_progress::ffmpeg::ffprobe",
            "ffprobe failed for {}: code={:?}",
            path_str,
            output.status.code()
        );
        return Err(TranscodeError::ProbeFailed {
            code: output.status.code(),
            stderr,
        });
    }

    let json = String::from_utf8(output.stdout).map_err(|_| TranscodeError::ProbeOutput)?;
    let duration = parse_ffprobe_duration(&json)?;

    log::debug!(
        target: "tiny_vid_progress::ffmpeg::ffprobe",
        "probe_duration: {} -> {:.3}s",
        path_str,
        duration.as_secs_f64()
    );
    Ok(duration)
}
