//! Error type for transcode runs. Implements Display and Serialize for consumers.

use std::path::PathBuf;

use crate::ffmpeg::progress::ProgressError;
use crate::ffmpeg::summarize_exit;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("source {0:?} does not exist")]
    SourceMissing(PathBuf),

    #[error("destination {0:?} already exists")]
    DestinationExists(PathBuf),

    #[error("could not create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("failed to run ffprobe: {0}")]
    ProbeSpawn(#[source] std::io::Error),

    #[error("ffprobe failed (code {code:?}): {stderr}")]
    ProbeFailed { code: Option<i32>, stderr: String },

    #[error("ffprobe output was not valid UTF-8")]
    ProbeOutput,

    #[error("could not get duration from ffprobe: {0}")]
    ProbeDuration(String),

    #[error("transcode setup task failed: {0}")]
    Setup(String),

    #[error("failed to spawn FFmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("could not capture FFmpeg stderr")]
    StderrUnavailable,

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("FFmpeg failed (code {code:?}): {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("failed waiting for FFmpeg: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("Aborted after unreadable progress output")]
    Aborted,
}

impl TranscodeError {
    pub fn process_failed(code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::ProcessFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// True for the two ways a run ends early without FFmpeg itself failing.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Aborted)
    }
}

impl serde::Serialize for TranscodeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let summary = match self {
            TranscodeError::ProcessFailed { code, stderr } => summarize_exit("FFmpeg", stderr, *code),
            TranscodeError::ProbeFailed { code, stderr } => summarize_exit("ffprobe", stderr, *code),
            _ => return serializer.serialize_str(&self.to_string()),
        };
        serde::Serialize::serialize(&summary, serializer)
    }
}
