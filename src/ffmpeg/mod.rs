pub mod discovery;
mod error;
pub mod ffprobe;
pub mod progress;
pub mod runner;

use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use error::{ExitSummary, summarize_exit};
pub use progress::{Progress, ProgressError, ProgressField, ProgressLayout, RunContext};
pub use runner::{RunEvents, RunOutcome, TranscodeRequest, Transcoder};

use crate::error::TranscodeError;

/// Subdirectory used by [`converted_destination`].
pub const CONVERTED_DIR: &str = "Converted";

/// What the reader does when a channel has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// `try_send`: a slow or absent consumer loses records, the reader never stalls.
    #[default]
    DropWhenFull,
    /// `send().await`: nothing is lost, but a consumer that never reads stalls the reader
    /// until the run is cancelled.
    Block,
}

/// Binaries and policies for a transcode run.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub layout: ProgressLayout,
    pub delivery: DeliveryPolicy,
    /// Buffered slots per channel. Values below 1 are treated as 1.
    pub channel_capacity: usize,
    /// Fail construction when the destination already exists instead of overwriting it.
    pub reject_existing_destination: bool,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            layout: ProgressLayout::default(),
            delivery: DeliveryPolicy::default(),
            channel_capacity: 1,
            reject_existing_destination: false,
        }
    }
}

impl TranscoderConfig {
    /// Default policies with binaries resolved by [`discovery`].
    pub fn discover() -> Result<Self, TranscodeError> {
        let ffmpeg_path = discovery::get_ffmpeg_path()?.to_path_buf();
        let ffprobe_path = discovery::get_ffprobe_path(&ffmpeg_path)?;
        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
            ..Self::default()
        })
    }

    pub fn with_tools(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            ..Self::default()
        }
    }

    pub fn layout(mut self, layout: ProgressLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn reject_existing_destination(mut self, reject: bool) -> Self {
        self.reject_existing_destination = reject;
        self
    }

    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

/// Serializable view of a [`Progress`] record for JSON consumers.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub source: String,
    pub destination: String,
    pub frame: u64,
    pub fps: f64,
    pub q: f64,
    pub size_kib: f64,
    pub bitrate_kbits: f64,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dup: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop: Option<u64>,
    pub elapsed_secs: f64,
    pub percent_complete: f64,
    pub time_remaining_secs: f64,
    /// RFC 3339, UTC.
    pub estimated_finish: String,
}

impl From<&Progress> for ProgressPayload {
    fn from(p: &Progress) -> Self {
        Self {
            source: path_to_string(&p.source),
            destination: path_to_string(&p.destination),
            frame: p.frame,
            fps: p.fps,
            q: p.q,
            size_kib: p.size_kib,
            bitrate_kbits: p.bitrate_kbits,
            speed: p.speed,
            dup: p.dup,
            drop: p.drop,
            elapsed_secs: p.elapsed.as_secs_f64(),
            percent_complete: p.percent_complete,
            time_remaining_secs: p.time_remaining.as_secs_f64(),
            estimated_finish: OffsetDateTime::from(p.estimated_finish)
                .format(&Rfc3339)
                .unwrap_or_default(),
        }
    }
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}

/// `<dir>/Converted/<stem>.mp4` for a source at `<dir>/<name>`.
pub fn converted_destination(source: &Path) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = source.file_stem().unwrap_or(source.as_os_str());
    let mut destination = dir.join(CONVERTED_DIR).join(stem);
    destination.set_extension("mp4");
    destination
}
