#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tiny_vid_progress::{Progress, RunEvents, TranscodeRequest, TranscoderConfig};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

pub const PROGRESS_LINE_2S: &str =
    "frame=   50 fps= 25 q=28.0 size=     256KiB time=00:00:02.00 bitrate= 512.0kbit/s speed=1.00x";
pub const PROGRESS_LINE_5S: &str =
    "frame=  125 fps= 25 q=28.0 size=     640KiB time=00:00:05.00 bitrate= 512.0kbit/s speed=1.00x";
pub const MALFORMED_FRAME_LINE: &str =
    "frame=abc fps= 25 q=28.0 size=     256KiB time=00:00:02.00 bitrate= 512.0kbit/s speed=1.00x";

/// Temp directory holding a source file and fake ffmpeg/ffprobe scripts.
pub struct FakeTools {
    dir: TempDir,
    pub source: PathBuf,
}

impl FakeTools {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let source = dir.path().join("input.mkv");
        fs::write(&source, b"not really a video").expect("write source");
        Self { dir, source }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// ffprobe that reports `duration` seconds for any input.
    pub fn ffprobe(&self, duration: &str) -> PathBuf {
        write_script(
            self.dir.path(),
            "ffprobe",
            &format!("printf '{{\"format\":{{\"duration\":\"{duration}\"}}}}'\n"),
        )
    }

    /// ffprobe that exits 1 with a message on stderr.
    pub fn failing_ffprobe(&self) -> PathBuf {
        write_script(
            self.dir.path(),
            "ffprobe",
            "echo 'input.mkv: Invalid data found when processing input' >&2\nexit 1\n",
        )
    }

    /// ffmpeg that writes each line to stderr terminated by `\r`, then runs `tail`.
    /// `$out` holds the destination (last argument).
    pub fn ffmpeg(&self, lines: &[&str], tail: &str) -> PathBuf {
        let mut body = String::from("for out; do :; done\n");
        for line in lines {
            body.push_str(&format!("printf '%s\\r' '{line}' >&2\n"));
        }
        body.push_str(tail);
        body.push('\n');
        write_script(self.dir.path(), "ffmpeg", &body)
    }

    /// ffmpeg that records its arguments one per line into `args.txt`, then succeeds.
    pub fn recording_ffmpeg(&self) -> PathBuf {
        let record = self.path("args.txt");
        write_script(
            self.dir.path(),
            "ffmpeg",
            &format!(
                "for arg; do printf '%s\\n' \"$arg\" >> '{}'; done\n",
                record.display()
            ),
        )
    }

    pub fn recorded_args(&self) -> Vec<String> {
        fs::read_to_string(self.path("args.txt"))
            .expect("read recorded args")
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn config(&self, ffmpeg: PathBuf, ffprobe: PathBuf) -> TranscoderConfig {
        TranscoderConfig::with_tools(ffmpeg, ffprobe)
    }

    pub fn request(&self, destination: &Path) -> TranscodeRequest {
        TranscodeRequest::new(&self.source, destination)
    }
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Everything a run delivered after its channels closed.
#[derive(Debug)]
pub struct Collected {
    pub progress: Vec<Progress>,
    pub errors: Vec<tiny_vid_progress::TranscodeError>,
    pub outcome: Option<tiny_vid_progress::RunOutcome>,
}

/// Drain every channel until the run finalizes them.
pub async fn collect(mut events: RunEvents) -> Collected {
    let mut progress = Vec::new();
    while let Some(p) = events.progress.recv().await {
        progress.push(p);
    }
    let mut errors = Vec::new();
    while let Some(e) = events.errors.recv().await {
        errors.push(e);
    }
    let outcome = events.done.await.ok();
    Collected {
        progress,
        errors,
        outcome,
    }
}
