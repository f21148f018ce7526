//! Locate the `ffmpeg` and `ffprobe` binaries.
//!
//! Order: `FFMPEG_PATH` env override, common install paths, then `which`/`where`.
//! ffprobe is looked up next to ffmpeg unless `FFPROBE_PATH` is set.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::TranscodeError;

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(binary).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, TranscodeError> {
    if let Some(path) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "tiny_vid_progress::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            path.display()
        );
        return Ok(path);
    }

    if let Some(path) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "tiny_vid_progress::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            path.display()
        );
        return Ok(path);
    }

    log::error!(
        target: "tiny_vid_progress::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(TranscodeError::FfmpegNotFound(
        "FFmpeg not found. Install it or point FFMPEG_PATH at the binary:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

fn env_path(var: &str) -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os(var)?);
    if path.exists() {
        log::debug!(
            target: "tiny_vid_progress::ffmpeg::discovery",
            "{} from env: {}",
            var,
            path.display()
        );
        Some(path)
    } else {
        log::warn!(
            target: "tiny_vid_progress::ffmpeg::discovery",
            "{} points at missing file {}, ignoring",
            var,
            path.display()
        );
        None
    }
}

/// FFmpeg path, cached for the process lifetime.
pub fn get_ffmpeg_path() -> Result<&'static Path, TranscodeError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let path = match env_path("FFMPEG_PATH") {
        Some(p) => p,
        None => resolve_ffmpeg_path()?,
    };
    // Another thread may have won the race; either value is valid.
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).as_path())
}

/// ffprobe paths to try for a given ffmpeg binary: platform-suffixed first, then plain.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(target_os = "windows") { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

/// ffprobe path: `FFPROBE_PATH`, otherwise next to `ffmpeg_path`.
pub fn get_ffprobe_path(ffmpeg_path: &Path) -> Result<PathBuf, TranscodeError> {
    if let Some(path) = env_path("FFPROBE_PATH") {
        return Ok(path);
    }
    ffprobe_candidates(ffmpeg_path)
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            TranscodeError::FfmpegNotFound(format!(
                "ffprobe not found next to {}",
                ffmpeg_path.display()
            ))
        })
}
