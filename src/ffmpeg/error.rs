//! Turn a tool's exit code and stderr tail into a short summary plus detail.
//!
//! Exit codes follow ffmpeg.c: 1 (general), 69 (rate exceeded), 123 (hard exit),
//! 255 (signal). `None` means the process was killed by a signal.

use serde::Serialize;

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_LEN: usize = 120;

/// Serialized form of a process failure: one-line summary, full stderr tail as detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitSummary {
    pub summary: String,
    pub detail: String,
}

pub fn summarize_exit(tool: &str, stderr: &str, exit_code: Option<i32>) -> ExitSummary {
    let summary = match exit_code {
        Some(1) => format!("{tool} failed."),
        Some(69) => "Encoding rate limit exceeded.".into(),
        Some(123 | 255) => "Encoding was stopped.".into(),
        Some(code) => format!("{tool} failed (exit code {code})."),
        None => match last_meaningful_line(stderr) {
            Some(line) => truncate(line, SUMMARY_MAX_LEN),
            None => format!("{tool} was terminated by a signal."),
        },
    };
    ExitSummary {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// FFmpeg prints the fatal reason last.
fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
}

fn truncate(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut end = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &line[..end], ELLIPSIS)
}
