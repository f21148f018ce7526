//! FFmpeg stderr progress parsing.
//!
//! FFmpeg periodically writes a status line such as
//! `frame=  100 fps= 25 q=28.0 size=    2048KiB time=00:00:10.00 bitrate= 512.0kbit/s speed=1.02x`
//! terminated by `\r`. Each line is split into name/value tokens and turned into a [`Progress`]
//! record with derived metrics (percent complete, time remaining, estimated finish).

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use time::OffsetDateTime;
use time::macros::format_description;

/// Tokens are maximal runs of letters, digits, `.`, `:`, `/` and `-`; everything else separates.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}.:/-]+").expect("invalid token regex"));

const PROGRESS_MARKER: &str = "frame=";
const NOT_AVAILABLE: &str = "N/A";

/// Token count of the fixed-position layout (9 name/value pairs, dup/drop included).
pub const POSITIONAL_TOKEN_COUNT: usize = 18;

/// Lower bound substituted for percent complete before it is used as a divisor.
pub const MIN_PERCENT: f64 = 0.01;

/// Fields of an FFmpeg progress line, in the order FFmpeg prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressField {
    Frame,
    Fps,
    Q,
    Size,
    Time,
    Bitrate,
    Dup,
    Drop,
    Speed,
}

impl ProgressField {
    pub const ALL: [ProgressField; 9] = [
        ProgressField::Frame,
        ProgressField::Fps,
        ProgressField::Q,
        ProgressField::Size,
        ProgressField::Time,
        ProgressField::Bitrate,
        ProgressField::Dup,
        ProgressField::Drop,
        ProgressField::Speed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProgressField::Frame => "frame",
            ProgressField::Fps => "fps",
            ProgressField::Q => "q",
            ProgressField::Size => "size",
            ProgressField::Time => "time",
            ProgressField::Bitrate => "bitrate",
            ProgressField::Dup => "dup",
            ProgressField::Drop => "drop",
            ProgressField::Speed => "speed",
        }
    }

    /// Token index of the value in the 18-token layout.
    fn positional_index(self) -> usize {
        match self {
            ProgressField::Frame => 1,
            ProgressField::Fps => 3,
            ProgressField::Q => 5,
            ProgressField::Size => 7,
            ProgressField::Time => 9,
            ProgressField::Bitrate => 11,
            ProgressField::Dup => 13,
            ProgressField::Drop => 15,
            ProgressField::Speed => 17,
        }
    }

    /// The final summary line reports the size as `Lsize=`.
    fn matches(self, token: &str) -> bool {
        token == self.name() || (self == ProgressField::Size && token == "Lsize")
    }
}

impl fmt::Display for ProgressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How field values are located in a tokenized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressLayout {
    /// Exactly 18 tokens with values at fixed odd indices. Requires `dup=` and `drop=`.
    Positional,
    /// Look up each field by name and take the following token. Tolerates reordering,
    /// unknown fields (e.g. `elapsed=`) and missing `dup=`/`drop=`.
    #[default]
    NameScan,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    /// Not a status line. Callers skip it.
    #[error("no progress information")]
    NotProgress,

    #[error("line has {found} fields, expected {expected}")]
    FieldCount { expected: usize, found: usize },

    #[error("line has no {0} field")]
    MissingField(ProgressField),

    #[error("could not parse {field} from {value:?}")]
    InvalidField { field: ProgressField, value: String },

    #[error("time {0:?} is not HH:MM:SS.ss")]
    MalformedTime(String),
}

impl ProgressError {
    pub fn is_skip(&self) -> bool {
        matches!(self, ProgressError::NotProgress)
    }

    /// Field the failure is attributed to, if any.
    pub fn field(&self) -> Option<ProgressField> {
        match self {
            ProgressError::MissingField(field) | ProgressError::InvalidField { field, .. } => {
                Some(*field)
            }
            ProgressError::MalformedTime(_) => Some(ProgressField::Time),
            ProgressError::NotProgress | ProgressError::FieldCount { .. } => None,
        }
    }
}

/// Immutable per-run data shared by the parser and the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Probed source duration. May be zero.
    pub total_duration: Duration,
    pub started_at: SystemTime,
}

impl RunContext {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        total_duration: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            total_duration,
            started_at: SystemTime::now(),
        }
    }
}

/// Snapshot of encoding progress taken from one status line.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub frame: u64,
    pub fps: f64,
    pub q: f64,
    /// Output size so far, KiB.
    pub size_kib: f64,
    /// kbit/s; zero when FFmpeg reports `N/A`.
    pub bitrate_kbits: f64,
    /// Encode speed multiplier; zero when FFmpeg reports `N/A`.
    pub speed: f64,
    pub dup: Option<u64>,
    pub drop: Option<u64>,
    /// Media time encoded so far.
    pub elapsed: Duration,
    pub percent_complete: f64,
    pub time_remaining: Duration,
    pub estimated_finish: SystemTime,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let finish = OffsetDateTime::from(self.estimated_finish)
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_else(|_| "??:??:??".into());
        write!(
            f,
            "{:.2}% complete - time remaining: {} - estimated finish: {}",
            self.percent_complete,
            format_remaining(self.time_remaining),
            finish
        )
    }
}

/// `1h02m03s`, `2m05s` or `7s`, truncated to whole seconds.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes:02}m{seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// Raw value tokens before conversion.
struct RawFields<'a> {
    frame: &'a str,
    fps: &'a str,
    q: &'a str,
    size: &'a str,
    time: &'a str,
    bitrate: &'a str,
    dup: Option<&'a str>,
    drop: Option<&'a str>,
    speed: &'a str,
}

/// Parse one stderr line, using the current wall clock for derived metrics.
pub fn parse_progress_line(
    line: &str,
    context: &RunContext,
    layout: ProgressLayout,
) -> Result<Progress, ProgressError> {
    parse_progress_line_at(line, context, layout, SystemTime::now())
}

/// Parse one stderr line with `now` as the wall-clock reference.
pub fn parse_progress_line_at(
    line: &str,
    context: &RunContext,
    layout: ProgressLayout,
    now: SystemTime,
) -> Result<Progress, ProgressError> {
    let line = line.trim_start_matches(['\r', '\n', ' ']);
    if !line.starts_with(PROGRESS_MARKER) {
        return Err(ProgressError::NotProgress);
    }

    let tokens: Vec<&str> = TOKEN_RE.find_iter(line).map(|m| m.as_str()).collect();
    let raw = match layout {
        ProgressLayout::Positional => locate_positional(&tokens)?,
        ProgressLayout::NameScan => locate_by_name(&tokens)?,
    };

    let frame = parse_count(ProgressField::Frame, raw.frame)?;
    let fps = parse_float(ProgressField::Fps, raw.fps)?;
    let q = parse_float(ProgressField::Q, raw.q)?;
    let size_kib = parse_with_unit(ProgressField::Size, raw.size, &["KiB", "kB"])?;
    let elapsed = parse_time(raw.time)?;
    let bitrate_kbits = parse_with_unit(ProgressField::Bitrate, raw.bitrate, &["kbit/s", "kbits/s"])?;
    let dup = raw
        .dup
        .map(|v| parse_count(ProgressField::Dup, v))
        .transpose()?;
    let drop = raw
        .drop
        .map(|v| parse_count(ProgressField::Drop, v))
        .transpose()?;
    let speed = parse_with_unit(ProgressField::Speed, raw.speed, &["x"])?;

    let percent_complete = percent_complete(elapsed, context.total_duration);
    let wall_elapsed = now.duration_since(context.started_at).unwrap_or_default();
    let time_remaining = time_remaining(wall_elapsed, percent_complete);
    let estimated_finish = context
        .started_at
        .checked_add(wall_elapsed + time_remaining)
        .unwrap_or(now);

    Ok(Progress {
        source: context.source.clone(),
        destination: context.destination.clone(),
        frame,
        fps,
        q,
        size_kib,
        bitrate_kbits,
        speed,
        dup,
        drop,
        elapsed,
        percent_complete,
        time_remaining,
        estimated_finish,
    })
}

fn locate_positional<'a>(tokens: &[&'a str]) -> Result<RawFields<'a>, ProgressError> {
    if tokens.len() != POSITIONAL_TOKEN_COUNT {
        return Err(ProgressError::FieldCount {
            expected: POSITIONAL_TOKEN_COUNT,
            found: tokens.len(),
        });
    }
    let value = |field: ProgressField| {
        let index = field.positional_index();
        if field.matches(tokens[index - 1]) {
            Ok(tokens[index])
        } else {
            Err(ProgressError::MissingField(field))
        }
    };
    Ok(RawFields {
        frame: value(ProgressField::Frame)?,
        fps: value(ProgressField::Fps)?,
        q: value(ProgressField::Q)?,
        size: value(ProgressField::Size)?,
        time: value(ProgressField::Time)?,
        bitrate: value(ProgressField::Bitrate)?,
        dup: Some(value(ProgressField::Dup)?),
        drop: Some(value(ProgressField::Drop)?),
        speed: value(ProgressField::Speed)?,
    })
}

fn locate_by_name<'a>(tokens: &[&'a str]) -> Result<RawFields<'a>, ProgressError> {
    if tokens.len() < 2 {
        return Err(ProgressError::FieldCount {
            expected: 2,
            found: tokens.len(),
        });
    }
    let lookup = |field: ProgressField| -> Result<Option<&'a str>, ProgressError> {
        match tokens.iter().position(|t| field.matches(t)) {
            None => Ok(None),
            Some(index) => match tokens.get(index + 1) {
                Some(value) => Ok(Some(*value)),
                None => Err(ProgressError::InvalidField {
                    field,
                    value: String::new(),
                }),
            },
        }
    };
    let required =
        |field: ProgressField| lookup(field)?.ok_or(ProgressError::MissingField(field));
    Ok(RawFields {
        frame: required(ProgressField::Frame)?,
        fps: required(ProgressField::Fps)?,
        q: required(ProgressField::Q)?,
        size: required(ProgressField::Size)?,
        time: required(ProgressField::Time)?,
        bitrate: required(ProgressField::Bitrate)?,
        dup: lookup(ProgressField::Dup)?,
        drop: lookup(ProgressField::Drop)?,
        speed: required(ProgressField::Speed)?,
    })
}

fn invalid(field: ProgressField, value: &str) -> ProgressError {
    ProgressError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn parse_count(field: ProgressField, value: &str) -> Result<u64, ProgressError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn parse_float(field: ProgressField, value: &str) -> Result<f64, ProgressError> {
    value.parse().map_err(|_| invalid(field, value))
}

/// Strips the first matching unit suffix. `N/A` reads as zero.
fn parse_with_unit(field: ProgressField, value: &str, units: &[&str]) -> Result<f64, ProgressError> {
    if value == NOT_AVAILABLE {
        return Ok(0.0);
    }
    let number = units
        .iter()
        .find_map(|unit| value.strip_suffix(unit))
        .unwrap_or(value);
    parse_float(field, number).map_err(|_| invalid(field, value))
}

/// `HH:MM:SS.ss` to a duration. `N/A` and negative times (before the first frame) read as zero.
fn parse_time(value: &str) -> Result<Duration, ProgressError> {
    if value == NOT_AVAILABLE {
        return Ok(Duration::ZERO);
    }
    if let Some(magnitude) = value.strip_prefix('-') {
        return parse_time(magnitude)
            .map(|_| Duration::ZERO)
            .map_err(|_| ProgressError::MalformedTime(value.to_string()));
    }
    let malformed = || ProgressError::MalformedTime(value.to_string());
    let parts: Vec<&str> = value.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(malformed());
    };
    let hours: u64 = hours.parse().map_err(|_| malformed())?;
    let minutes: u64 = minutes.parse().map_err(|_| malformed())?;
    let seconds: f64 = seconds.parse().map_err(|_| malformed())?;
    let fraction = Duration::try_from_secs_f64(seconds).map_err(|_| malformed())?;
    hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|whole| Duration::from_secs(whole).checked_add(fraction))
        .ok_or_else(malformed)
}

/// Elapsed media time as a percentage of the total. Zero when the total is unknown.
pub fn percent_complete(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    elapsed.as_secs_f64() * 100.0 / total.as_secs_f64()
}

/// Linear extrapolation of the wall-clock time left from the time spent so far.
pub fn time_remaining(wall_elapsed: Duration, percent_complete: f64) -> Duration {
    let percent = if percent_complete.is_finite() {
        percent_complete.clamp(MIN_PERCENT, 100.0)
    } else {
        MIN_PERCENT
    };
    let seconds = wall_elapsed.as_secs_f64() / percent * (100.0 - percent);
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_LINE: &str = "frame=  100 fps= 25 q=28.0 size=    2048KiB time=00:00:10.00 bitrate= 512.0kbit/s speed=1.02x";
    const FULL_LINE: &str = "frame= 1200 fps= 48 q=31.0 size=   10240KiB time=00:00:50.00 bitrate=1677.7kbit/s dup=3 drop=1 speed=1.95x";

    fn context(total_secs: u64) -> RunContext {
        RunContext {
            source: PathBuf::from("/in/source.mkv"),
            destination: PathBuf::from("/out/destination.mp4"),
            total_duration: Duration::from_secs(total_secs),
            started_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    fn parse(line: &str, layout: ProgressLayout) -> Result<Progress, ProgressError> {
        let ctx = context(100);
        parse_progress_line_at(line, &ctx, layout, ctx.started_at + Duration::from_secs(4))
    }

    #[test]
    fn simple_line_parses_all_fields() {
        let p = parse(SIMPLE_LINE, ProgressLayout::NameScan).unwrap();
        assert_eq!(p.frame, 100);
        assert_eq!(p.fps, 25.0);
        assert_eq!(p.q, 28.0);
        assert_eq!(p.size_kib, 2048.0);
        assert_eq!(p.bitrate_kbits, 512.0);
        assert!((p.speed - 1.02).abs() < 1e-9);
        assert_eq!(p.elapsed, Duration::from_secs(10));
        assert!((p.percent_complete - 10.0).abs() < 1e-9);
        assert_eq!(p.dup, None);
        assert_eq!(p.drop, None);
        assert_eq!(p.source, PathBuf::from("/in/source.mkv"));
        assert_eq!(p.destination, PathBuf::from("/out/destination.mp4"));
    }

    #[test]
    fn derived_metrics_extrapolate_wall_clock() {
        let p = parse(SIMPLE_LINE, ProgressLayout::NameScan).unwrap();
        // 4s spent for 10% -> 36s left, finishing 40s after start.
        assert_eq!(p.time_remaining, Duration::from_secs(36));
        assert_eq!(p.estimated_finish, context(100).started_at + Duration::from_secs(40));
    }

    #[test]
    fn full_line_parses_with_positional_layout() {
        let p = parse(FULL_LINE, ProgressLayout::Positional).unwrap();
        assert_eq!(p.frame, 1200);
        assert_eq!(p.dup, Some(3));
        assert_eq!(p.drop, Some(1));
        assert!((p.speed - 1.95).abs() < 1e-9);
        assert!((p.percent_complete - 50.0).abs() < 1e-9);
    }

    #[test]
    fn full_line_parses_with_name_scan() {
        let p = parse(FULL_LINE, ProgressLayout::NameScan).unwrap();
        assert_eq!(p.dup, Some(3));
        assert_eq!(p.drop, Some(1));
        assert!((p.bitrate_kbits - 1677.7).abs() < 1e-9);
    }

    #[test]
    fn positional_layout_rejects_simple_line() {
        let err = parse(SIMPLE_LINE, ProgressLayout::Positional).unwrap_err();
        assert_eq!(
            err,
            ProgressError::FieldCount {
                expected: 18,
                found: 14
            }
        );
    }

    #[test]
    fn positional_layout_checks_field_names() {
        let line = "frame= 1 fps= 2 q=3.0 size= 4KiB time=00:00:01.00 bitrate=1.0kbit/s dup=0 elapsed=0 speed=1x";
        let err = parse(line, ProgressLayout::Positional).unwrap_err();
        assert_eq!(err, ProgressError::MissingField(ProgressField::Drop));
    }

    #[test]
    fn numeric_fields_survive_reformatting() {
        let p = parse(FULL_LINE, ProgressLayout::NameScan).unwrap();
        let line = format!(
            "frame={} fps={} q={} size={}KiB time=00:00:{:05.2} bitrate={}kbit/s dup={} drop={} speed={}x",
            p.frame,
            p.fps,
            p.q,
            p.size_kib,
            p.elapsed.as_secs_f64(),
            p.bitrate_kbits,
            p.dup.unwrap(),
            p.drop.unwrap(),
            p.speed
        );
        let again = parse(&line, ProgressLayout::Positional).unwrap();
        assert_eq!(again.frame, p.frame);
        assert!((again.fps - p.fps).abs() < 1e-9);
        assert!((again.q - p.q).abs() < 1e-9);
        assert!((again.size_kib - p.size_kib).abs() < 1e-9);
        assert!((again.bitrate_kbits - p.bitrate_kbits).abs() < 1e-9);
        assert!((again.speed - p.speed).abs() < 1e-9);
        assert_eq!(again.elapsed, p.elapsed);
    }

    #[test]
    fn non_progress_lines_are_skipped() {
        for line in [
            "",
            "Input #0, matroska,webm, from 'in.mkv':",
            "  Duration: 00:01:40.00, start: 0.000000, bitrate: 1000 kb/s",
            "fps=25 frame=100",
            "[libx264 @ 0x0] frame I:1",
        ] {
            let err = parse(line, ProgressLayout::NameScan).unwrap_err();
            assert!(err.is_skip(), "{line:?} -> {err:?}");
        }
    }

    #[test]
    fn leading_carriage_return_is_ignored() {
        let line = format!("\r{SIMPLE_LINE}\r");
        assert!(parse(&line, ProgressLayout::NameScan).is_ok());
    }

    #[test]
    fn not_available_bitrate_and_speed_read_as_zero() {
        let line = "frame=    0 fps=0.0 q=0.0 size=       0KiB time=N/A bitrate=N/A speed=N/A";
        let p = parse(line, ProgressLayout::NameScan).unwrap();
        assert_eq!(p.bitrate_kbits, 0.0);
        assert_eq!(p.speed, 0.0);
        assert_eq!(p.elapsed, Duration::ZERO);
        assert_eq!(p.percent_complete, 0.0);
    }

    #[test]
    fn zero_elapsed_keeps_time_remaining_finite() {
        let line = "frame=    0 fps=0.0 q=0.0 size=       0KiB time=00:00:00.00 bitrate=N/A speed=N/A";
        let p = parse(line, ProgressLayout::NameScan).unwrap();
        // 4s / 0.01% * 99.99%
        assert!((p.time_remaining.as_secs_f64() - 39_996.0).abs() < 1e-6);
    }

    #[test]
    fn zero_total_duration_does_not_divide_by_zero() {
        let ctx = context(0);
        let p = parse_progress_line_at(SIMPLE_LINE, &ctx, ProgressLayout::NameScan, ctx.started_at)
            .unwrap();
        assert_eq!(p.percent_complete, 0.0);
        assert_eq!(p.time_remaining, Duration::ZERO);
    }

    #[test]
    fn time_parses_fractional_seconds_exactly() {
        assert_eq!(
            parse_time("01:02:03.50").unwrap(),
            Duration::from_secs(3723) + Duration::from_millis(500)
        );
    }

    #[test]
    fn negative_time_reads_as_zero() {
        assert_eq!(parse_time("-00:00:00.02").unwrap(), Duration::ZERO);
    }

    #[test]
    fn oversized_time_is_malformed_not_a_panic() {
        for value in ["9999999999999999:00:00.00", "00:9999999999999999999:00.00"] {
            assert_eq!(
                parse_time(value).unwrap_err(),
                ProgressError::MalformedTime(value.into())
            );
        }
        let line = "frame=1 fps=1 q=1 size=1KiB time=9999999999999999:00:00.00 bitrate=1kbit/s speed=1x";
        let err = parse(line, ProgressLayout::NameScan).unwrap_err();
        assert_eq!(err.field(), Some(ProgressField::Time));
        assert!(!err.is_skip());
    }

    #[test]
    fn malformed_time_is_reported() {
        assert_eq!(
            parse_time("00:10.00").unwrap_err(),
            ProgressError::MalformedTime("00:10.00".into())
        );
        assert_eq!(
            parse_time("aa:00:10.00").unwrap_err(),
            ProgressError::MalformedTime("aa:00:10.00".into())
        );
        let line = "frame=1 fps=1 q=1 size=1KiB time=00:10 bitrate=1kbit/s speed=1x";
        let err = parse(line, ProgressLayout::NameScan).unwrap_err();
        assert_eq!(err.field(), Some(ProgressField::Time));
    }

    #[test]
    fn malformed_frame_is_field_specific() {
        let line = "frame=abc fps=25 q=28.0 size=2048KiB time=00:00:10.00 bitrate=512.0kbit/s speed=1.02x";
        let err = parse(line, ProgressLayout::NameScan).unwrap_err();
        assert_eq!(
            err,
            ProgressError::InvalidField {
                field: ProgressField::Frame,
                value: "abc".into()
            }
        );
        assert!(!err.is_skip());
    }

    #[test]
    fn each_field_reports_its_own_failure() {
        let cases = [
            (ProgressField::Fps, "frame=1 fps=x q=1 size=1KiB time=00:00:01.00 bitrate=1kbit/s speed=1x"),
            (ProgressField::Q, "frame=1 fps=1 q=x size=1KiB time=00:00:01.00 bitrate=1kbit/s speed=1x"),
            (ProgressField::Size, "frame=1 fps=1 q=1 size=xKiB time=00:00:01.00 bitrate=1kbit/s speed=1x"),
            (ProgressField::Bitrate, "frame=1 fps=1 q=1 size=1KiB time=00:00:01.00 bitrate=xkbit/s speed=1x"),
            (ProgressField::Dup, "frame=1 fps=1 q=1 size=1KiB time=00:00:01.00 bitrate=1kbit/s dup=x drop=0 speed=1x"),
            (ProgressField::Drop, "frame=1 fps=1 q=1 size=1KiB time=00:00:01.00 bitrate=1kbit/s dup=0 drop=x speed=1x"),
            (ProgressField::Speed, "frame=1 fps=1 q=1 size=1KiB time=00:00:01.00 bitrate=1kbit/s speed=fastx"),
        ];
        for (field, line) in cases {
            let err = parse(line, ProgressLayout::NameScan).unwrap_err();
            assert_eq!(err.field(), Some(field), "{line}");
        }
    }

    #[test]
    fn bare_marker_is_a_field_count_error() {
        let err = parse("frame=", ProgressLayout::NameScan).unwrap_err();
        assert_eq!(err, ProgressError::FieldCount { expected: 2, found: 1 });
        assert!(!err.is_skip());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let line = "frame=1 fps=1 q=1 size=1KiB time=00:00:01.00 speed=1x";
        let err = parse(line, ProgressLayout::NameScan).unwrap_err();
        assert_eq!(err, ProgressError::MissingField(ProgressField::Bitrate));
    }

    #[test]
    fn name_scan_accepts_final_summary_line() {
        let line = "frame=  250 fps=120 q=-1.0 Lsize=    4096KiB time=00:00:10.00 bitrate=3355.4kbit/s speed=4.8x elapsed=0:00:02.08";
        let p = parse(line, ProgressLayout::NameScan).unwrap();
        assert_eq!(p.frame, 250);
        assert_eq!(p.q, -1.0);
        assert_eq!(p.size_kib, 4096.0);
    }

    #[test]
    fn legacy_units_are_stripped() {
        let line = "frame=  10 fps=0.0 q=28.0 size=     256kB time=00:00:00.40 bitrate=5242.9kbits/s speed=0.79x";
        let p = parse(line, ProgressLayout::NameScan).unwrap();
        assert_eq!(p.size_kib, 256.0);
        assert!((p.bitrate_kbits - 5242.9).abs() < 1e-9);
    }

    #[test]
    fn overshoot_never_yields_negative_remaining() {
        assert_eq!(time_remaining(Duration::from_secs(10), 130.0), Duration::ZERO);
    }

    #[test]
    fn remaining_is_formatted_compactly() {
        assert_eq!(format_remaining(Duration::from_secs(7)), "7s");
        assert_eq!(format_remaining(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_remaining(Duration::from_secs(3723)), "1h02m03s");
    }

    #[test]
    fn display_summarises_progress() {
        let p = parse(SIMPLE_LINE, ProgressLayout::NameScan).unwrap();
        // started_at is 22:13:20 UTC; finish 40s later.
        assert_eq!(
            p.to_string(),
            "10.00% complete - time remaining: 36s - estimated finish: 22:14:00"
        );
    }
}
