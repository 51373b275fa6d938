//! Parsing ffmpeg's diagnostic stream into progress events.

use bytes::BytesMut;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::io;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

use super::feed::ErrorLog;
use super::metadata::Metadata;
use super::types::Progress;

/// Longest line buffered before it is emitted without a terminator.
const MAX_LINE_LEN: usize = 64 * 1024;

static EQUALS_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"=\s+").unwrap());

/// Frames ffmpeg's diagnostic stream into lines ending at `\n` or `\r`.
///
/// ffmpeg redraws its status line with a bare carriage return, so both are
/// terminators. Unterminated bytes at end of stream form a final line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusLineCodec;

impl Decoder for StatusLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(pos) = buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let line = buf.split_to(pos + 1);
            return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
        }
        if buf.len() >= MAX_LINE_LEN {
            let line = buf.split();
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => {
                let line = buf.split();
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
        }
    }
}

/// Status lines read from `reader`.
pub fn status_lines<R: AsyncRead>(reader: R) -> FramedRead<R, StatusLineCodec> {
    FramedRead::new(reader, StatusLineCodec)
}

/// Converts `HH:MM:SS[.ms]` to seconds.
///
/// Anything that does not split into exactly three fields yields 0; a field
/// that is not a number counts as 0.
pub fn duration_to_secs(time: &str) -> f64 {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }
    let field = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    field(parts[0]) * 3600.0 + field(parts[1]) * 60.0 + field(parts[2])
}

/// Completion percentage (0-100) of `current_time` against a total duration.
pub fn completion_percent(current_time: &str, duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(total) if total.is_finite() && total > 0.0 => {
            (duration_to_secs(current_time) * 100.0 / total).min(100.0)
        }
        _ => 0.0,
    }
}

/// Whether a status line is ffmpeg reporting a failure.
pub fn is_error_line(line: &str) -> bool {
    line.starts_with("Error")
        || line.starts_with("Unrecognized option")
        || (line.contains("[y/N]") && line.contains("exiting"))
}

/// Whether a status line is a periodic progress report.
pub fn is_progress_line(line: &str) -> bool {
    line.contains("time=") && line.contains("bitrate=")
}

/// Reads `key=value` fields out of a periodic status line.
///
/// Missing fields stay empty; the percentage is left at 0.
pub fn parse_status_fields(line: &str) -> Progress {
    let normalized = EQUALS_SPACES.replace_all(line, "=");
    let mut progress = Progress::default();

    for field in normalized.split_whitespace() {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key {
            "frame" => progress.frames_processed = value.to_string(),
            "time" => progress.current_time = value.to_string(),
            "bitrate" => progress.current_bitrate = value.to_string(),
            "speed" => progress.speed = value.to_string(),
            _ => {}
        }
    }

    progress
}

/// Turns ffmpeg status lines into [`Progress`] events and error messages.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    errors: ErrorLog,
    log_lines: bool,
}

impl ProgressParser {
    pub fn new(metadata: Option<&Metadata>, errors: ErrorLog) -> Self {
        Self {
            duration_secs: metadata.and_then(Metadata::duration_secs),
            errors,
            log_lines: false,
        }
    }

    /// Log every non-empty line at debug level.
    pub fn with_line_logging(mut self, enabled: bool) -> Self {
        self.log_lines = enabled;
        self
    }

    /// Interprets one line. Error lines are recorded and yield `None`.
    pub fn parse_line(&self, line: &str) -> Option<Progress> {
        if line.is_empty() {
            return None;
        }
        if self.log_lines {
            debug!("ffmpeg: {}", line);
        }

        if is_progress_line(line) {
            let mut progress = parse_status_fields(line);
            progress.progress = completion_percent(&progress.current_time, self.duration_secs);
            return Some(progress);
        }

        if is_error_line(line) {
            let message = line.trim_end();
            let message = message.strip_suffix('.').unwrap_or(message);
            self.errors.push(message);
        }

        None
    }

    /// Reads `stream` to its end, sending one event per progress line.
    ///
    /// Sending waits for the consumer. If the consumer goes away the stream is
    /// still drained so ffmpeg never blocks on a full pipe and error lines are
    /// still recorded.
    pub async fn run<R>(self, stream: R, tx: mpsc::Sender<Progress>)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = status_lines(stream);
        let mut consumer_gone = false;

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed reading ffmpeg status stream: {}", e);
                    break;
                }
            };

            if let Some(progress) = self.parse_line(&line) {
                if !consumer_gone && tx.send(progress).await.is_err() {
                    debug!("Progress consumer dropped, draining status stream");
                    consumer_gone = true;
                }
            }
        }
    }
}
