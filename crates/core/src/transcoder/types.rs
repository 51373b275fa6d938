//! Shared types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Token telling ffmpeg/ffprobe to use stdin (input) or stdout (output).
pub const STREAM_PLACEHOLDER: &str = "pipe:";

/// A readable stream attached as the transcode input.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A writable stream attached as a transcode output.
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the transcode reads its input from.
pub enum Source {
    /// A file path or URL understood by ffmpeg.
    Path(String),
    /// Bytes copied into the child's stdin.
    Stream(InputStream),
}

impl Source {
    /// The token passed after `-i`.
    pub fn as_arg(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Stream(_) => STREAM_PLACEHOLDER,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Puts bytes already read from an attached stream back in front of it.
    ///
    /// Probers that consume part of a stream input call this so the
    /// transcode still sees the whole input. Paths are left untouched.
    pub fn replay(&mut self, consumed: Vec<u8>) {
        if consumed.is_empty() {
            return;
        }
        if let Self::Stream(reader) = self {
            let rest = std::mem::replace(reader, Box::new(tokio::io::empty()));
            *reader = Box::new(std::io::Cursor::new(consumed).chain(rest));
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Where one transcode output is written.
pub enum Sink {
    /// A file path or URL understood by ffmpeg.
    Path(String),
    /// Receives the child's stdout.
    Stream(OutputStream),
}

impl Sink {
    /// The token placed at this output's slot in the argument vector.
    pub fn as_arg(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Stream(_) => STREAM_PLACEHOLDER,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One progress update parsed from an ffmpeg status line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Frames processed so far, as printed by ffmpeg.
    pub frames_processed: String,
    /// Current position, formatted `HH:MM:SS[.ms]`.
    pub current_time: String,
    /// Current bit rate, e.g. `256.0kbits/s`.
    pub current_bitrate: String,
    /// Encoding speed multiplier, e.g. `2.0x`.
    pub speed: String,
    /// Completion percentage in the 0-100 range; 0 when the duration is unknown.
    pub progress: f64,
}
