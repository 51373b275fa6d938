use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration shared by every session created from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg executable.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Path to the ffprobe executable.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    #[serde(default)]
    pub flags: Flags,
    /// Prefix probe invocations with `-hide_banner`.
    #[serde(default = "default_hide_banner")]
    pub hide_banner: bool,
}

/// Behaviour switches for a transcode run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Flags {
    /// Parse ffmpeg's diagnostic stream into progress events.
    #[serde(default = "default_progress")]
    pub progress: bool,
    /// Pass ffmpeg's diagnostic stream straight through to the console.
    /// Takes precedence over `progress`.
    #[serde(default)]
    pub verbose: bool,
    /// Log every non-empty status line at debug level.
    #[serde(default)]
    pub debug: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            progress: default_progress(),
            verbose: false,
            debug: false,
        }
    }
}

impl Flags {
    /// Combines several flag sets; a switch is on if any input enables it.
    pub fn merge<I>(flags: I) -> Self
    where
        I: IntoIterator<Item = Flags>,
    {
        flags.into_iter().fold(
            Flags {
                progress: false,
                verbose: false,
                debug: false,
            },
            |acc, f| Flags {
                progress: acc.progress || f.progress,
                verbose: acc.verbose || f.verbose,
                debug: acc.debug || f.debug,
            },
        )
    }

    /// Whether the diagnostic stream should be captured and parsed.
    pub fn captures_progress(&self) -> bool {
        self.progress && !self.verbose
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            flags: Flags::default(),
            hide_banner: default_hide_banner(),
        }
    }
}

impl TranscoderConfig {
    /// Creates a config with explicit ffmpeg/ffprobe paths.
    pub fn with_paths(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            ..Default::default()
        }
    }

    /// Replaces the flag set.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_progress() -> bool {
    true
}

fn default_hide_banner() -> bool {
    true
}
