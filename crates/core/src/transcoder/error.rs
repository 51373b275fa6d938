//! Error types for the transcoder module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while configuring, probing or running a transcode.
#[derive(Debug, Error)]
pub enum TranscoderError {
    /// The session is not runnable as configured. Nothing was spawned.
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// ffprobe could not be started or exited unsuccessfully.
    #[error("Probe failed ({program}): {reason}")]
    ProbeExecution {
        program: PathBuf,
        reason: String,
        stdout: String,
        stderr: String,
    },

    /// ffprobe output was not the expected JSON document.
    #[error("Failed to parse probe output: {0}")]
    ProbeParse(#[from] serde_json::Error),

    /// ffmpeg could not be started.
    #[error("Failed to start {program} with args {args:?}: {source}")]
    ProcessSpawn {
        program: PathBuf,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// Errors reported while ffmpeg was running, in the order they occurred.
    #[error("{}", .messages.join("; "))]
    ProcessRuntime { messages: Vec<String> },

    /// The run was cancelled before ffmpeg could be started.
    #[error("Transcoding cancelled")]
    Cancelled,

    /// I/O error on an attached stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscoderError {
    /// Creates a new configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a runtime error from accumulated messages.
    pub fn runtime(messages: Vec<String>) -> Self {
        Self::ProcessRuntime { messages }
    }

    /// Whether a caller may reasonably retry the same session configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProcessSpawn { .. } | Self::Io(_))
    }
}
