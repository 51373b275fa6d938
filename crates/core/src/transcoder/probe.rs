//! ffprobe-backed metadata prober.

use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::process::Command;
use tracing::debug;

use super::error::TranscoderError;
use super::metadata::Metadata;
use super::traits::Prober;
use super::types::{InputStream, Source};
use crate::config::TranscoderConfig;

/// Runs `ffprobe -print_format json -show_format -show_streams -show_error`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
    hide_banner: bool,
}

/// The `-show_error` payload ffprobe prints on failure.
#[derive(Deserialize)]
struct ProbeErrorOutput {
    error: ProbeErrorDetail,
}

#[derive(Deserialize)]
struct ProbeErrorDetail {
    #[serde(default)]
    string: String,
}

/// Reader that keeps a copy of every byte read through it.
struct Recording<'a> {
    inner: &'a mut InputStream,
    recorded: Vec<u8>,
}

impl<'a> Recording<'a> {
    fn new(inner: &'a mut InputStream) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }
}

impl AsyncRead for Recording<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        this.recorded.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl FfprobeProber {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.ffprobe_path.clone(),
            hide_banner: config.hide_banner,
        }
    }

    /// Builds the ffprobe argument vector for an input token.
    pub fn probe_args(&self, input: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if self.hide_banner {
            args.push("-hide_banner".to_string());
        }
        args.extend(
            [
                "-i",
                input,
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-show_error",
            ]
            .map(String::from),
        );
        args
    }

    fn execution_error(&self, reason: String, stdout: &[u8], stderr: &[u8]) -> TranscoderError {
        TranscoderError::ProbeExecution {
            program: self.program.clone(),
            reason,
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn probe(&self, source: &mut Source) -> Result<Metadata, TranscoderError> {
        if self.program.as_os_str().is_empty() {
            return Err(TranscoderError::configuration(
                "ffprobe binary path not found",
            ));
        }

        let args = self.probe_args(source.as_arg());
        debug!("Probing with {:?} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if source.is_stream() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.execution_error(format!("failed to spawn: {}", e), &[], &[]))?;

        let (output, consumed) = match (&mut *source, child.stdin.take()) {
            (Source::Stream(reader), Some(mut stdin)) => {
                let mut recording = Recording::new(reader);
                let feed = async {
                    // ffprobe may stop reading early; a broken pipe here is expected.
                    match tokio::io::copy(&mut recording, &mut stdin).await {
                        Ok(n) => debug!("Fed {} bytes to ffprobe", n),
                        Err(e) => debug!("Stopped feeding ffprobe: {}", e),
                    }
                    let _ = stdin.shutdown().await;
                    // ffprobe only sees end of input once the pipe is closed.
                    drop(stdin);
                };
                let (_, output) = tokio::join!(feed, child.wait_with_output());
                (output, recording.recorded)
            }
            _ => (child.wait_with_output().await, Vec::new()),
        };

        // Whatever ffprobe consumed must still reach ffmpeg.
        source.replay(consumed);

        let output = output
            .map_err(|e| self.execution_error(format!("failed to wait: {}", e), &[], &[]))?;

        if !output.status.success() {
            let reason = serde_json::from_slice::<ProbeErrorOutput>(&output.stdout)
                .ok()
                .map(|o| o.error.string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("exited with {}", output.status));
            return Err(self.execution_error(reason, &output.stdout, &output.stderr));
        }

        Ok(Metadata::from_json(&output.stdout)?)
    }
}
