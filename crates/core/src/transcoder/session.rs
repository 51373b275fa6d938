//! The transcode session: a fluent builder that assembles an ffmpeg
//! invocation, runs it and reports progress.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TranscoderError;
use super::feed::{ErrorLog, ProgressFeed, PROGRESS_BUFFER};
use super::metadata::Metadata;
use super::options::ArgumentProvider;
use super::probe::FfprobeProber;
use super::progress::ProgressParser;
use super::traits::Prober;
use super::types::{InputStream, OutputStream, Progress, Sink, Source, STREAM_PLACEHOLDER};
use crate::config::TranscoderConfig;

/// One transcode operation.
///
/// Configure it with the chained builder methods, then call [`Session::run`]
/// once. The returned [`ProgressFeed`] yields progress while ffmpeg runs and
/// closes when it exits; check [`Session::error`] (or
/// [`ProgressFeed::error`]) afterwards for failures.
///
/// ```ignore
/// let mut session = Session::new(TranscoderConfig::discover([Flags::default()])?)
///     .input("in.mkv")
///     .output("out.mp4")
///     .options(&Options { video_codec: Some("libx264".into()), ..Default::default() });
///
/// let mut feed = session.run().await?;
/// while let Some(progress) = feed.recv().await {
///     println!("{:.1}%", progress.progress);
/// }
/// if let Some(err) = session.error() {
///     eprintln!("transcode failed: {err}");
/// }
/// ```
pub struct Session {
    config: Arc<TranscoderConfig>,
    prober: Arc<dyn Prober>,
    input: Option<Source>,
    outputs: Vec<Sink>,
    leading_options: Vec<String>,
    option_groups: Vec<Vec<String>>,
    metadata: Option<Metadata>,
    skip_probe: bool,
    cancel: Option<CancellationToken>,
    errors: ErrorLog,
    started: bool,
}

impl Session {
    /// Creates an unconfigured session probing with ffprobe.
    pub fn new(config: impl Into<Arc<TranscoderConfig>>) -> Self {
        let config = config.into();
        let prober = Arc::new(FfprobeProber::new(&config));
        Self {
            config,
            prober,
            input: None,
            outputs: Vec::new(),
            leading_options: Vec::new(),
            option_groups: Vec::new(),
            metadata: None,
            skip_probe: false,
            cancel: None,
            errors: ErrorLog::new(),
            started: false,
        }
    }

    /// Sets the input file path or URL.
    pub fn input(self, path: impl Into<String>) -> Self {
        self.configure(|s| s.input = Some(Source::Path(path.into())))
    }

    /// Reads the input from `reader`, passed to ffmpeg on stdin.
    pub fn input_stream(self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.configure(|s| s.input = Some(Source::Stream(Box::new(reader))))
    }

    /// Appends an output file path or URL.
    pub fn output(self, path: impl Into<String>) -> Self {
        self.configure(|s| s.outputs.push(Sink::Path(path.into())))
    }

    /// Appends an output written to `writer` from ffmpeg's stdout.
    pub fn output_stream(self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.configure(|s| s.outputs.push(Sink::Stream(Box::new(writer))))
    }

    /// Replaces the options placed before `-i`.
    pub fn leading_options<P: ArgumentProvider + ?Sized>(self, opts: &P) -> Self {
        let args = opts.arguments();
        self.configure(|s| s.leading_options = args)
    }

    /// Appends to the options placed before `-i`.
    pub fn add_leading_options<P: ArgumentProvider + ?Sized>(self, opts: &P) -> Self {
        let args = opts.arguments();
        self.configure(|s| s.leading_options.extend(args))
    }

    /// Replaces all output option groups with a single group.
    pub fn options<P: ArgumentProvider + ?Sized>(self, opts: &P) -> Self {
        let args = opts.arguments();
        self.configure(|s| s.option_groups = vec![args])
    }

    /// Appends an output option group; groups pair positionally with outputs.
    pub fn add_options<P: ArgumentProvider + ?Sized>(self, opts: &P) -> Self {
        let args = opts.arguments();
        self.configure(|s| s.option_groups.push(args))
    }

    /// Do not probe the input before running.
    pub fn skip_probe(self) -> Self {
        self.configure(|s| s.skip_probe = true)
    }

    /// Uses `metadata` instead of probing the input.
    pub fn with_metadata(self, metadata: Metadata) -> Self {
        self.configure(|s| s.metadata = Some(metadata))
    }

    /// Kills ffmpeg when `token` is cancelled.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        self.configure(|s| s.cancel = Some(token))
    }

    /// Probes through `prober` instead of ffprobe.
    pub fn with_prober(self, prober: Arc<dyn Prober>) -> Self {
        self.configure(|s| s.prober = prober)
    }

    fn configure(mut self, apply: impl FnOnce(&mut Self)) -> Self {
        if self.started {
            warn!("Ignoring configuration change on a session that has already run");
        } else {
            apply(&mut self);
        }
        self
    }

    /// Metadata of the input, once probed or provided.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Aggregated error of the latest run, if anything went wrong.
    pub fn error(&self) -> Option<TranscoderError> {
        self.errors.to_error()
    }

    /// Probes the input, caching the result on the session.
    ///
    /// Returns the cached metadata without probing again if it is already set.
    pub async fn probe(&mut self) -> Result<Metadata, TranscoderError> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }

        let prober = Arc::clone(&self.prober);
        let source = self
            .input
            .as_mut()
            .ok_or_else(|| TranscoderError::configuration("missing input option"))?;

        let metadata = prober.probe(source).await?;
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// The full ffmpeg argument vector for the current configuration.
    ///
    /// Leading options come first, then `-i <input>`, then each output
    /// preceded by its option group. With more groups than outputs, the
    /// surplus groups all go before the last output.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.leading_options.clone();

        args.push("-i".to_string());
        args.push(
            self.input
                .as_ref()
                .map(Source::as_arg)
                .unwrap_or_default()
                .to_string(),
        );

        let output_count = self.outputs.len();
        let group_count = self.option_groups.len();

        for (index, output) in self.outputs.iter().enumerate() {
            if index + 1 == output_count && output_count < group_count {
                for group in &self.option_groups[index..] {
                    args.extend(group.iter().cloned());
                }
            } else if let Some(group) = self.option_groups.get(index) {
                args.extend(group.iter().cloned());
            }
            args.push(output.as_arg().to_string());
        }

        args
    }

    fn validate(&self) -> Result<(), TranscoderError> {
        if self.config.ffmpeg_path.as_os_str().is_empty() {
            return Err(TranscoderError::configuration(
                "ffmpeg binary path not found",
            ));
        }

        match &self.input {
            None => return Err(TranscoderError::configuration("missing input option")),
            Some(Source::Path(path)) if path.is_empty() => {
                return Err(TranscoderError::configuration("missing input option"))
            }
            Some(_) => {}
        }

        let output_count = self.outputs.len();
        if output_count == 0 {
            return Err(TranscoderError::configuration("missing output option"));
        }

        if output_count != 1 && output_count != self.option_groups.len() {
            return Err(TranscoderError::configuration(
                "number of options and output files does not match",
            ));
        }

        for (index, output) in self.outputs.iter().enumerate() {
            if let Sink::Path(path) = output {
                if path.is_empty() {
                    return Err(TranscoderError::configuration(format!(
                        "output at index {} is an empty string",
                        index
                    )));
                }
            }
        }

        if self.outputs.iter().filter(|o| o.is_stream()).count() > 1 {
            return Err(TranscoderError::configuration(
                "at most one output can be written to a stream",
            ));
        }

        Ok(())
    }

    /// Starts ffmpeg and returns its progress feed without waiting for it.
    ///
    /// Validation, probing and spawning happen before this returns, and their
    /// failures are returned directly. Failures after spawn (non-zero exit,
    /// error lines, cancellation) are collected and reported by
    /// [`Session::error`] once the feed has closed. A session runs at most
    /// once; attached streams are released when the run concludes.
    pub async fn run(&mut self) -> Result<ProgressFeed, TranscoderError> {
        if self.started {
            return Err(TranscoderError::configuration(
                "session has already been run",
            ));
        }
        self.started = true;
        self.errors = ErrorLog::new();

        let result = self.start().await;
        if result.is_err() {
            drop(self.take_input_stream());
            drop(self.take_output_stream());
        }
        result
    }

    async fn start(&mut self) -> Result<ProgressFeed, TranscoderError> {
        self.validate()?;

        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(TranscoderError::Cancelled);
            }
        }

        if !self.skip_probe && self.metadata.is_none() {
            self.probe().await?;
        }

        let program = self.config.ffmpeg_path.clone();
        let args = self.command_args();
        let input_stream = self.take_input_stream();
        let output_stream = self.take_output_stream();
        let capture_progress = self.config.flags.captures_progress();

        info!("Starting {:?} with args {:?}", program, args);

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(if input_stream.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if output_stream.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if capture_progress {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscoderError::ProcessSpawn {
                program: program.clone(),
                args: args.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);

        let parser = child.stderr.take().map(|stderr| {
            let parser = ProgressParser::new(self.metadata.as_ref(), self.errors.clone())
                .with_line_logging(self.config.flags.debug);
            tokio::spawn(parser.run(stderr, tx.clone()))
        });

        let stdin = match (input_stream, child.stdin.take()) {
            (Some(reader), Some(stdin)) => Some(tokio::spawn(feed_stdin(reader, stdin))),
            _ => None,
        };

        let stdout = match (output_stream, child.stdout.take()) {
            (Some(writer), Some(stdout)) => Some(tokio::spawn(drain_stdout(stdout, writer))),
            _ => None,
        };

        let supervisor = Supervisor {
            program,
            child,
            cancel: self.cancel.clone(),
            tasks: RunTasks {
                parser,
                stdin,
                stdout,
            },
            errors: self.errors.clone(),
            tx,
        };
        tokio::spawn(supervisor.run());

        Ok(ProgressFeed::new(rx, self.errors.clone()))
    }

    /// Takes an attached input stream, leaving its placeholder in place.
    fn take_input_stream(&mut self) -> Option<InputStream> {
        match self.input.take() {
            Some(Source::Stream(reader)) => {
                self.input = Some(Source::Path(STREAM_PLACEHOLDER.to_string()));
                Some(reader)
            }
            other => {
                self.input = other;
                None
            }
        }
    }

    /// Takes an attached output stream, leaving its placeholder in place.
    fn take_output_stream(&mut self) -> Option<OutputStream> {
        let index = self.outputs.iter().position(Sink::is_stream)?;
        let placeholder = Sink::Path(STREAM_PLACEHOLDER.to_string());
        match std::mem::replace(&mut self.outputs[index], placeholder) {
            Sink::Stream(writer) => Some(writer),
            Sink::Path(_) => None,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("prober", &self.prober.name())
            .field("input", &self.input)
            .field("outputs", &self.outputs)
            .field("leading_options", &self.leading_options)
            .field("option_groups", &self.option_groups)
            .field("skip_probe", &self.skip_probe)
            .field("started", &self.started)
            .finish()
    }
}

async fn feed_stdin(mut reader: InputStream, mut stdin: tokio::process::ChildStdin) {
    match tokio::io::copy(&mut reader, &mut stdin).await {
        Ok(n) => debug!("Copied {} bytes into ffmpeg stdin", n),
        Err(e) => warn!("Stopped feeding ffmpeg stdin: {}", e),
    }
    if let Err(e) = stdin.shutdown().await {
        debug!("Closing ffmpeg stdin: {}", e);
    }
}

async fn drain_stdout(
    mut stdout: tokio::process::ChildStdout,
    mut writer: OutputStream,
) -> std::io::Result<u64> {
    let copied = tokio::io::copy(&mut stdout, &mut writer).await?;
    writer.shutdown().await?;
    Ok(copied)
}

/// How long the status parser may keep reading after ffmpeg was killed.
const PARSER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Helper tasks spawned alongside ffmpeg.
struct RunTasks {
    parser: Option<JoinHandle<()>>,
    stdin: Option<JoinHandle<()>>,
    stdout: Option<JoinHandle<std::io::Result<u64>>>,
}

impl RunTasks {
    /// Waits for the output side to finish after ffmpeg has exited.
    async fn join(self, errors: &ErrorLog) {
        if let Some(stdin) = self.stdin {
            stdin.abort();
        }

        if let Some(parser) = self.parser {
            if let Err(e) = parser.await {
                warn!("Progress reader task failed: {}", e);
            }
        }

        if let Some(stdout) = self.stdout {
            match stdout.await {
                Ok(Ok(n)) => debug!("Copied {} bytes from ffmpeg stdout", n),
                Ok(Err(e)) => errors.push(format!("failed writing output stream: {}", e)),
                Err(e) => warn!("Output stream task failed: {}", e),
            }
        }
    }

    /// Stops the helpers after ffmpeg was killed.
    ///
    /// The parser gets [`PARSER_DRAIN_TIMEOUT`] to read what is left in the
    /// status pipe so late error lines are still recorded.
    async fn stop(self) {
        if let Some(stdin) = self.stdin {
            stdin.abort();
        }
        if let Some(stdout) = self.stdout {
            stdout.abort();
        }

        if let Some(mut parser) = self.parser {
            match tokio::time::timeout(PARSER_DRAIN_TIMEOUT, &mut parser).await {
                Ok(Err(e)) if !e.is_cancelled() => warn!("Progress reader task failed: {}", e),
                Ok(_) => {}
                Err(_) => {
                    debug!("Status stream still open after kill, dropping the rest");
                    parser.abort();
                }
            }
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Waits for ffmpeg to exit, records the outcome, then closes the feed.
struct Supervisor {
    program: PathBuf,
    child: Child,
    cancel: Option<CancellationToken>,
    tasks: RunTasks,
    errors: ErrorLog,
    tx: mpsc::Sender<Progress>,
}

impl Supervisor {
    async fn run(mut self) {
        let outcome = match &self.cancel {
            Some(token) => tokio::select! {
                status = self.child.wait() => Outcome::Exited(status),
                _ = token.cancelled() => Outcome::Cancelled,
            },
            None => Outcome::Exited(self.child.wait().await),
        };

        match outcome {
            Outcome::Exited(Ok(status)) => {
                self.tasks.join(&self.errors).await;
                if status.success() {
                    info!("{:?} finished successfully", self.program);
                } else {
                    warn!("{:?} exited with {}", self.program, status);
                    self.errors.push(format!("ffmpeg exited with {}", status));
                }
            }
            Outcome::Exited(Err(e)) => {
                self.tasks.join(&self.errors).await;
                self.errors.push(format!("failed waiting for ffmpeg: {}", e));
            }
            Outcome::Cancelled => {
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill {:?}: {}", self.program, e);
                }
                self.tasks.stop().await;
                warn!("{:?} killed after cancellation", self.program);
                self.errors
                    .push("transcoding cancelled: ffmpeg process was killed");
            }
        }

        // Dropping the last sender closes the feed.
        drop(self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::metadata::Format;
    use crate::transcoder::options::Options;
    use crate::transcoder::testing::{CountingProber, HeadReadingProber};

    fn config() -> TranscoderConfig {
        TranscoderConfig::with_paths("/nonexistent/ffmpeg", "/nonexistent/ffprobe")
    }

    fn metadata_with_duration(duration: &str) -> Metadata {
        Metadata {
            format: Format {
                duration: duration.to_string(),
                ..Default::default()
            },
            streams: Vec::new(),
        }
    }

    /// A session whose "ffmpeg" is `sh -c <script>`; ffmpeg's arguments become
    /// ignored positional parameters.
    fn shell_session(script: &str) -> Session {
        Session::new(TranscoderConfig::with_paths("sh", "/nonexistent/ffprobe"))
            .leading_options(&["-c", script, "ffmpeg"])
            .input("in.mkv")
            .output("out.mp4")
    }

    async fn collect(feed: &mut ProgressFeed) -> Vec<Progress> {
        let mut events = Vec::new();
        while let Some(progress) = tokio::time::timeout(Duration::from_secs(10), feed.recv())
            .await
            .expect("feed did not close in time")
        {
            events.push(progress);
        }
        events
    }

    #[test]
    fn test_args_single_output_without_options() {
        let session = Session::new(config()).input("in.mkv").output("out.mp4");
        assert_eq!(session.command_args(), vec!["-i", "in.mkv", "out.mp4"]);
    }

    #[test]
    fn test_args_leading_and_output_options() {
        let session = Session::new(config())
            .leading_options(&["-y"])
            .add_leading_options(&Options {
                hwaccel: Some("cuda".to_string()),
                ..Default::default()
            })
            .input("in.mkv")
            .output("out.mp4")
            .options(&Options {
                video_codec: Some("libx264".to_string()),
                ..Default::default()
            });
        assert_eq!(
            session.command_args(),
            vec!["-y", "-hwaccel", "cuda", "-i", "in.mkv", "-c:v", "libx264", "out.mp4"]
        );
    }

    #[test]
    fn test_args_groups_pair_with_outputs() {
        let session = Session::new(config())
            .input("in.mkv")
            .output("a.mp4")
            .output("b.webm")
            .add_options(&["-c:v", "libx264"])
            .add_options(&["-c:v", "libvpx-vp9"]);
        assert_eq!(
            session.command_args(),
            vec![
                "-i", "in.mkv", "-c:v", "libx264", "a.mp4", "-c:v", "libvpx-vp9", "b.webm"
            ]
        );
    }

    #[test]
    fn test_args_surplus_groups_precede_last_output() {
        let session = Session::new(config())
            .input("in.mkv")
            .output("out.mp4")
            .add_options(&["-c:v", "libx264"])
            .add_options(&["-f", "mp4"]);
        assert_eq!(
            session.command_args(),
            vec!["-i", "in.mkv", "-c:v", "libx264", "-f", "mp4", "out.mp4"]
        );
    }

    #[test]
    fn test_options_replaces_groups() {
        let session = Session::new(config())
            .input("in.mkv")
            .output("out.mp4")
            .add_options(&["-an"])
            .options(&["-vn"]);
        assert_eq!(session.command_args(), vec!["-i", "in.mkv", "-vn", "out.mp4"]);
    }

    #[test]
    fn test_args_stream_placeholders() {
        let session = Session::new(config())
            .input_stream(tokio::io::empty())
            .output_stream(tokio::io::sink())
            .options(&["-f", "matroska"]);
        assert_eq!(
            session.command_args(),
            vec!["-i", "pipe:", "-f", "matroska", "pipe:"]
        );
    }

    #[tokio::test]
    async fn test_run_without_outputs_fails_before_probe() {
        let prober = Arc::new(CountingProber::with_duration("10.0"));
        let mut session = Session::new(config())
            .with_prober(prober.clone())
            .input("in.mkv");

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, TranscoderError::Configuration { .. }));
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_without_input_fails() {
        let mut session = Session::new(config()).output("out.mp4");
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("missing input"));
    }

    #[tokio::test]
    async fn test_run_with_mismatched_groups_fails() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output("a.mp4")
            .output("b.mp4")
            .output("c.mp4")
            .add_options(&["-an"])
            .add_options(&["-vn"]);
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_run_with_more_groups_than_outputs_fails_for_multiple_outputs() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output("a.mp4")
            .output("b.mp4")
            .add_options(&["-an"])
            .add_options(&["-vn"])
            .add_options(&["-sn"]);
        tokio_test::assert_err!(session.run().await);
    }

    #[tokio::test]
    async fn test_run_with_empty_output_fails() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output("a.mp4")
            .output("")
            .add_options(&["-an"])
            .add_options(&["-vn"]);
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("index 1"));
    }

    #[tokio::test]
    async fn test_run_with_two_stream_outputs_fails() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output_stream(tokio::io::sink())
            .output_stream(tokio::io::sink())
            .add_options(&["-f", "wav"])
            .add_options(&["-f", "mp3"]);
        let err = session.run().await.unwrap_err();
        assert!(matches!(err, TranscoderError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_run_with_empty_ffmpeg_path_fails() {
        let mut session = Session::new(TranscoderConfig::with_paths("", "ffprobe"))
            .input("in.mkv")
            .output("out.mp4");
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("ffmpeg binary path"));
    }

    #[tokio::test]
    async fn test_session_runs_only_once() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output("out.mp4")
            .skip_probe();
        let _ = session.run().await;
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("already been run"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_synchronously() {
        let mut session = Session::new(config())
            .input("in.mkv")
            .output("out.mp4")
            .skip_probe();
        match session.run().await.unwrap_err() {
            TranscoderError::ProcessSpawn { program, args, .. } => {
                assert_eq!(program, PathBuf::from("/nonexistent/ffmpeg"));
                assert_eq!(args, vec!["-i", "in.mkv", "out.mp4"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_runs_once_and_is_cached() {
        let prober = Arc::new(CountingProber::with_duration("42.0"));
        let mut session = Session::new(config())
            .with_prober(prober.clone())
            .input("in.mkv");

        assert_eq!(session.probe().await.unwrap().duration(), "42.0");
        assert_eq!(session.probe().await.unwrap().duration(), "42.0");
        assert_eq!(prober.calls(), 1);
        assert_eq!(session.metadata().unwrap().duration(), "42.0");
    }

    #[tokio::test]
    async fn test_probe_without_input_fails() {
        let mut session = Session::new(config());
        let err = session.probe().await.unwrap_err();
        assert!(matches!(err, TranscoderError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_probe_failure_aborts_run() {
        let mut session = Session::new(config()).input("in.mkv").output("out.mp4");
        let err = session.run().await.unwrap_err();
        assert!(matches!(err, TranscoderError::ProbeExecution { .. }));
    }

    #[tokio::test]
    async fn test_provided_metadata_skips_probe() {
        let prober = Arc::new(CountingProber::with_duration("1.0"));
        let mut session = Session::new(config())
            .with_prober(prober.clone())
            .with_metadata(metadata_with_duration("99.0"))
            .input("in.mkv")
            .output("out.mp4");

        // ffmpeg itself is missing, but probing must not have been attempted.
        let _ = session.run().await;
        assert_eq!(prober.calls(), 0);
        assert_eq!(session.metadata().unwrap().duration(), "99.0");
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_does_not_spawn() {
        let token = CancellationToken::new();
        token.cancel();
        let mut session = shell_session("exit 0")
            .skip_probe()
            .with_cancellation(token);
        let err = session.run().await.unwrap_err();
        assert!(matches!(err, TranscoderError::Cancelled));
    }

    #[tokio::test]
    async fn test_configuration_after_run_is_ignored() {
        let mut session = Session::new(config()).output("out.mp4");
        let _ = session.run().await;
        let session = session.input("late.mkv");
        assert_eq!(session.command_args(), vec!["-i", "", "out.mp4"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_reports_progress() {
        let script = "printf 'frame=  600 fps=30 q=28.0 size=    1024kB time=00:00:25.00 bitrate= 335.5kbits/s speed=1.5x \\r' >&2; exit 0";
        let mut session = shell_session(script).with_metadata(metadata_with_duration("100.0"));

        let mut feed = session.run().await.unwrap();
        let events = collect(&mut feed).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frames_processed, "600");
        assert_eq!(events[0].current_time, "00:00:25.00");
        assert_eq!(events[0].speed, "1.5x");
        assert_eq!(events[0].progress, 25.0);
        assert!(session.error().is_none());
        assert!(feed.error().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_reported_after_feed_closes() {
        let mut session = shell_session("exit 3").skip_probe();

        let mut feed = session.run().await.unwrap();
        assert!(collect(&mut feed).await.is_empty());

        let err = session.error().expect("expected an error");
        assert!(matches!(err, TranscoderError::ProcessRuntime { .. }));
        assert!(err.to_string().contains("ffmpeg exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_lines_are_accumulated_not_emitted() {
        let script = "echo \"Unrecognized option 'foo'.\" >&2; \
                      echo 'Error splitting the argument list: Option not found' >&2; \
                      exit 1";
        let mut session = shell_session(script).skip_probe();

        let mut feed = session.run().await.unwrap();
        assert!(collect(&mut feed).await.is_empty());

        match session.error() {
            Some(TranscoderError::ProcessRuntime { messages }) => {
                assert_eq!(messages.len(), 3);
                assert_eq!(messages[0], "Unrecognized option 'foo'");
                assert_eq!(
                    messages[1],
                    "Error splitting the argument list: Option not found"
                );
                assert!(messages[2].starts_with("ffmpeg exited with"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let token = CancellationToken::new();
        let mut session = shell_session("exec sleep 30")
            .skip_probe()
            .with_cancellation(token.clone());

        let mut feed = session.run().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        assert!(collect(&mut feed).await.is_empty());
        let err = session.error().expect("expected a cancellation error");
        assert!(err.to_string().contains("cancelled"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_are_piped_through() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let prober = Arc::new(HeadReadingProber::new(5, "10.0"));
        let mut session = Session::new(TranscoderConfig::with_paths("sh", "/nonexistent/ffprobe"))
            .leading_options(&["-c", "cat", "ffmpeg"])
            .with_prober(prober.clone())
            .input_stream(std::io::Cursor::new(b"media bytes".to_vec()))
            .output_stream(writer);

        let feed = session.run().await.unwrap();
        tokio_test::assert_ok!(feed.finish().await);

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"media bytes");
        assert_eq!(prober.head(), b"media");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_input_is_probed_for_progress() {
        let prober = Arc::new(CountingProber::with_duration("100.0"));
        let script = "cat >/dev/null; printf 'frame=  600 fps=30 q=28.0 size=    1024kB time=00:00:25.00 bitrate= 335.5kbits/s speed=1.5x \\r' >&2";
        let mut session = Session::new(TranscoderConfig::with_paths("sh", "/nonexistent/ffprobe"))
            .leading_options(&["-c", script, "ffmpeg"])
            .with_prober(prober.clone())
            .input_stream(std::io::Cursor::new(vec![7u8; 4096]))
            .output("out.mp4");

        let mut feed = session.run().await.unwrap();
        let events = collect(&mut feed).await;

        assert_eq!(prober.calls(), 1);
        let percentages: Vec<f64> = events.iter().map(|p| p.progress).collect();
        assert_eq!(percentages, vec![25.0]);
        assert!(session.error().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_keeps_error_lines_already_written() {
        let token = CancellationToken::new();
        let script = "echo 'Error while decoding stream #0:0.' >&2; exec sleep 30";
        let mut session = shell_session(script)
            .skip_probe()
            .with_cancellation(token.clone());

        let mut feed = session.run().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        assert!(collect(&mut feed).await.is_empty());

        match session.error() {
            Some(TranscoderError::ProcessRuntime { messages }) => {
                assert_eq!(
                    messages,
                    vec![
                        "Error while decoding stream #0:0".to_string(),
                        "transcoding cancelled: ffmpeg process was killed".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_disabled_still_closes_feed() {
        let mut config = TranscoderConfig::with_paths("sh", "/nonexistent/ffprobe");
        config.flags.progress = false;
        let mut session = Session::new(config)
            .leading_options(&["-c", "exit 0", "ffmpeg"])
            .input("in.mkv")
            .output("out.mp4")
            .skip_probe();

        let mut feed = session.run().await.unwrap();
        assert!(collect(&mut feed).await.is_empty());
        assert!(session.error().is_none());
    }
}
