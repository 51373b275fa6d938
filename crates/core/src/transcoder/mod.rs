//! Transcoder module: builds ffmpeg invocations, runs them and streams
//! progress back to the caller.
//!
//! # Features
//!
//! - Structured ffmpeg options rendered in a stable order ([`Options`])
//! - Input probing through ffprobe ([`FfprobeProber`]) or any [`Prober`]
//! - Progress parsed from ffmpeg's status lines ([`ProgressParser`])
//! - File or stream inputs and outputs, cancellation via
//!   [`tokio_util::sync::CancellationToken`]
//!
//! # Example
//!
//! ```ignore
//! use transcoder_core::{Flags, Options, Session, TranscoderConfig};
//!
//! let config = TranscoderConfig::discover([Flags::default()])?;
//! let mut session = Session::new(config)
//!     .input("/path/to/input.mkv")
//!     .output("/path/to/output.mp4")
//!     .options(&Options {
//!         video_codec: Some("libx264".to_string()),
//!         crf: Some(23),
//!         overwrite: Some(true),
//!         ..Default::default()
//!     });
//!
//! let mut feed = session.run().await?;
//! while let Some(progress) = feed.recv().await {
//!     println!("{:.1}% at {}", progress.progress, progress.speed);
//! }
//! if let Some(err) = session.error() {
//!     eprintln!("transcode failed: {}", err);
//! }
//! ```

mod error;
mod feed;
mod metadata;
mod options;
mod probe;
mod progress;
mod session;
#[cfg(test)]
mod testing;
mod traits;
mod types;

pub use error::TranscoderError;
pub use feed::{ErrorLog, ProgressFeed};
pub use metadata::{Disposition, Format, Metadata, Stream, Tags};
pub use options::{ArgumentProvider, Options};
pub use probe::FfprobeProber;
pub use progress::{
    completion_percent, duration_to_secs, is_error_line, is_progress_line, parse_status_fields,
    status_lines, ProgressParser, StatusLineCodec,
};
pub use session::Session;
pub use traits::Prober;
pub use types::{InputStream, OutputStream, Progress, Sink, Source, STREAM_PLACEHOLDER};
