//! Trait definitions for the transcoder module.

use async_trait::async_trait;

use super::error::TranscoderError;
use super::metadata::Metadata;
use super::types::Source;

/// Something that can extract [`Metadata`] from a transcode input.
///
/// A session probes through this seam; the default implementation shells out
/// to ffprobe.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns the name of this prober implementation.
    fn name(&self) -> &str;

    /// Probes the given source.
    ///
    /// A [`Source::Stream`] is read from while probing; whatever the prober
    /// consumes is no longer available to the transcode.
    async fn probe(&self, source: &mut Source) -> Result<Metadata, TranscoderError>;
}
