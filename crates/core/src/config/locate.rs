//! Locating the ffmpeg and ffprobe executables on `PATH`.

use std::path::PathBuf;

use tracing::debug;

use super::types::{Flags, TranscoderConfig};
use super::ConfigError;

impl TranscoderConfig {
    /// Builds a config whose binary paths are resolved on `PATH`.
    ///
    /// The given flag sets are merged; see [`Flags::merge`]. Fails with
    /// [`ConfigError::BinaryNotFound`] when either executable is missing.
    pub fn discover<I>(flags: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Flags>,
    {
        let ffmpeg_path = locate("ffmpeg")?;
        let ffprobe_path = locate("ffprobe")?;

        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
            flags: Flags::merge(flags),
            ..Default::default()
        })
    }
}

fn locate(name: &str) -> Result<PathBuf, ConfigError> {
    let path = which::which(name).map_err(|e| ConfigError::BinaryNotFound {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    debug!("Resolved {} to {:?}", name, path);
    Ok(path)
}
