use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::TranscoderConfig, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Variables are prefixed with `TRANSCODER_` and nest with a double
/// underscore, so `TRANSCODER_FLAGS__VERBOSE=true` sets `flags.verbose` while
/// `TRANSCODER_FFMPEG_PATH` still maps to `ffmpeg_path`.
pub fn load_config(path: &Path) -> Result<TranscoderConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: TranscoderConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("TRANSCODER_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<TranscoderConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
