use super::{types::TranscoderConfig, ConfigError};

/// Validate configuration
/// Currently validates:
/// - ffmpeg path is not empty
/// - ffprobe path is not empty
pub fn validate_config(config: &TranscoderConfig) -> Result<(), ConfigError> {
    if config.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "ffmpeg_path cannot be empty".to_string(),
        ));
    }

    if config.ffprobe_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "ffprobe_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
