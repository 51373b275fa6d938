pub mod config;
pub mod transcoder;

pub use config::{
    load_config, load_config_from_str, validate_config, ConfigError, Flags, TranscoderConfig,
};
pub use transcoder::{
    ArgumentProvider, ErrorLog, FfprobeProber, Metadata, Options, Progress, ProgressFeed,
    ProgressParser, Prober, Session, Sink, Source, TranscoderError,
};

pub use tokio_util::sync::CancellationToken;
