use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transcoder_core::{
    load_config, validate_config, CancellationToken, Flags, Progress, Session, TranscoderConfig,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run ffmpeg with live progress reporting.
#[derive(Debug, Parser)]
#[command(name = "transcode", version)]
struct Cli {
    /// Configuration file (TOML). Binaries are looked up on PATH when omitted.
    #[arg(short, long, env = "TRANSCODER_CONFIG")]
    config: Option<PathBuf>,

    /// Input file or URL.
    #[arg(short, long)]
    input: String,

    /// Output file or URL; repeat for several outputs.
    #[arg(short, long)]
    output: Vec<String>,

    /// Overwrite outputs without asking.
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Do not probe the input; progress percentages stay at 0.
    #[arg(long)]
    skip_probe: bool,

    /// Print the input's metadata as JSON and exit.
    #[arg(long, conflicts_with = "output")]
    probe: bool,

    /// Pass ffmpeg's output straight through instead of parsing progress.
    #[arg(short, long)]
    verbose: bool,

    /// Log every ffmpeg status line.
    #[arg(long)]
    debug: bool,

    /// Options applied to every output, e.g. `-- -c:v libx264 -crf 23`.
    #[arg(last = true)]
    output_options: Vec<String>,
}

impl Cli {
    fn flags(&self) -> Flags {
        Flags {
            progress: true,
            verbose: self.verbose,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("transcode v{}", VERSION);
    let config = resolve_config(&cli)?;
    info!(
        "Using ffmpeg at {:?}, ffprobe at {:?}",
        config.ffmpeg_path, config.ffprobe_path
    );

    let mut session = build_session(&cli, config);

    if cli.probe {
        let metadata = session.probe().await.context("Failed to probe input")?;
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let mut session = session.with_cancellation(cancel.clone());
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupted, stopping ffmpeg");
        cancel.cancel();
    });

    let mut feed = session.run().await.context("Failed to start transcoding")?;
    while let Some(progress) = feed.recv().await {
        println!("{}", format_progress(&progress));
    }

    match session.error() {
        Some(err) => Err(err).context("Transcoding failed"),
        None => {
            info!("Transcoding finished");
            Ok(())
        }
    }
}

/// Loads the configuration file if one was given, otherwise discovers the
/// binaries on PATH. Command-line flags are merged into the result.
fn resolve_config(cli: &Cli) -> Result<TranscoderConfig> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let mut config = load_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?;
            config.flags = Flags::merge([config.flags, cli.flags()]);
            config
        }
        None => TranscoderConfig::discover([cli.flags()])
            .context("Failed to locate ffmpeg/ffprobe")?,
    };

    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

fn build_session(cli: &Cli, config: TranscoderConfig) -> Session {
    let mut session = Session::new(config).input(cli.input.clone());

    if cli.overwrite {
        session = session.leading_options(&["-y"]);
    }
    if cli.skip_probe {
        session = session.skip_probe();
    }

    for output in &cli.output {
        session = session.output(output.clone());
        if !cli.output_options.is_empty() {
            session = session.add_options(&cli.output_options);
        }
    }

    session
}

fn format_progress(progress: &Progress) -> String {
    format!(
        "{:>6.2}% frame={} time={} bitrate={} speed={}",
        progress.progress,
        progress.frames_processed,
        progress.current_time,
        progress.current_bitrate,
        progress.speed
    )
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
