use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use station_verify::{
    config::{Config, defaults::DEFAULT_CONFIG_FILE},
    models::StationCandidate,
    services::{BatchOptions, BatchVerifier},
};

#[derive(Parser)]
#[command(name = "station-verify")]
#[command(version)]
#[command(about = "Check whether internet radio stream URLs are serving live audio")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (overrides config file)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Emit JSON log lines on stderr
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a single stream URL
    Check {
        url: String,

        /// Identifier reported in the result
        #[arg(long, default_value = "cli")]
        id: String,

        /// Per-URL budget, e.g. "5s" (defaults to the single-station timeout)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Verify a JSON array of station candidates read from FILE or stdin
    Batch {
        /// Input file, or "-" for stdin
        #[arg(default_value = "-")]
        file: String,

        /// Maximum candidates considered
        #[arg(long)]
        max_count: Option<usize>,

        /// Concurrent probes per sub-batch
        #[arg(long)]
        width: Option<usize>,

        /// Per-URL budget, e.g. "8s"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Resolve a PLS/M3U indirection URL to the stream it points at
    Resolve { url: String },
    /// Print the effective configuration as TOML
    Config,
}

fn init_logging(level: &str, json: bool) {
    let log_filter = format!("station_verify={level}");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn read_candidates(file: &str) -> Result<Vec<StationCandidate>> {
    let raw = if file == "-" {
        let mut buffer = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buffer)
            .await
            .context("Failed to read candidates from stdin")?;
        buffer
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read candidates from {file}"))?
    };

    serde_json::from_str(&raw).context("Candidates must be a JSON array of {identifier, url, url_resolved?}")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, cli.json_logs || config.logging.json);

    info!("Starting station-verify v{}", env!("CARGO_PKG_VERSION"));

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(ExitCode::SUCCESS);
    }

    let verifier = BatchVerifier::from_config(&config)?;

    match cli.command {
        Command::Check { url, id, timeout } => {
            let timeout = timeout.unwrap_or(config.verification.single_timeout);
            let Some(result) = verifier.verify_single_with(id, url, timeout).await else {
                bail!("Both an identifier and a URL are required");
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_live {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Batch {
            file,
            max_count,
            width,
            timeout,
        } => {
            let candidates = read_candidates(&file).await?;

            let mut options = BatchOptions::from(&config.verification);
            if let Some(max_count) = max_count {
                options = options.with_max_count(max_count);
            }
            if let Some(width) = width {
                options = options.with_sub_batch_width(width);
            }
            if let Some(timeout) = timeout {
                options = options.with_timeout(timeout);
            }

            let results = verifier.verify_batch_with(candidates, options).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Resolve { url } => {
            println!("{}", verifier.resolve(&url).await);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => Ok(ExitCode::SUCCESS),
    }
}
