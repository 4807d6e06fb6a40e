//! lstream-cli - Command-line tool for push-stream servers
//!
//! Opens a streaming session, subscribes to items and prints their updates,
//! or sends messages and reports their outcome.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lstream_client::{MaxFrequency, MessageOptions, Session, SubscriptionConfig, SubscriptionMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, ConnectionArgs};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "lstream-cli")]
#[command(author, version, about = "Push-stream client CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "LSTREAM_SERVER")]
    server: Option<String>,

    /// User name
    #[arg(short, long)]
    user: Option<String>,

    /// Password
    #[arg(long, env = "LSTREAM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Adapter set
    #[arg(long)]
    adapter_set: Option<String>,

    /// Requested bandwidth limit in kbit/s (0 = unlimited)
    #[arg(long)]
    max_bandwidth: Option<f64>,

    /// Configuration file path
    #[arg(short, long, env = "LSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to items and print updates until Ctrl+C
    Monitor {
        /// Item name(s)
        #[arg(short, long = "item", required_unless_present = "from")]
        items: Vec<String>,

        /// Field name(s)
        #[arg(short, long = "field", required_unless_present = "from")]
        fields: Vec<String>,

        /// Subscription mode
        #[arg(short, long, value_enum, default_value = "merge")]
        mode: ModeArg,

        /// Data adapter
        #[arg(long)]
        adapter: Option<String>,

        /// Selector
        #[arg(long)]
        selector: Option<String>,

        /// Max updates per second, or "unfiltered"
        #[arg(long, value_parser = parse_frequency)]
        max_frequency: Option<MaxFrequency>,

        /// Start silently, then release once the subscription is in place
        #[arg(long)]
        silent: bool,

        /// Read the subscription from a TOML file instead
        #[arg(long, conflicts_with_all = ["items", "fields"])]
        from: Option<PathBuf>,
    },

    /// Send a message
    Send {
        /// Message text
        message: String,

        /// Sequence name (makes the send asynchronous)
        #[arg(long, requires = "number")]
        sequence: Option<String>,

        /// Progressive number within the sequence
        #[arg(long, requires = "sequence")]
        number: Option<u64>,

        /// How long the server may hold the message for ordering (ms)
        #[arg(long)]
        max_wait_ms: Option<u64>,

        /// How long to wait for the outcome (ms)
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Merge,
    Distinct,
}

impl From<ModeArg> for SubscriptionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Merge => SubscriptionMode::Merge,
            ModeArg::Distinct => SubscriptionMode::Distinct,
        }
    }
}

fn parse_frequency(value: &str) -> std::result::Result<MaxFrequency, String> {
    if value.eq_ignore_ascii_case("unfiltered") {
        return Ok(MaxFrequency::Unfiltered);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Ok(MaxFrequency::Limited(f)),
        _ => Err(format!("expected a number or \"unfiltered\", got {:?}", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over the flags
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "lstream_cli={0},lstream_client={0}",
            default_level
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let args = ConnectionArgs {
        server: cli.server.clone(),
        username: cli.user.clone(),
        password: cli.password.clone(),
        adapter_set: cli.adapter_set.clone(),
        max_bandwidth: cli.max_bandwidth,
        output: cli.output,
    };
    let merged = config.merge_with_args(&args, cli.no_color);
    let ctx = OutputContext::new(merged.output, merged.no_color, cli.quiet);

    let session = Session::new(merged.session_config()).context("Invalid session configuration")?;

    match cli.command {
        Commands::Monitor {
            items,
            fields,
            mode,
            adapter,
            selector,
            max_frequency,
            silent,
            from,
        } => {
            let subscription = match from {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    toml::from_str::<SubscriptionConfig>(&content)
                        .with_context(|| format!("Failed to parse {}", path.display()))?
                }
                None => {
                    let mut config = SubscriptionConfig::new(items, fields, mode.into());
                    config.adapter = adapter;
                    config.selector = selector;
                    if let Some(frequency) = max_frequency {
                        config.max_frequency = frequency;
                    }
                    config
                }
            };
            commands::monitor(&session, subscription, silent, &ctx).await?;
        }

        Commands::Send {
            message,
            sequence,
            number,
            max_wait_ms,
            wait_ms,
        } => {
            let mut options = match (sequence, number) {
                (Some(sequence), Some(number)) => MessageOptions::asynchronous(sequence, number),
                _ => MessageOptions::sync(),
            };
            if let Some(ms) = max_wait_ms {
                options = options.with_max_wait(Duration::from_millis(ms));
            }
            commands::send(
                &session,
                &message,
                options,
                Duration::from_millis(wait_ms),
                &ctx,
            )
            .await?;
        }
    }

    Ok(())
}
