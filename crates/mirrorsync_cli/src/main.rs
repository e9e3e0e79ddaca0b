//! Mirrorsync CLI
//!
//! Command-line tools for inspecting and replaying platform event streams.
//!
//! # Commands
//!
//! - `classify` - Show the dispatch category of event names
//! - `decode` - Decode a file of channel payloads
//! - `replay` - Run recorded events against a platform snapshot

mod commands;

use clap::{Parser, Subcommand};
use mirrorsync_events::ChannelKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mirrorsync event tools.
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the dispatch category of event names
    Classify {
        /// Event names, e.g. VM.START
        #[arg(required = true)]
        names: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a file of newline-delimited channel payloads
    Decode {
        /// Channel the payloads came from (action, state, usage, alert)
        #[arg(short, long)]
        channel: ChannelKind,

        /// Payload file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay recorded events against a platform snapshot
    Replay {
        /// Platform snapshot (JSON object keyed by resource family)
        #[arg(short, long)]
        platform: PathBuf,

        /// Action event payloads
        #[arg(long)]
        actions: Option<PathBuf>,

        /// Resource state payloads
        #[arg(long)]
        states: Option<PathBuf>,

        /// Usage payloads
        #[arg(long)]
        usage: Option<PathBuf>,

        /// Alert payloads
        #[arg(long)]
        alerts: Option<PathBuf>,

        /// Mirror every family before replaying
        #[arg(long)]
        full_resync: bool,

        /// Job poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,

        /// Job poll timeout in milliseconds
        #[arg(long, default_value = "180000")]
        poll_timeout_ms: u64,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Classify { names, format } => {
            commands::classify::run(&names, &format)?;
        }
        Commands::Decode {
            channel,
            file,
            format,
        } => {
            commands::decode::run(channel, &file, &format)?;
        }
        Commands::Replay {
            platform,
            actions,
            states,
            usage,
            alerts,
            full_resync,
            poll_interval_ms,
            poll_timeout_ms,
            output,
        } => {
            let options = commands::replay::ReplayOptions {
                platform,
                actions,
                states,
                usage,
                alerts,
                full_resync,
                poll_interval_ms,
                poll_timeout_ms,
                output,
            };
            commands::replay::run(&options)?;
        }
        Commands::Version => {
            println!("Mirrorsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
