//! Command-line front end for the segment membership client
//!
//! `check` sends every requested segment through the batcher at once, so a
//! single identifier with many segments costs one request.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use segment_client::{ClientConfig, IdentifierType, SegmentClient};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (overrides the configured one)
    #[arg(long, env = "SEGMENT_CLIENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check one identifier against one or more segments
    Check {
        #[arg(short, long)]
        identifier: String,

        /// partner_uid, otp, device_id or external_uid
        #[arg(short = 't', long = "type", default_value = "device_id")]
        identifier_type: IdentifierType,

        /// Segment ids; repeat the flag for several
        #[arg(short, long = "segment", required = true)]
        segments: Vec<u32>,
    },

    /// Share of the identifiers in a file contained in a segment
    Scan {
        #[arg(short, long)]
        segment: u32,

        /// Identifiers separated by ",\n"
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segment_client=info,segment_cli=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())
        .context("Failed to load client configuration")?;
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(token) = args.token {
        config = config.with_token(token);
    }

    let client = SegmentClient::new(config).context("Failed to create segment client")?;
    let outcome = run(&client, args.command).await;

    debug!(stats = ?client.stats(), "Engine statistics");
    client.shutdown().await;
    outcome
}

async fn run(client: &SegmentClient, command: Command) -> Result<()> {
    match command {
        Command::Check {
            identifier,
            identifier_type,
            segments,
        } => {
            info!(%identifier, %identifier_type, segments = segments.len(), "Checking membership");

            let results = join_all(
                segments
                    .iter()
                    .map(|&segment| client.check(identifier.as_str(), segment, identifier_type)),
            )
            .await;

            for (segment, result) in segments.iter().zip(results) {
                match result {
                    Ok(member) => println!("{segment}\t{member}"),
                    Err(e) => println!("{segment}\terror: {e}"),
                }
            }
        }
        Command::Scan { segment, file } => {
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let share = client
                .scan_reader(reader, segment)
                .await
                .with_context(|| format!("Scan of segment {segment} failed"))?;
            println!("{segment}\t{share}");
        }
    }

    Ok(())
}
