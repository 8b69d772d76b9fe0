//! Zentinel WS-Security header inspector.
//!
//! Run with: `zentinel-wss --config config.yaml --message request.xml`
//!
//! Parses a SOAP envelope, classifies its security header and prints one JSON
//! line per header element.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_wss::{inspect_security_header, parse_envelope, MessageSecurityConfig};

/// Inspect the WS-Security header of a SOAP message.
///
/// No keys are needed: encrypted elements are reported as such and
/// signatures are classified by their position in the header.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the SOAP envelope to inspect
    #[arg(short, long)]
    message: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel WS-Security inspector v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    // Load configuration
    let config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        MessageSecurityConfig::from_yaml(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        MessageSecurityConfig::default()
    };

    info!(
        security_mode = ?config.settings.security_mode,
        header_layout = ?config.settings.header_layout,
        max_message_size = config.settings.max_message_size,
        "Configuration loaded"
    );

    let data = tokio::fs::read(&args.message)
        .await
        .with_context(|| format!("Failed to read message {}", args.message.display()))?;
    let message = parse_envelope(&data, config.settings.max_message_size)
        .context("Failed to parse SOAP envelope")?;
    let entries =
        inspect_security_header(&message, &config).context("Failed to read security header")?;

    for entry in &entries {
        println!("{}", serde_json::to_string(entry).context("Failed to encode entry")?);
    }
    info!(entries = entries.len(), "Security header inspected");
    Ok(())
}
