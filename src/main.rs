//! X-Road WSDL generator binary.
//!
//! Run with: `xroad-wsdl --config producer.yaml --contract contract.yaml`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use xroad_soap::{wsdl, ContractDefinition, ProducerConfig};

/// Generates the WSDL contract of an X-Road producer.
///
/// The producer configuration selects the protocol version, service version
/// and published operations; the contract file describes the operations and
/// DTO types.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to producer configuration file (YAML)
    #[arg(short, long, default_value = "producer.yaml")]
    config: PathBuf,

    /// Path to contract description file (YAML)
    #[arg(long)]
    contract: PathBuf,

    /// Output file; standard output when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the contract can be piped.
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

    info!("Starting X-Road WSDL generator v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let content = tokio::fs::read_to_string(&args.config)
        .await
        .context("Failed to read config file")?;
    let config = ProducerConfig::from_yaml(&content).context("Failed to parse config file")?;

    info!(
        producer = %config.producer.name,
        protocol = %config.producer.protocol,
        version = config.producer.version,
        operation_filter = config.operations.enabled,
        "Configuration loaded"
    );

    let content = tokio::fs::read_to_string(&args.contract)
        .await
        .with_context(|| format!("Failed to read contract file {}", args.contract.display()))?;
    let contract: ContractDefinition =
        serde_yaml::from_str(&content).context("Failed to parse contract file")?;

    let document = wsdl::generate(&config, &contract).context("Failed to build contract")?;
    let rendered = document.render().context("Failed to render contract")?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, rendered.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Contract written to {}", path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(rendered.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
