//! `ilp-connector`: runs a connector from a TOML config file.
//!
//! Real ledger plugins are out of scope, so every configured account is
//! attached to an in-memory loopback whose far end rejects all packets.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use futures::FutureExt;
use tracing_subscriber::EnvFilter;

use ilpc_core::{ConnectorConfig, IlpError, MemoryPlugin, Plugin};
use ilpc_node::Connector;

/// Interledger connector
#[derive(Parser, Debug)]
#[command(name = "ilp-connector", version, about = "Interledger connector")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "ilp-connector.toml")]
    config: PathBuf,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the connector's ILP address.
    #[arg(long)]
    ilp_address: Option<String>,

    /// Write a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(config: &ConnectorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Plugins for the demo: the remote end of each pair answers with F02.
async fn demo_plugins(
    config: &ConnectorConfig,
) -> Result<(HashMap<String, Arc<dyn Plugin>>, Vec<MemoryPlugin>)> {
    let mut plugins: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
    let mut remotes = Vec::new();
    for id in config.accounts.keys() {
        let (ours, theirs) = MemoryPlugin::pair();
        let account = id.clone();
        theirs.register_data_handler(Arc::new(move |_: Bytes| {
            let account = account.clone();
            async move {
                Err::<Bytes, _>(IlpError::unreachable(format!(
                    "demo account has no ledger behind it. accountId={}",
                    account
                )))
            }
            .boxed()
        }))?;
        theirs.connect().await?;
        plugins.insert(id.clone(), Arc::new(ours));
        remotes.push(theirs);
    }
    Ok((plugins, remotes))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let config = ConnectorConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    let mut config = ConnectorConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(address) = args.ilp_address {
        config.ilp_address = Some(address);
    }
    init_tracing(&config);

    tracing::info!("ilp-connector v{}", env!("CARGO_PKG_VERSION"));

    let (plugins, _remotes) = demo_plugins(&config).await?;
    let connector = Connector::new(config, plugins)?;
    connector.listen().await?;
    tracing::debug!(status = %serde_json::to_string(&connector.status())?, "connector status");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");

    connector.shutdown().await;
    tracing::info!("connector exited cleanly");
    Ok(())
}
