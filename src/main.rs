mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fetchkit::config::TransferConfig;
use fetchkit::engine::DownloadEngine;
use fetchkit::handlers::ProtocolRegistry;
use fetchkit::handlers::types::TransferStatus;
use fetchkit::ledger::DownloadLedger;
use fetchkit::manager::TransferManager;
use fetchkit::probe::CapabilityProbe;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TransferConfig::load(path)?,
        None => TransferConfig::tuned(&CapabilityProbe::detect()),
    };

    match cli.command {
        Commands::Download(args) => {
            if let Some(connections) = args.connections {
                config.max_connections_per_file = connections.max(1);
            }

            let engine = Arc::new(DownloadEngine::new(config.clone())?);
            let registry = Arc::new(ProtocolRegistry::with_defaults(engine));
            let ledger = Arc::new(DownloadLedger::open(&cli.state_dir).await?);
            let manager = TransferManager::new(registry, ledger, &config);

            let cancel = manager.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let results = manager.download_all(args.urls, &args.output).await;

            let mut failures = 0usize;
            for result in results {
                match result {
                    Ok(record) if record.status == TransferStatus::Completed => {
                        println!(
                            "completed {} -> {} ({})",
                            record.url,
                            record.destination.display(),
                            record.speed.as_deref().unwrap_or("-")
                        );
                    }
                    Ok(record) => {
                        failures += 1;
                        println!(
                            "failed {}: {}",
                            record.url,
                            record.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    Err(err) => {
                        failures += 1;
                        println!("failed: {err}");
                    }
                }
            }

            if failures > 0 {
                return Err(format!("{failures} transfer(s) failed").into());
            }
        }
        Commands::Info { url } => {
            let engine = DownloadEngine::new(config)?;
            let metadata = engine.fetch_metadata(&url).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Verify { path, sha256 } => {
            let engine = DownloadEngine::new(config)?;
            if engine.verify_checksum(&path, &sha256).await? {
                println!("OK {}", path.display());
            } else {
                println!("MISMATCH {}", path.display());
                std::process::exit(1);
            }
        }
        Commands::History => {
            let ledger = DownloadLedger::open(&cli.state_dir).await?;
            for record in ledger.query_history().await {
                println!(
                    "{}  {:<12}  {:>5.1}%  {}",
                    record.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    format!("{:?}", record.status).to_lowercase(),
                    record.progress,
                    record.url
                );
            }
        }
    }

    Ok(())
}
