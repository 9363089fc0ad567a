use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dualdhcp::{Config, DhcpServer, LoggingDdnsUpdater, Result, ServerContext, store};

#[derive(Parser)]
#[command(name = "dualdhcp")]
#[command(author, version, about = "A DHCPv4 and DHCPv6 server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    ListLeases,
    /// Returns expired leases to their pools and exits.
    ReapLeases,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    if let Err(error) = server.save_leases().await {
                        tracing::error!("Failed to save leases on shutdown: {}", error);
                    }
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListLeases => {
            let store = store::open(&config).await?;
            let leases = store.list_leases().await?;

            if leases.is_empty() {
                println!("No leases.");
            } else {
                println!(
                    "{:<28} {:<6} {:<10} {:<10} {:<24} {:<10}",
                    "Address", "Type", "State", "Link", "Expires At", "Remaining"
                );
                println!("{}", "-".repeat(92));

                for lease in leases {
                    let remaining = lease.remaining_seconds();
                    let remaining_str = if remaining > 0 {
                        format!("{}s", remaining)
                    } else {
                        "expired".to_string()
                    };

                    println!(
                        "{:<28} {:<6} {:<10} {:<10} {:<24} {:<10}",
                        lease.ip.to_string(),
                        lease.ia_type.to_string(),
                        lease.state,
                        lease.link,
                        lease.valid_end_time.format("%Y-%m-%d %H:%M:%S UTC"),
                        remaining_str
                    );
                }
            }

            Ok(())
        }
        Commands::ReapLeases => {
            let store = store::open(&config).await?;
            let ctx = ServerContext::new(config, store, Arc::new(LoggingDdnsUpdater))?;
            ctx.reconcile().await?;
            let count = ctx.reap_expired().await?;
            ctx.store().save().await?;
            println!("Reclaimed {} expired lease(s).", count);
            Ok(())
        }
    }
}
