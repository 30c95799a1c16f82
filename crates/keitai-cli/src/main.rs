use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "keitai-cli")]
#[command(about = "Carrier smartphone price reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Price every enabled carrier and write the snapshot.
    Sync,
    /// Run the batch without writing; list offers that found no stock entry.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let (summary, _) = keitai_engine::run_sync_once_from_env(false).await?;
            println!(
                "sync complete: run_id={} carriers={} items={} discarded={} duplicates={} output={}",
                summary.run_id,
                summary.carriers.len(),
                summary.items,
                summary.discarded,
                summary.duplicates,
                summary.output_path.as_deref().unwrap_or("-")
            );
            for carrier in &summary.failed_carriers {
                eprintln!("carrier omitted: {carrier}");
            }
        }
        Commands::Check => {
            let (summary, _) = keitai_engine::run_sync_once_from_env(true).await?;
            println!(
                "check: items={} unmatched_stock={}",
                summary.items,
                summary.unmatched_stock.len()
            );
            for key in &summary.unmatched_stock {
                println!("  {} | {} | {}", key.carrier, key.model, key.storage);
            }
        }
    }

    Ok(())
}
