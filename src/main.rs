// ABOUTME: Entry point for the statevault binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and inspects a vault database.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use statevault_store::{SqliteBackend, StoreBackend};

use crate::config::VaultConfig;

#[derive(Parser)]
#[command(name = "statevault", about = "Inspect a statevault state database")]
struct Cli {
    /// Override the vault home directory (default: STATEVAULT_HOME or ~/.statevault).
    #[arg(long)]
    home: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List persisted stores with their schema versions and history depth.
    Status,
    /// List recently logged exports, newest first.
    Exports {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statevault=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = VaultConfig::from_env();
    if let Some(home) = cli.home {
        config.home = home;
    }

    std::fs::create_dir_all(&config.home)
        .with_context(|| format!("creating vault home at {}", config.home.display()))?;
    let db_path = config.db_path();
    tracing::info!("inspecting vault at {}", db_path.display());
    let backend = SqliteBackend::open(&db_path)
        .with_context(|| format!("opening vault database at {}", db_path.display()))?;

    match cli.command {
        Command::Status => {
            let stores = backend.list_stores().await?;
            if stores.is_empty() {
                println!("no stores persisted in {}", db_path.display());
                return Ok(());
            }
            for store in stores {
                println!(
                    "{}  v{}  {} history entries  last saved {}",
                    store.name,
                    store.version,
                    store.history_len,
                    store.last_saved.to_rfc3339(),
                );
            }
        }
        Command::Exports { limit } => {
            let exports = backend.list_exports(limit).await?;
            if exports.is_empty() {
                println!("no exports logged in {}", db_path.display());
                return Ok(());
            }
            for export in exports {
                println!(
                    "#{}  {}  stores: {}  {}",
                    export.id,
                    export.timestamp.to_rfc3339(),
                    export.stores.join(", "),
                    if export.encrypted { "encrypted" } else { "plaintext" },
                );
            }
        }
    }

    Ok(())
}
