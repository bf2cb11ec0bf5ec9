use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strata::server::{self, ServerConfig};
use strata::store::StrategyDb;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Content strategy orchestration server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(short, long, default_value = "4180", env = "STRATA_PORT")]
        port: u16,

        /// Path to the SQLite database file
        #[arg(long, default_value = ".strata/strata.db", env = "STRATA_DB")]
        db: PathBuf,

        /// Bind on all interfaces and allow permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Initialize the database without starting the server
    Init {
        #[arg(long, default_value = ".strata/strata.db", env = "STRATA_DB")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, db, dev } => {
            server::start_server(ServerConfig {
                port,
                db_path: db,
                dev_mode: dev,
            })
            .await?;
        }
        Commands::Init { db } => {
            if let Some(parent) = db.parent() {
                std::fs::create_dir_all(parent)?;
            }
            StrategyDb::new(&db)?;
            println!("Database initialized at {}", db.display());
        }
    }

    Ok(())
}
