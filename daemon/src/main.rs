//! Rigel daemon binary
//!
//! Opens the catalog, runs a boot reconciliation pass, and supervises
//! services until interrupted. Control surfaces (HTTP, IPC) sit outside
//! this binary and drive the supervisor through the daemon library.

use clap::Parser;
use daemon::{Daemon, SqliteCatalog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rigeld", about = "Local microservice supervisor daemon")]
struct Args {
    /// Path to the catalog database (default: $HOME/.rigel/rigel.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log filter, e.g. `info` or `rigel_core=debug`
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> daemon::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting rigeld");

    let catalog = match &args.db {
        Some(path) => SqliteCatalog::open_at(path)?,
        None => SqliteCatalog::open_default()?,
    };
    let daemon = Daemon::new(Arc::new(catalog));

    let visited = daemon.reconcile().await?;
    info!("Boot reconciliation visited {} services", visited);

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    daemon.shutdown().await;

    Ok(())
}
