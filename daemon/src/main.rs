//! Orbit Daemon
//!
//! The control-plane daemon: replicated catalogue store, cluster
//! lifecycle, admin API, intra-node RPC, and the per-node reconciliation
//! watcher.

mod api;
mod build;
mod certificates;
mod config;
mod dfs;
mod engine;
mod rpc_server;
mod swarm;
mod watcher;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use engine::Engine;

/// Orbit Daemon - self-hosted platform control plane
#[derive(Parser, Debug)]
#[command(name = "orbitd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory for the engine config and raft state
    #[arg(short, long, default_value = "/var/orbit")]
    data_path: PathBuf,

    /// UNIX socket for the admin API
    #[arg(short, long, default_value = "/var/run/orbit.sock")]
    socket: PathBuf,

    /// TCP port for the admin API
    #[arg(short, long, default_value_t = 6500)]
    port: u16,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Orbit Daemon v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::new(args.data_path, args.socket, args.port)?;

    // The admin API always comes up; the store and its services only when
    // the node already belongs to a cluster (otherwise an admin bootstrap
    // or join request brings them up later).
    api::start(engine.clone())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    engine
        .clone()
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    tokio::signal::ctrl_c().await?;
    engine.stop().await;

    Ok(())
}
