//! CinderKV server daemon.
//!
//! Parses flags, initializes logging, replays the append-only file into a
//! fresh store when durability is enabled, then serves until Ctrl+C.

use anyhow::Context;
use cinderkv::aof::{apply_record, file, Aof, AofPipeline, FileAof, FsyncPolicy};
use cinderkv::server::Server;
use cinderkv::storage::Store;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "cinderkv",
    version,
    about = "A Redis-wire-compatible key-value store with append-only-file durability"
)]
struct Cli {
    /// TCP port to listen on
    #[arg(long, default_value_t = cinderkv::DEFAULT_PORT)]
    port: u16,

    /// Persist mutations to an append-only file
    #[arg(long)]
    aof_enabled: bool,

    /// Path of the append-only file
    #[arg(long, default_value = cinderkv::DEFAULT_AOF_PATH)]
    aof_path: PathBuf,

    /// Fsync policy: always | everysec | never (unknown values fall back to
    /// everysec)
    #[arg(long, default_value = "everysec")]
    aof_fsync: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let store = Arc::new(Store::new());

    let log = if cli.aof_enabled {
        file::replay(&cli.aof_path, |cmd, args| apply_record(&store, cmd, args))
            .await
            .with_context(|| format!("replay aof {}", cli.aof_path.display()))?;
        info!(keys = store.len(), path = %cli.aof_path.display(), "append-only file replayed");

        let aof = FileAof::open(&cli.aof_path)
            .await
            .with_context(|| format!("open aof {}", cli.aof_path.display()))?;
        Aof::File(aof)
    } else {
        Aof::Noop
    };

    let policy = FsyncPolicy::parse(&cli.aof_fsync);
    let pipeline = Arc::new(AofPipeline::new(log, policy));

    let addr = format!("0.0.0.0:{}", cli.port);
    let server = Server::start(&addr, store, pipeline)
        .await
        .with_context(|| format!("listen on {}", addr))?;

    info!(
        version = cinderkv::VERSION,
        aof_enabled = cli.aof_enabled,
        fsync = %policy,
        "cinderkv ready"
    );

    signal::ctrl_c()
        .await
        .context("install Ctrl+C handler")?;
    info!("shutdown signal received, stopping server...");

    server.shutdown().await;
    Ok(())
}
