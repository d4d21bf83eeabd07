//! Server Lifecycle
//!
//! Binds the listener, fans connections out one task each, runs the
//! background tickers, and tears everything down in order on shutdown:
//! stop accepting, stop the reaper, stop the fsync ticker, close the
//! append-only file, drop the listener. Both tickers' cancel handles are
//! idempotent.

use crate::aof::{AofPipeline, FsyncPolicy};
use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use crate::storage::{Reaper, Store, DEFAULT_REAP_INTERVAL};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cadence of the everysec fsync ticker.
const FSYNC_INTERVAL: Duration = Duration::from_secs(1);

/// A running CinderKV server.
///
/// Dropping the handle aborts the accept loop and the tickers, but a clean
/// [`Server::shutdown`] is what guarantees the append-only file is flushed
/// and closed.
pub struct Server {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    reaper: Reaper,
    fsync_ticker: Option<FsyncTicker>,
    aof: Arc<AofPipeline>,
}

impl Server {
    /// Binds `addr` and starts serving.
    ///
    /// The reaper always runs; the fsync ticker only under the everysec
    /// policy.
    pub async fn start(
        addr: &str,
        store: Arc<Store>,
        aof: Arc<AofPipeline>,
    ) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "listening");

        let reaper = Reaper::start(Arc::clone(&store), DEFAULT_REAP_INTERVAL);

        let fsync_ticker = (aof.policy() == FsyncPolicy::EverySec)
            .then(|| FsyncTicker::start(Arc::clone(&aof), FSYNC_INTERVAL));

        let handler = CommandHandler::new(store, Arc::clone(&aof));
        let accept_task = tokio::spawn(accept_loop(listener, handler));

        Ok(Server {
            local_addr,
            accept_task,
            reaper,
            fsync_ticker,
            aof,
        })
    }

    /// The address the server is actually bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, stops the tickers, and closes the append-only file.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        self.reaper.stop();
        if let Some(ticker) = &self.fsync_ticker {
            ticker.stop();
        }
        if let Err(e) = self.aof.close().await {
            warn!(error = %e, "error closing append-only file");
        }
        info!("server shut down");
    }
}

/// Accepts connections until aborted, one handler task per client.
async fn accept_loop(listener: TcpListener, handler: CommandHandler) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handle_connection(stream, addr, handler).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

/// Background ticker that fsyncs the append-only file under the everysec
/// policy. Same watch-channel shape as the reaper; stop is idempotent.
struct FsyncTicker {
    shutdown_tx: watch::Sender<bool>,
}

impl FsyncTicker {
    fn start(aof: Arc<AofPipeline>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            debug!("fsync ticker received shutdown signal");
                            return;
                        }
                    }
                }

                if let Err(e) = aof.sync().await {
                    warn!(error = %e, "background fsync failed");
                }
            }
        });

        Self { shutdown_tx }
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for FsyncTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
