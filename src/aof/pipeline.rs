//! The AOF Pipeline
//!
//! Every durable mutation flows through this single serialization point. One
//! mutex guards the log handle, the fsync-if-always step, the rewrite tail
//! buffer, and the in-memory apply, which pins down the orderings the rest of
//! the system relies on:
//!
//! - A RESP frame is never interleaved mid-write with another frame or with
//!   a rewrite's file swap.
//! - The log is always *ahead of* the store: an acknowledged mutation was
//!   appended (and under `always`, fsynced) before it became visible.
//! - Starting a rewrite takes the store snapshot and arms the tail buffer in
//!   the same critical section mutations commit in, so every mutation lands
//!   in exactly one of {snapshot, tail} — none can fall between them.
//!
//! ## Rewrite lifecycle
//!
//! ```text
//!  begin_rewrite             write_rewrite_temp          finish_rewrite
//!  (under mutex)             (off mutex)                 (under mutex)
//!  ┌──────────────────┐      ┌────────────────────┐      ┌──────────────────┐
//!  │ arm tail buffer  │ ───> │ snapshot → .tmp    │ ───> │ swap .tmp → live │
//!  │ snapshot store   │      │ flush + fsync      │      │ append tail FIFO │
//!  └──────────────────┘      └────────────────────┘      │ disarm tail      │
//!                                                        └──────────────────┘
//! ```
//!
//! Mutations committed while the tail is armed still append to the old live
//! file (crash safety: the pre-rewrite log stays intact on disk) *and* go on
//! the tail, which is drained into the freshly installed file.

use crate::aof::{Aof, AofError, FsyncPolicy, Record};
use crate::storage::{SnapshotEntry, Store};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

/// Everything the AOF mutex protects.
#[derive(Debug)]
struct PipelineState {
    log: Aof,
    /// FIFO of records committed while a rewrite is in flight.
    /// `Some` doubles as the rewrite-in-progress flag.
    tail: Option<Vec<Record>>,
}

/// The serialization point between the command executor, the fsync ticker,
/// and the rewrite task.
#[derive(Debug)]
pub struct AofPipeline {
    policy: FsyncPolicy,
    state: Mutex<PipelineState>,
}

impl AofPipeline {
    pub fn new(log: Aof, policy: FsyncPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(PipelineState { log, tail: None }),
        }
    }

    /// A pipeline with durability disabled.
    pub fn disabled() -> Self {
        Self::new(Aof::Noop, FsyncPolicy::Never)
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Commits one mutation: append, fsync under the `always` policy, tail
    /// capture when a rewrite is running, then the in-memory apply — all in
    /// one critical section. Returns whatever `apply` returns.
    ///
    /// If the append or fsync fails, `apply` never runs: the log stays a
    /// superset of acknowledged state.
    pub async fn commit<R>(
        &self,
        cmd: &str,
        args: &[Bytes],
        apply: impl FnOnce() -> R,
    ) -> Result<R, AofError> {
        let mut state = self.state.lock().await;

        state.log.append(cmd, args).await?;
        if self.policy == FsyncPolicy::Always {
            state.log.sync().await?;
        }
        if let Some(tail) = state.tail.as_mut() {
            tail.push(Record::new(cmd, args));
        }

        Ok(apply())
    }

    /// Flushes and fsyncs the log. Driven by the everysec ticker.
    pub async fn sync(&self) -> Result<(), AofError> {
        let mut state = self.state.lock().await;
        state.log.sync().await
    }

    /// Flushes and closes the log. Idempotent.
    pub async fn close(&self) -> Result<(), AofError> {
        let mut state = self.state.lock().await;
        state.log.close().await
    }

    /// Enters the rewriting state: arms the tail buffer and takes the store
    /// snapshot atomically with respect to every `commit`.
    ///
    /// Returns `None` when there is nothing to do — durability is disabled,
    /// or a rewrite is already in flight.
    pub async fn begin_rewrite(&self, store: &Store) -> Option<(Vec<SnapshotEntry>, PathBuf)> {
        let mut state = self.state.lock().await;

        let path = match &state.log {
            Aof::File(f) => f.path().to_path_buf(),
            Aof::Noop => return None,
        };
        if state.tail.is_some() {
            return None;
        }

        state.tail = Some(Vec::new());
        Some((store.snapshot(), path))
    }

    /// Installs the finished temp file as the live log, drains the tail into
    /// it, and leaves the rewriting state.
    pub async fn finish_rewrite(&self, tmp: &std::path::Path) -> Result<(), AofError> {
        let mut state = self.state.lock().await;

        let tail = state.tail.take().unwrap_or_default();
        match &mut state.log {
            Aof::File(f) => f.install_rewrite(tmp, &tail).await,
            Aof::Noop => Ok(()),
        }
    }

    /// Abandons an in-flight rewrite (temp write failed). The old live file
    /// is untouched and already contains every tail record, so dropping the
    /// buffer loses nothing.
    pub async fn abort_rewrite(&self) {
        let mut state = self.state.lock().await;
        if state.tail.take().is_some() {
            warn!("append-only file rewrite aborted");
        }
    }
}
