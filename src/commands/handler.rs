//! Command Handler Module
//!
//! This module implements the command processing layer for CinderKV. It
//! receives parsed RESP frames, validates their shape and arity, executes
//! them against the store, and builds the reply.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ├──── mutations ────> AofPipeline ──> Store
//!          │                     (append, fsync-if-always, apply)
//!          └──── reads ────────> Store
//! ```
//!
//! ## Mutation ordering
//!
//! `SET` and `DEL` commit through the pipeline: the log entry is appended
//! (and fsynced under the `always` policy) before the store changes, in one
//! critical section. `EXPIRE` and `EXPIREAT` go the other way — the store
//! decides first whether anything changed, and only a true result is logged,
//! so the file never records expiries for keys that were already gone.
//!
//! A failed append surfaces as [`AofError`]; the connection layer replies
//! `-ERR aof write failed` and closes without applying the mutation.

use crate::aof::{AofError, AofPipeline};
use crate::protocol::RespValue;
use crate::storage::Store;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Reply sent when BGREWRITEAOF is accepted.
const REWRITE_STARTED: &str = "Background append only file rewriting started";

/// One row of the COMMAND reply: name, arity, flags.
const COMMAND_TABLE: &[(&str, i64, &[&str])] = &[
    ("ping", -1, &["fast"]),
    ("echo", 2, &["fast"]),
    ("set", 3, &["write"]),
    ("get", 2, &["readonly", "fast"]),
    ("del", -2, &["write"]),
    ("exists", -2, &["readonly", "fast"]),
    ("expire", 3, &["write", "fast"]),
    ("expireat", 3, &["write", "fast"]),
    ("ttl", 2, &["readonly", "fast"]),
    ("command", -1, &["readonly"]),
    ("info", 1, &["readonly"]),
    ("bgrewriteaof", 1, &["admin"]),
];

/// Executes commands against the store and the durability pipeline.
///
/// One handler is cloned per connection; all clones share the same store and
/// pipeline.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    aof: Arc<AofPipeline>,
    started_at: Instant,
}

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new(store: Arc<Store>, aof: Arc<AofPipeline>) -> Self {
        Self {
            store,
            aof,
            started_at: Instant::now(),
        }
    }

    /// Executes one decoded frame and returns the reply.
    ///
    /// `Err` means the append-only file rejected a mutation; the caller must
    /// report the failure and close the connection without applying anything.
    pub async fn execute(&self, frame: RespValue) -> Result<RespValue, AofError> {
        let (cmd, args) = match command_parts(frame) {
            Some(parts) => parts,
            None => {
                return Ok(RespValue::error("ERR expected array of bulk strings"));
            }
        };

        let reply = match cmd.as_str() {
            "PING" => self.cmd_ping(&args),
            "ECHO" => self.cmd_echo(&args),
            "SET" => self.cmd_set(&args).await?,
            "GET" => self.cmd_get(&args),
            "DEL" => self.cmd_del(&args).await?,
            "EXISTS" => self.cmd_exists(&args),
            "EXPIRE" => self.cmd_expire(&args).await?,
            "EXPIREAT" => self.cmd_expireat(&args).await?,
            "TTL" => self.cmd_ttl(&args),
            "COMMAND" => self.cmd_command(&args),
            "INFO" => self.cmd_info(&args),
            "BGREWRITEAOF" => self.cmd_bgrewriteaof(&args).await,
            _ => RespValue::error(format!("ERR unknown command '{}'", cmd.to_lowercase())),
        };
        Ok(reply)
    }

    // ========================================================================
    // Connection Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [msg] => RespValue::bulk_string(msg.clone()),
            _ => wrong_args("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> RespValue {
        match args {
            [msg] => RespValue::bulk_string(msg.clone()),
            _ => wrong_args("ECHO"),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value
    async fn cmd_set(&self, args: &[Bytes]) -> Result<RespValue, AofError> {
        let [key, value] = args else {
            return Ok(wrong_args("SET"));
        };

        // Log first, apply second, one critical section.
        self.aof
            .commit("SET", args, || {
                self.store.set(key.clone(), value.clone());
            })
            .await?;

        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_args("GET");
        };

        match self.store.get(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null_bulk(),
        }
    }

    /// DEL key [key ...]
    async fn cmd_del(&self, args: &[Bytes]) -> Result<RespValue, AofError> {
        if args.is_empty() {
            return Ok(wrong_args("DEL"));
        }

        // Only live keys get logged and deleted; `exists` also purges any
        // argument whose expiry already passed.
        let live: Vec<Bytes> = args
            .iter()
            .filter(|key| self.store.exists(key))
            .cloned()
            .collect();

        if live.is_empty() {
            return Ok(RespValue::integer(0));
        }

        let removed = self
            .aof
            .commit("DEL", &live, || {
                live.iter().filter(|key| self.store.del(key)).count() as i64
            })
            .await?;

        Ok(RespValue::integer(removed))
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() {
            return wrong_args("EXISTS");
        }

        // Counts multiplicity: the same key named twice counts twice.
        let count = args.iter().filter(|key| self.store.exists(key)).count();
        RespValue::integer(count as i64)
    }

    // ========================================================================
    // Expiry Commands
    // ========================================================================

    /// EXPIRE key seconds
    async fn cmd_expire(&self, args: &[Bytes]) -> Result<RespValue, AofError> {
        let [key, raw_secs] = args else {
            return Ok(wrong_args("EXPIRE"));
        };

        let Some(secs) = parse_i64(raw_secs) else {
            return Ok(RespValue::error(
                "ERR value is not an integer or out of range",
            ));
        };

        // The store decides whether state changed; only then is it logged.
        if !self.store.expire(key, secs) {
            return Ok(RespValue::integer(0));
        }

        self.aof.commit("EXPIRE", args, || ()).await?;
        Ok(RespValue::integer(1))
    }

    /// EXPIREAT key unix-seconds
    async fn cmd_expireat(&self, args: &[Bytes]) -> Result<RespValue, AofError> {
        let [key, raw_secs] = args else {
            return Ok(wrong_args("EXPIREAT"));
        };

        let Some(unix_secs) = parse_i64(raw_secs) else {
            return Ok(RespValue::error(
                "ERR value is not an integer or out of range",
            ));
        };

        if !self.store.expire_at(key, unix_secs) {
            return Ok(RespValue::integer(0));
        }

        self.aof.commit("EXPIREAT", args, || ()).await?;
        Ok(RespValue::integer(1))
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_args("TTL");
        };

        RespValue::integer(self.store.ttl(key))
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// COMMAND | COMMAND COUNT
    fn cmd_command(&self, args: &[Bytes]) -> RespValue {
        match args {
            [] => {
                let docs = COMMAND_TABLE
                    .iter()
                    .map(|(name, arity, flags)| {
                        RespValue::array(vec![
                            RespValue::bulk_string(Bytes::from(*name)),
                            RespValue::integer(*arity),
                            RespValue::array(
                                flags
                                    .iter()
                                    .map(|f| RespValue::bulk_string(Bytes::from(*f)))
                                    .collect(),
                            ),
                        ])
                    })
                    .collect();
                RespValue::array(docs)
            }
            [sub] if sub.eq_ignore_ascii_case(b"COUNT") => {
                RespValue::integer(COMMAND_TABLE.len() as i64)
            }
            _ => wrong_args("COMMAND"),
        }
    }

    /// INFO
    fn cmd_info(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_args("INFO");
        }

        let info = format!(
            "# Server\r\n\
             cinderkv_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Persistence\r\n\
             aof_fsync:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             db0:keys={},expired={}\r\n",
            env!("CARGO_PKG_VERSION"),
            self.started_at.elapsed().as_secs(),
            self.aof.policy(),
            self.store.len(),
            self.store.expired_total(),
        );

        RespValue::bulk_string(Bytes::from(info))
    }

    /// BGREWRITEAOF
    ///
    /// Replies immediately; the rewrite itself runs as a background task.
    async fn cmd_bgrewriteaof(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_args("BGREWRITEAOF");
        }

        // Arm the tail buffer and snapshot atomically. None means durability
        // is off or a rewrite is already running; either way there is
        // nothing to spawn.
        if let Some((snapshot, live)) = self.aof.begin_rewrite(&self.store).await {
            let aof = Arc::clone(&self.aof);
            tokio::spawn(async move {
                match crate::aof::file::write_rewrite_temp(&live, &snapshot).await {
                    Ok(tmp) => {
                        if let Err(e) = aof.finish_rewrite(&tmp).await {
                            error!(error = %e, "append-only file rewrite install failed");
                        }
                    }
                    Err(e) => {
                        aof.abort_rewrite().await;
                        error!(error = %e, "append-only file rewrite failed");
                    }
                }
            });
        }

        RespValue::simple_string(REWRITE_STARTED)
    }
}

/// Splits a command frame into an uppercased name and its argument bytes.
///
/// Only a non-empty array of non-null bulk strings is a valid command frame.
fn command_parts(frame: RespValue) -> Option<(String, Vec<Bytes>)> {
    let RespValue::Array(Some(items)) = frame else {
        return None;
    };
    if items.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(Some(b)) => parts.push(b),
            _ => return None,
        }
    }

    let cmd = String::from_utf8_lossy(&parts[0]).to_uppercase();
    Some((cmd, parts.split_off(1)))
}

fn wrong_args(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd.to_lowercase()
    ))
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}
