//! # CinderKV - A Redis-Compatible Key-Value Store with AOF Durability
//!
//! CinderKV is a Redis-wire-compatible, in-memory key-value server written in
//! Rust. It speaks RESP2 over TCP, tracks per-key absolute expiration, and
//! persists every mutation to an append-only file that can be compacted
//! online while writes continue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            CinderKV                              │
//! │                                                                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐           │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │           │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │           │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘           │
//! │                                               │                  │
//! │                          reads                │    mutations     │
//! │                    ┌──────────────────────────┼─────────┐        │
//! │                    ▼                          ▼         │        │
//! │  ┌──────────────────────────┐    ┌─────────────────────┴─────┐  │
//! │  │          Store           │<───│        AofPipeline        │  │
//! │  │  (sharded, lazy expiry)  │    │ append → fsync? → apply   │  │
//! │  └────────────▲─────────────┘    │ tail buffer for rewrites  │  │
//! │               │                  └─────────────┬─────────────┘  │
//! │        ┌──────┴──────┐                 ┌───────┴────────┐       │
//! │        │   Reaper    │                 │  FileAof       │       │
//! │        │ (bg task)   │                 │  appendonly.aof│       │
//! │        └─────────────┘                 └────────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability
//!
//! Mutations are appended to the log *before* they touch the store; under
//! the `always` fsync policy they are durable before the client sees OK.
//! `BGREWRITEAOF` compacts the log online: a store snapshot is written to a
//! temp file while a tail buffer captures concurrent mutations, then the
//! temp file is swapped in and the tail drained after it.
//!
//! ## Supported Commands
//!
//! `PING`, `ECHO`, `SET`, `GET`, `DEL`, `EXISTS`, `EXPIRE`, `EXPIREAT`,
//! `TTL`, `COMMAND`, `INFO`, `BGREWRITEAOF`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP2 codec shared by server, CLI client, and the AOF
//! - [`storage`]: sharded store with absolute expiry plus the reaper
//! - [`aof`]: append-only file, fsync policies, online rewrite
//! - [`commands`]: command dispatch and reply construction
//! - [`connection`]: per-client read-execute-respond loop
//! - [`server`]: listener, fan-out, tickers, coordinated shutdown

pub mod aof;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use aof::{Aof, AofPipeline, FileAof, FsyncPolicy};
pub use commands::CommandHandler;
pub use connection::handle_connection;
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::Server;
pub use storage::{Reaper, SnapshotEntry, Store};

/// The default port CinderKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default append-only file path
pub const DEFAULT_AOF_PATH: &str = "appendonly.aof";

/// Version of CinderKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
