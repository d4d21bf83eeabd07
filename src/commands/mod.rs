//! Command Processing
//!
//! The executor between the protocol layer and the store. It validates the
//! shape of each decoded frame (a non-empty array of non-null bulk strings),
//! checks arity, routes mutations through the AOF pipeline in the required
//! order, and builds RESP replies.
//!
//! ## Supported commands
//!
//! - Connection: `PING`, `ECHO`
//! - Strings: `SET`, `GET`, `DEL`, `EXISTS`
//! - Expiry: `EXPIRE`, `EXPIREAT`, `TTL`
//! - Server: `COMMAND`, `INFO`, `BGREWRITEAOF`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
