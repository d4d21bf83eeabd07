//! RESP Protocol Implementation
//!
//! This module provides an implementation of the Redis Serialization Protocol
//! (RESP2) subset CinderKV speaks: simple strings, errors, integers, bulk
//! strings, and arrays, including the null bulk (`$-1`) and null array
//! (`*-1`) encodings.
//!
//! The same codec frames three byte streams:
//!
//! - inbound client commands and outbound replies,
//! - the CLI client's requests and the replies it renders,
//! - the append-only file, which is a plain concatenation of
//!   array-of-bulk-string frames.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Incremental parser for RESP byte streams

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
