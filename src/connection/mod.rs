//! Connection Management
//!
//! Each accepted TCP connection is served by its own async task running the
//! [`ConnectionHandler`] loop: buffer bytes, parse one RESP frame at a time,
//! execute, reply. Responses on a connection are strictly in request order;
//! across connections no global order is promised.

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionHandler};
