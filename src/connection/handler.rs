//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that runs in a loop, reading commands and sending
//! responses.
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: a read may deliver half a command or several
//! commands at once. Incoming data accumulates in a `BytesMut` buffer and
//! the incremental RESP parser pulls complete frames off the front, so
//! pipelined clients work for free.
//!
//! ## Error behavior
//!
//! - Peer closes or resets: close silently.
//! - Malformed RESP: reply `-ERR protocol error`, then close.
//! - Frame that is not an array of bulk strings: reply and keep reading.
//! - Append-only-file failure: reply `-ERR aof write failed`, then close;
//!   the mutation was not applied.

use crate::commands::CommandHandler;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// RESP parser
    parser: RespParser,

    /// The command executor (shared state behind Arcs)
    handler: CommandHandler,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(stream: TcpStream, addr: SocketAddr, handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            handler,
        }
    }

    /// Runs the read-execute-respond loop until the peer disconnects or a
    /// fatal condition closes the connection.
    pub async fn run(mut self) {
        debug!(client = %self.addr, "client connected");

        if let Err(e) = self.main_loop().await {
            debug!(client = %self.addr, error = %e, "connection closed with error");
        } else {
            debug!(client = %self.addr, "client disconnected");
        }
    }

    async fn main_loop(&mut self) -> std::io::Result<()> {
        loop {
            // Drain every complete frame currently buffered.
            loop {
                let frame = match self.parser.parse(&self.buffer) {
                    Ok(Some((frame, consumed))) => {
                        self.buffer.advance(consumed);
                        trace!(client = %self.addr, consumed, "parsed command frame");
                        frame
                    }
                    Ok(None) => break, // incomplete: read more
                    Err(e) => {
                        // Malformed bytes: tell the client, then hang up.
                        warn!(client = %self.addr, error = %e, "protocol error");
                        self.send_reply(&RespValue::error("ERR protocol error")).await?;
                        return Ok(());
                    }
                };

                match self.handler.execute(frame).await {
                    Ok(reply) => self.send_reply(&reply).await?,
                    Err(e) => {
                        // The log rejected a mutation. Nothing was applied;
                        // the client must not trust this connection further.
                        warn!(client = %self.addr, error = %e, "aof write failed");
                        self.send_reply(&RespValue::error("ERR aof write failed"))
                            .await?;
                        return Ok(());
                    }
                }
            }

            if !self.read_more_data().await? {
                // Peer closed; silent either way, even mid-frame.
                return Ok(());
            }
        }
    }

    /// Reads more data from the socket. Returns false on EOF.
    async fn read_more_data(&mut self) -> std::io::Result<bool> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(client = %self.addr, size = self.buffer.len(), "read buffer limit exceeded");
            self.send_reply(&RespValue::error("ERR protocol error")).await?;
            return Ok(false);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        trace!(client = %self.addr, bytes = n, "read data");
        Ok(n > 0)
    }

    /// Serializes and sends one reply.
    async fn send_reply(&mut self, reply: &RespValue) -> std::io::Result<()> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = bytes.len(), "sent reply");
        Ok(())
    }
}

/// Handles a client connection to completion.
///
/// Convenience entry point for the accept loop.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, handler: CommandHandler) {
    ConnectionHandler::new(stream, addr, handler).run().await;
}
