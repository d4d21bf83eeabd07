//! Incremental RESP Protocol Parser
//!
//! This module implements an incremental parser for the RESP2 protocol.
//! The parser reads from a byte buffer and returns either:
//!
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design lets callers distinguish a clean end-of-input (incomplete, no
//! error) from protocol corruption, which matters in two places:
//!
//! 1. The connection handler appends incoming network data to a buffer and
//!    retries as more bytes arrive, so pipelined and partial commands both
//!    work.
//! 2. The append-only-file replayer treats an incomplete trailing frame as a
//!    truncated tail (common after a crash) and stops successfully, while a
//!    malformed frame mid-file is a hard error.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("protocol error: unknown prefix {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("protocol error: invalid integer")]
    InvalidInteger,

    /// Invalid UTF-8 in a simple string or error message
    #[error("protocol error: invalid UTF-8 in line")]
    InvalidUtf8,

    /// Bulk string length is negative (but not -1 for null)
    #[error("protocol error: invalid bulk string length {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("protocol error: invalid array length {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, over-deep nesting, etc.)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The message exceeds maximum allowed size
    #[error("protocol error: message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP protocol parser.
///
/// # Example
///
/// ```ignore
/// use cinderkv::protocol::RespParser;
/// use bytes::{Buf, BytesMut};
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some((value, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("Parsed: {:?}", value);
/// }
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse a single RESP value from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((value, consumed)))` - Successfully parsed a value
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Parse error
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Internal recursive parsing function.
    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::Protocol(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a simple string: `+<string>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, line_len)) => {
                let consumed = 1 + line_len;
                Ok(Some((RespValue::SimpleString(line.to_string()), consumed)))
            }
            None => Ok(None), // Incomplete
        }
    }

    /// Parses an error: `-<error message>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, line_len)) => {
                let consumed = 1 + line_len;
                Ok(Some((RespValue::Error(line.to_string()), consumed)))
            }
            None => Ok(None),
        }
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, line_len)) => {
                let n: i64 = line.parse().map_err(|_| ParseError::InvalidInteger)?;
                let consumed = 1 + line_len;
                Ok(Some((RespValue::Integer(n), consumed)))
            }
            None => Ok(None),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n` (or `$-1\r\n` for null)
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (line, line_len) = match read_line(&buf[1..])? {
            Some(header) => header,
            None => return Ok(None),
        };

        let length: i64 = line.parse().map_err(|_| ParseError::InvalidInteger)?;

        // Null bulk string
        if length == -1 {
            return Ok(Some((RespValue::BulkString(None), 1 + line_len)));
        }

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + line_len;
        let total_needed = data_start + length + 2; // data + CRLF
        if buf.len() < total_needed {
            return Ok(None); // Incomplete
        }

        if &buf[data_start + length..data_start + length + 2] != CRLF {
            return Err(ParseError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((RespValue::BulkString(Some(data)), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>` (or `*-1\r\n` for null)
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (line, line_len) = match read_line(&buf[1..])? {
            Some(header) => header,
            None => return Ok(None),
        };

        let count: i64 = line.parse().map_err(|_| ParseError::InvalidInteger)?;

        // Null array
        if count == -1 {
            return Ok(Some((RespValue::Array(None), 1 + line_len)));
        }

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count);
        let mut consumed = 1 + line_len;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None); // Incomplete
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None), // Incomplete
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(Some(elements)), consumed)))
    }
}

/// Reads one CRLF-terminated line from the buffer.
///
/// Returns the line content without the CRLF and the total number of bytes
/// the line occupies including the terminator, or `None` if no full line is
/// available yet.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(buf) {
        Some(pos) => {
            let line = std::str::from_utf8(&buf[..pos]).map_err(|_| ParseError::InvalidUtf8)?;
            Ok(Some((line, pos + 2)))
        }
        None => Ok(None),
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

/// Helper function to parse a single RESP message from bytes.
///
/// This is a convenience function for simple use cases.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let input = b"+OK\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::SimpleString("OK".to_string()));
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_simple_string_incomplete() {
        let input = b"+OK";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_error() {
        let input = b"-ERR unknown command\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Error("ERR unknown command".to_string()));
        assert_eq!(result.1, 22);
    }

    #[test]
    fn test_parse_integer() {
        let input = b":1000\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(1000));
        assert_eq!(result.1, 7);
    }

    #[test]
    fn test_parse_negative_integer() {
        let input = b":-42\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(-42));
    }

    #[test]
    fn test_parse_bulk_string() {
        let input = b"$5\r\nhello\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::bulk_string(Bytes::from("hello")));
        assert_eq!(result.1, 11);
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let input = b"$-1\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(None));
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        let input = b"$0\r\n\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::bulk_string(Bytes::from("")));
        assert_eq!(result.1, 6);
    }

    #[test]
    fn test_parse_bulk_string_incomplete() {
        let input = b"$5\r\nhel";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_array() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("GET")),
                RespValue::bulk_string(Bytes::from("name")),
            ])
        );
        assert_eq!(result.1, 23);
    }

    #[test]
    fn test_parse_null_array() {
        let input = b"*-1\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Array(None));
    }

    #[test]
    fn test_parse_empty_array() {
        let input = b"*0\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::array(vec![]));
    }

    #[test]
    fn test_parse_nested_array() {
        let input = b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::array(vec![
                RespValue::Integer(1),
                RespValue::array(vec![RespValue::Integer(2), RespValue::Integer(3)]),
            ])
        );
    }

    #[test]
    fn test_parse_mixed_array() {
        let input = b"*3\r\n+OK\r\n:100\r\n$5\r\nhello\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::array(vec![
                RespValue::SimpleString("OK".to_string()),
                RespValue::Integer(100),
                RespValue::bulk_string(Bytes::from("hello")),
            ])
        );
    }

    #[test]
    fn test_parse_unknown_prefix() {
        let input = b"@invalid\r\n";
        let result = parse_message(input);
        assert_eq!(result, Err(ParseError::UnknownPrefix(b'@')));
    }

    #[test]
    fn test_parse_invalid_integer() {
        let input = b":not_a_number\r\n";
        let result = parse_message(input);
        assert_eq!(result, Err(ParseError::InvalidInteger));
    }

    #[test]
    fn test_parse_invalid_bulk_length() {
        let input = b"$-7\r\n";
        let result = parse_message(input);
        assert_eq!(result, Err(ParseError::InvalidBulkLength(-7)));
    }

    #[test]
    fn test_parse_truncated_array_is_incomplete() {
        // A valid prefix of a SET frame, cut mid-way. This is the shape a
        // crashed append leaves at the end of an AOF.
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_roundtrip() {
        // Test that serialize -> parse gives back the same value
        let original = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::bulk_string(Bytes::from("key")),
            RespValue::bulk_string(Bytes::from("value")),
        ]);

        let serialized = original.serialize();
        let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(original, parsed);
        assert_eq!(consumed, serialized.len());
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let values = vec![
            RespValue::simple_string("PONG"),
            RespValue::error("ERR nope"),
            RespValue::Integer(-9001),
            RespValue::bulk_string(Bytes::from(&b"bin\x00ary"[..])),
            RespValue::null_bulk(),
            RespValue::null_array(),
            RespValue::array(vec![]),
            RespValue::array(vec![
                RespValue::Integer(1),
                RespValue::null_bulk(),
                RespValue::array(vec![RespValue::simple_string("deep")]),
            ]),
        ];

        for original in values {
            let serialized = original.serialize();
            let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
            assert_eq!(original, parsed);
            assert_eq!(consumed, serialized.len());
        }
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        // Bulk strings should handle binary data including null bytes
        let input = b"$5\r\nhel\x00o\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::bulk_string(Bytes::from(&b"hel\x00o"[..])));
    }

    #[test]
    fn test_pipelined_frames_consume_exactly_one() {
        let input = b"+OK\r\n:1\r\n";
        let (first, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(first, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);

        let (second, _) = parse_message(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, RespValue::Integer(1));
    }
}
