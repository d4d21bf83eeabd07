//! CinderKV command-line client.
//!
//! Three modes, picked automatically:
//!
//! - **one-shot**: trailing arguments become a single command
//!   (`cinderkv-cli SET name value`); quoting is the shell's job.
//! - **pipe**: stdin is not a terminal, so each input line is tokenized and
//!   sent in order (`cat cmds.txt | cinderkv-cli`).
//! - **REPL**: otherwise, an interactive prompt with redis-cli-style quoting
//!   rules and output formatting.

use anyhow::{anyhow, bail, Context};
use bytes::{Buf, Bytes, BytesMut};
use cinderkv::protocol::{RespParser, RespValue};
use clap::Parser;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(
    name = "cinderkv-cli",
    version,
    about = "Command-line client for CinderKV",
    disable_help_flag = true
)]
struct Cli {
    /// Server host
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = cinderkv::DEFAULT_PORT)]
    port: u16,

    /// Raw output (no quotes/prefixes); useful for scripting
    #[arg(long)]
    raw: bool,

    /// Connect/read timeout, e.g. 3s or 500ms
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    timeout: Duration,

    /// Print help
    #[arg(long, action = clap::ArgAction::HelpLong)]
    help: Option<bool>,

    /// Command to run in one-shot mode
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);

    let mut client = Client::connect(&addr, cli.timeout)
        .await
        .with_context(|| format!("dial {}", addr))?;

    // One-shot mode: the command is already tokenized by the shell.
    if !cli.command.is_empty() {
        let reply = client.roundtrip(&cli.command).await?;
        print_reply(&reply, cli.raw);
        return Ok(());
    }

    if !std::io::stdin().is_terminal() {
        return pipe_mode(&mut client, cli.raw).await;
    }

    repl_mode(&mut client, &addr, cli.raw).await
}

/// Reads commands line by line from stdin, no prompt.
async fn pipe_mode(client: &mut Client, raw: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let parts = match prepare_line(&line) {
            Ok(Some(parts)) => parts,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("ERR {}", e);
                continue;
            }
        };

        let reply = client.roundtrip(&parts).await?;
        print_reply(&reply, raw);
    }
    Ok(())
}

/// Interactive prompt.
async fn repl_mode(client: &mut Client, addr: &str, raw: bool) -> anyhow::Result<()> {
    use std::io::Write;

    println!("Connected to {}", addr);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("cinderkv> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            // Ctrl+D / EOF
            println!();
            return Ok(());
        };

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            return Ok(());
        }

        let parts = match prepare_line(&line) {
            Ok(Some(parts)) => parts,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("ERR {}", e);
                continue;
            }
        };

        match client.roundtrip(&parts).await {
            Ok(reply) => print_reply(&reply, raw),
            Err(e) => {
                eprintln!("ERR {}", e);
                return Ok(());
            }
        }
    }
}

/// Trims, drops blank and `#` comment lines, tokenizes the rest.
fn prepare_line(line: &str) -> Result<Option<Vec<String>>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let parts = tokenize(trimmed)?;
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts))
}

fn print_reply(reply: &RespValue, raw: bool) {
    if raw {
        let out = format_raw(reply);
        if out.is_empty() {
            println!();
        } else {
            println!("{}", out);
        }
    } else {
        println!("{}", reply);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One RESP connection with request/response framing on top.
struct Client {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
    timeout: Duration,
}

impl Client {
    async fn connect(addr: &str, timeout: Duration) -> anyhow::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("connect timed out after {:?}", timeout))??;

        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
            timeout,
        })
    }

    /// Sends one command and reads one reply.
    async fn roundtrip(&mut self, parts: &[String]) -> anyhow::Result<RespValue> {
        let args: Vec<Bytes> = parts[1..]
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        let frame = RespValue::command(&parts[0], &args).serialize();
        self.stream.write_all(&frame).await?;

        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(value);
            }

            let n = tokio::time::timeout(
                self.timeout,
                tokio::io::AsyncReadExt::read_buf(&mut self.stream, &mut self.buffer),
            )
            .await
            .map_err(|_| anyhow!("read timed out after {:?}", self.timeout))??;

            if n == 0 {
                bail!("server closed connection");
            }
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let n: u64 = ms.trim().parse().map_err(|_| "invalid duration")?;
        return Ok(Duration::from_millis(n));
    }
    let secs = s.strip_suffix('s').unwrap_or(s).trim();
    let n: u64 = secs.parse().map_err(|_| "invalid duration")?;
    Ok(Duration::from_secs(n))
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum State {
    Normal,
    InSingle,
    InDouble,
    Escape { from_double: bool },
}

/// Splits a REPL line into arguments, supporting:
/// - single quotes: 'literal text' (no escapes)
/// - double quotes with escapes: \n \r \t \\ \" \'
/// - backslash escapes outside quotes: `\ ` -> space, `\"` -> `"`, etc.
///
/// Errors on an unterminated quote or a dangling escape.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut state = State::Normal;

    for c in line.chars() {
        match state {
            State::Normal => match c {
                ' ' | '\t' => {
                    if started {
                        args.push(std::mem::take(&mut current));
                        started = false;
                    }
                }
                '\'' => {
                    state = State::InSingle;
                    started = true;
                }
                '"' => {
                    state = State::InDouble;
                    started = true;
                }
                '\\' => {
                    state = State::Escape { from_double: false };
                    started = true;
                }
                _ => {
                    current.push(c);
                    started = true;
                }
            },

            State::InSingle => {
                if c == '\'' {
                    state = State::Normal;
                } else {
                    current.push(c);
                }
            }

            State::InDouble => match c {
                '"' => state = State::Normal,
                '\\' => state = State::Escape { from_double: true },
                _ => current.push(c),
            },

            State::Escape { from_double } => {
                match c {
                    'n' => current.push('\n'),
                    'r' => current.push('\r'),
                    't' => current.push('\t'),
                    // forgiving: unknown escape becomes the literal char
                    other => current.push(other),
                }
                state = if from_double {
                    State::InDouble
                } else {
                    State::Normal
                };
            }
        }
    }

    match state {
        State::InSingle | State::InDouble => return Err("unterminated quote".to_string()),
        State::Escape { .. } => return Err("dangling escape at end of line".to_string()),
        State::Normal => {}
    }

    if started {
        args.push(current);
    }
    Ok(args)
}

// ============================================================================
// Output formatting
// ============================================================================

/// Raw mode: payload bytes only, no quotes or type prefixes.
fn format_raw(value: &RespValue) -> String {
    match value {
        RespValue::SimpleString(s) => s.clone(),
        RespValue::Error(s) => s.clone(),
        RespValue::Integer(n) => n.to_string(),
        RespValue::BulkString(Some(b)) => String::from_utf8_lossy(b).into_owned(),
        RespValue::BulkString(None) => String::new(),
        RespValue::Array(None) => String::new(),
        RespValue::Array(Some(values)) => values
            .iter()
            .map(format_raw)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_words() {
        assert_eq!(
            tokenize("SET name value").unwrap(),
            vec!["SET", "name", "value"]
        );
        assert_eq!(tokenize("  PING  ").unwrap(), vec!["PING"]);
    }

    #[test]
    fn test_tokenize_single_quotes_are_literal() {
        assert_eq!(
            tokenize(r"SET k 'hello world'").unwrap(),
            vec!["SET", "k", "hello world"]
        );
        assert_eq!(
            tokenize(r"ECHO 'no \n escape'").unwrap(),
            vec!["ECHO", r"no \n escape"]
        );
    }

    #[test]
    fn test_tokenize_double_quotes_with_escapes() {
        assert_eq!(
            tokenize(r#"SET k "a\tb\nc""#).unwrap(),
            vec!["SET", "k", "a\tb\nc"]
        );
        assert_eq!(
            tokenize(r#"ECHO "quote: \" slash: \\""#).unwrap(),
            vec!["ECHO", "quote: \" slash: \\"]
        );
    }

    #[test]
    fn test_tokenize_backslash_outside_quotes() {
        assert_eq!(tokenize(r"ECHO a\ b").unwrap(), vec!["ECHO", "a b"]);
    }

    #[test]
    fn test_tokenize_empty_quotes() {
        assert_eq!(tokenize(r#"SET k """#).unwrap(), vec!["SET", "k", ""]);
        assert_eq!(tokenize("SET k ''").unwrap(), vec!["SET", "k", ""]);
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert_eq!(
            tokenize(r#"SET k "oops"#).unwrap_err(),
            "unterminated quote"
        );
        assert_eq!(tokenize("SET k 'oops").unwrap_err(), "unterminated quote");
    }

    #[test]
    fn test_tokenize_dangling_escape() {
        assert_eq!(
            tokenize(r"SET k v\").unwrap_err(),
            "dangling escape at end of line"
        );
    }

    #[test]
    fn test_prepare_line_skips_blanks_and_comments() {
        assert_eq!(prepare_line("").unwrap(), None);
        assert_eq!(prepare_line("   ").unwrap(), None);
        assert_eq!(prepare_line("# a comment").unwrap(), None);
        assert_eq!(
            prepare_line(" GET k ").unwrap(),
            Some(vec!["GET".to_string(), "k".to_string()])
        );
    }

    #[test]
    fn test_format_raw() {
        assert_eq!(format_raw(&RespValue::simple_string("OK")), "OK");
        assert_eq!(format_raw(&RespValue::error("ERR x")), "ERR x");
        assert_eq!(format_raw(&RespValue::integer(5)), "5");
        assert_eq!(
            format_raw(&RespValue::bulk_string(Bytes::from("v"))),
            "v"
        );
        assert_eq!(format_raw(&RespValue::null_bulk()), "");
        assert_eq!(
            format_raw(&RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("a")),
                RespValue::bulk_string(Bytes::from("b")),
            ])),
            "a\nb"
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("soon").is_err());
    }
}
