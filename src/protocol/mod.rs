//! MPD-style line protocol
//!
//! Requests are one line: a command name followed by bare or double-quoted
//! arguments. Responses are `key: value` lines terminated by `OK`, or a
//! single `ACK [code] {command} message` line.

mod command;
mod tokenizer;

pub use command::{lookup, CommandSpec, Dispatcher, Session, COMMANDS};
pub use tokenizer::{tokenize, Request, MAX_ARGUMENTS};

use std::fmt::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use crate::error::{Ack, Error, Result};

/// Result lines of a successful command.
pub type Pairs = Vec<(String, String)>;

/// Server response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Pairs),
    Ack {
        code: Ack,
        command: String,
        message: String,
    },
}

impl Reply {
    /// Failure reply for `command`.
    #[must_use]
    pub fn ack(command: &str, error: &Error) -> Self {
        Self::Ack {
            code: error.ack(),
            command: command.to_string(),
            message: error.ack_message(),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Wire form, newline terminated.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Ok(pairs) => {
                for (key, value) in pairs {
                    let _ = writeln!(out, "{key}: {}", single_line(value));
                }
                out.push_str("OK\n");
            }
            Self::Ack {
                code,
                command,
                message,
            } => {
                let _ = writeln!(
                    out,
                    "ACK [{}] {{{command}}} {}",
                    code.code(),
                    single_line(message)
                );
            }
        }
        out
    }
}

fn single_line(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains('\n') {
        value.replace('\n', " ").into()
    } else {
        value.into()
    }
}

/// An `ACK` line received from a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckLine {
    pub code: u16,
    pub command: String,
    pub message: String,
}

/// One response line as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    Ok,
    Ack(AckLine),
    Pair(&'a str, &'a str),
}

/// Classify a response line (without its newline).
pub fn parse_line(line: &str) -> Result<Line<'_>> {
    if line == "OK" {
        return Ok(Line::Ok);
    }
    if let Some(rest) = line.strip_prefix("ACK ") {
        return parse_ack(rest).map(Line::Ack);
    }
    line.split_once(": ")
        .map(|(key, value)| Line::Pair(key, value))
        .ok_or_else(|| Error::Protocol(format!("unexpected line: {line}")))
}

/// Parse `[code(@index)] {command} message`.
fn parse_ack(rest: &str) -> Result<AckLine> {
    let malformed = || Error::Protocol(format!("malformed ACK: {rest}"));

    let rest = rest.strip_prefix('[').ok_or_else(malformed)?;
    let (code, rest) = rest.split_once(']').ok_or_else(malformed)?;
    let code = code.split('@').next().unwrap_or_default();
    let code = code.parse().map_err(|_| malformed())?;

    let rest = rest.trim_start().strip_prefix('{').ok_or_else(malformed)?;
    let (command, message) = rest.split_once('}').ok_or_else(malformed)?;

    Ok(AckLine {
        code,
        command: command.to_string(),
        message: message.trim_start().to_string(),
    })
}

/// Check a greeting line of the form `OK <NAME> <version>` and return the
/// version.
pub fn parse_greeting(line: &str, name: &str) -> Result<String> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("OK"), Some(n), Some(version)) if n == name => Ok(version.to_string()),
        _ => Err(Error::Protocol(format!("unexpected greeting: {line}"))),
    }
}

/// Quote an argument for sending, escaping `"` and `\`.
#[must_use]
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// ============================================================================
// Client-side I/O
// ============================================================================

/// Byte stream a protocol client can talk over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Connect over TCP, or over a unix socket when `host` is an absolute path.
pub async fn connect(host: &str, port: u16) -> Result<BufReader<Box<dyn Stream>>> {
    let stream: Box<dyn Stream> = if host.starts_with('/') {
        #[cfg(unix)]
        {
            Box::new(tokio::net::UnixStream::connect(host).await?)
        }
        #[cfg(not(unix))]
        {
            return Err(Error::config("unix sockets are not supported on this platform"));
        }
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    Ok(BufReader::new(stream))
}

/// Read one line, without its terminator. EOF is an error.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::Protocol("connection closed".to_string()));
    }
    line.truncate(line.trim_end_matches(['\n', '\r']).len());
    Ok(line)
}

/// Read a full response: pairs up to `OK`, or the `ACK` line.
pub async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<std::result::Result<Pairs, AckLine>> {
    let mut pairs = Pairs::new();
    loop {
        let line = read_line(reader).await?;
        match parse_line(&line)? {
            Line::Ok => return Ok(Ok(pairs)),
            Line::Ack(ack) => return Ok(Err(ack)),
            Line::Pair(key, value) => pairs.push((key.to_string(), value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ok() {
        assert_eq!(Reply::Ok(Vec::new()).encode(), "OK\n");
        let reply = Reply::Ok(vec![
            ("id".to_string(), "1".to_string()),
            ("file".to_string(), "a.mp3".to_string()),
        ]);
        assert_eq!(reply.encode(), "id: 1\nfile: a.mp3\nOK\n");
    }

    #[test]
    fn test_encode_ack() {
        let reply = Reply::ack("count", &Error::Permission("you don't have permission for \"count\"".into()));
        assert_eq!(
            reply.encode(),
            "ACK [4] {count} you don't have permission for \"count\"\n"
        );
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_line("OK").unwrap(), Line::Ok);
        assert_eq!(
            parse_line("Play Count: 3").unwrap(),
            Line::Pair("Play Count", "3")
        );
        assert_eq!(
            parse_line("ACK [50@0] {play} No such song").unwrap(),
            Line::Ack(AckLine {
                code: 50,
                command: "play".to_string(),
                message: "No such song".to_string(),
            })
        );
        assert!(parse_line("garbage").is_err());
        assert!(parse_line("ACK nonsense").is_err());
    }

    #[test]
    fn test_greeting() {
        assert_eq!(parse_greeting("OK MPDCRON 0.1", "MPDCRON").unwrap(), "0.1");
        assert_eq!(parse_greeting("OK MPD 0.23.5", "MPD").unwrap(), "0.23.5");
        assert!(parse_greeting("OK MPD 0.23.5", "MPDCRON").is_err());
    }

    #[tokio::test]
    async fn test_read_response() {
        let mut input: &[u8] = b"id: 1\nfile: a.mp3\nOK\nACK [4] {count} denied\n";
        let pairs = read_response(&mut input).await.unwrap().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("file".to_string(), "a.mp3".to_string()));

        let ack = read_response(&mut input).await.unwrap().unwrap_err();
        assert_eq!(ack.code, 4);
        assert_eq!(ack.message, "denied");

        assert!(read_response(&mut input).await.is_err());
    }

    #[test]
    fn test_quote_roundtrips_through_tokenizer() {
        let arg = r#"title = "A \ B""#;
        let line = format!("list {}", quote(arg));
        let request = tokenize(&line).unwrap();
        assert_eq!(request.args, vec![arg.to_string()]);
    }
}
