//! # RESP2 Protocol
//!
//! This module implements the client side of the RESP2 wire protocol spoken by
//! Redis-compatible servers.
//!
//! ## Request Format
//!
//! Every command is sent as an array of bulk strings:
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
//! ```
//!
//! ## Reply Format
//! - `+OK\r\n` - status reply
//! - `-ERR message\r\n` - error reply
//! - `:42\r\n` - integer reply
//! - `$3\r\nbar\r\n` / `$-1\r\n` - bulk string / nil
//! - `*2\r\n...` / `*-1\r\n` - array of replies / nil
//!
//! A top-level error reply fails the command. Error elements nested in an
//! array (`EXEC`, `EVAL` tables) are kept in place as [`Reply::Error`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};

/// Upper bound on a single bulk string, matching the server-side default.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Upper bound on the element count announced by an array header.
const MAX_ARRAY_LEN: i64 = 1024 * 1024 * 1024;
/// Elements preallocated for an array before any of them has arrived.
const ARRAY_PREALLOC: usize = 1024;
/// Upper bound on a status, error or header line, CRLF included.
const MAX_LINE_LEN: usize = 64 * 1024;

/// A successfully decoded reply from the server.
///
/// A top-level error reply surfaces as [`Error::Server`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nil bulk string or nil array
    Nil,
    /// `+OK`, `+PONG` and other status lines
    Status(String),
    /// `:n`
    Integer(i64),
    /// Binary-safe bulk string
    Bulk(Vec<u8>),
    /// Nested replies
    Array(Vec<Reply>),
    /// Error element inside an array
    Error(String),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Whether this is the `+OK` status reply
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(status) if status == "OK")
    }

    /// Borrow a status or UTF-8 bulk reply as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(status) => Some(status),
            Reply::Bulk(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            Reply::Bulk(data) => std::str::from_utf8(data).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Convert a text-like reply into an owned string.
    pub fn into_string(self) -> Option<String> {
        match self {
            Reply::Status(status) => Some(status),
            Reply::Bulk(data) => String::from_utf8(data).ok(),
            Reply::Integer(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Flatten an array reply of text elements, e.g. the result of `KEYS`.
    ///
    /// Nil elements and non-text elements are skipped. A nil reply yields an
    /// empty vector.
    pub fn into_strings(self) -> Vec<String> {
        match self {
            Reply::Array(items) => items.into_iter().filter_map(Reply::into_string).collect(),
            Reply::Nil => Vec::new(),
            other => other.into_string().into_iter().collect(),
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Encode one command as a RESP2 array of bulk strings into `out`.
pub fn encode_command(command: &str, args: &[Vec<u8>], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice((args.len() + 1).to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    push_bulk(out, command.as_bytes());
    for arg in args {
        push_bulk(out, arg);
    }
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Read one complete reply from the stream.
///
/// A top-level error reply is returned as `Err(Error::Server)` and leaves the
/// stream aligned for the next command. Framing problems return
/// `Err(Error::Protocol)` and leave the stream in an unknown state.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin + Send,
{
    match read_value(reader).await? {
        Reply::Error(message) => Err(Error::server(message)),
        reply => Ok(reply),
    }
}

async fn read_value<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin + Send,
{
    // Arrays nest, so decoding keeps an explicit stack instead of recursing.
    let mut stack: Vec<(usize, Vec<Reply>)> = Vec::new();

    loop {
        let line = read_line(reader).await?;
        let (tag, body) = line
            .split_first()
            .ok_or_else(|| Error::protocol("empty reply line"))?;

        let mut value = match *tag {
            b'+' => Reply::Status(lossy(body)),
            b'-' => Reply::Error(lossy(body)),
            b':' => Reply::Integer(parse_int(body)?),
            b'$' => {
                let len = parse_int(body)?;
                if len < 0 {
                    Reply::Nil
                } else if len > MAX_BULK_LEN {
                    return Err(Error::protocol(format!("bulk length {} too large", len)));
                } else {
                    Reply::Bulk(read_bulk(reader, len as usize).await?)
                }
            }
            b'*' => {
                let len = parse_int(body)?;
                if len < 0 {
                    Reply::Nil
                } else if len == 0 {
                    Reply::Array(Vec::new())
                } else if len > MAX_ARRAY_LEN {
                    return Err(Error::protocol(format!("array length {} too large", len)));
                } else {
                    let len = len as usize;
                    stack.push((len, Vec::with_capacity(len.min(ARRAY_PREALLOC))));
                    continue;
                }
            }
            other => {
                return Err(Error::protocol(format!(
                    "unexpected reply type byte 0x{:02x}",
                    other
                )))
            }
        };

        loop {
            match stack.last_mut() {
                None => return Ok(value),
                Some((expected, items)) => {
                    items.push(value);
                    if items.len() < *expected {
                        break;
                    }
                }
            }
            let (_, items) = stack.pop().unwrap_or_default();
            value = Reply::Array(items);
        }
    }
}

async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut buf = Vec::with_capacity(64);
    let n = AsyncReadExt::take(&mut *reader, MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Err(Error::connection("server closed connection"));
    }
    if buf.last() != Some(&b'\n') && buf.len() >= MAX_LINE_LEN {
        return Err(Error::protocol(format!(
            "reply line longer than {} bytes",
            MAX_LINE_LEN
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' || buf[buf.len() - 1] != b'\n' {
        return Err(Error::protocol("reply line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(buf)
}

async fn read_bulk<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data).await?;
    if data[len..] != *b"\r\n" {
        return Err(Error::protocol("bulk string not terminated by CRLF"));
    }
    data.truncate(len);
    Ok(data)
}

fn parse_int(data: &[u8]) -> Result<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| Error::protocol(format!("invalid integer '{}'", lossy(data))))
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
