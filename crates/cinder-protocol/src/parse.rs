//! Single-pass RESP2 parser.
//!
//! Operates on buffered byte slices. The caller is responsible for
//! reading data from the network (or log file) into a buffer — the
//! parser is purely synchronous and never blocks.
//!
//! The parser walks the buffer once, building [`Reply`] values directly
//! and reporting `Ok(None)` when the buffer does not yet hold a complete
//! frame, so the caller can retry after reading more bytes. The number
//! of bytes consumed by a complete frame is returned alongside it; the
//! append-only log uses this to track replay byte offsets.

use std::io::Cursor;

use bytes::{Buf, Bytes};

use crate::error::ProtocolError;
use crate::reply::Reply;

/// Maximum nesting depth for arrays. Prevents stack overflow from
/// malformed deeply-nested frames.
const MAX_NESTING_DEPTH: usize = 32;

/// Maximum number of elements in an array.
const MAX_ARRAY_ELEMENTS: i64 = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB, matching Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for `Vec::with_capacity` in array parsing, limiting the up-front
/// allocation a bogus element count can force.
const PREALLOC_CAP: usize = 1024;

/// Parses a complete RESP2 frame from the front of `buf`.
///
/// Returns `Ok(Some((reply, consumed)))` if a complete frame was parsed,
/// `Ok(None)` if the buffer doesn't contain enough data yet, or
/// `Err(...)` if the data is malformed.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match try_parse(&mut cursor, 0) {
        Ok(reply) => {
            let consumed = cursor.position() as usize;
            Ok(Some((reply, consumed)))
        }
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Reply, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::Invalid("nesting too deep".into()));
    }

    let prefix = read_byte(cursor)?;
    match prefix {
        b'+' => {
            let line = read_line(cursor)?;
            Ok(Reply::Simple(utf8_line(line)?))
        }
        b'-' => {
            let line = read_line(cursor)?;
            Ok(Reply::Error(utf8_line(line)?))
        }
        b':' => {
            let line = read_line(cursor)?;
            Ok(Reply::Integer(parse_int(line)?))
        }
        b'$' => {
            let len = parse_int(read_line(cursor)?)?;
            if len == -1 {
                return Ok(Reply::Null);
            }
            if len < 0 || len > MAX_BULK_LEN {
                return Err(ProtocolError::LengthOutOfRange(len));
            }
            let len = len as usize;
            if cursor.remaining() < len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            let start = cursor.position() as usize;
            let data = Bytes::copy_from_slice(&cursor.get_ref()[start..start + len]);
            cursor.advance(len);
            expect_crlf(cursor)?;
            Ok(Reply::Bulk(data))
        }
        b'*' => {
            let count = parse_int(read_line(cursor)?)?;
            if count == -1 {
                return Ok(Reply::NullArray);
            }
            if count < 0 || count > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::LengthOutOfRange(count));
            }
            let mut items = Vec::with_capacity((count as usize).min(PREALLOC_CAP));
            for _ in 0..count {
                items.push(try_parse(cursor, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(ProtocolError::Invalid(format!(
            "unknown frame prefix: {:#04x}",
            other
        ))),
    }
}

/// Reads a single byte, or reports an incomplete frame.
fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !cursor.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(cursor.get_u8())
}

/// Reads up to (not including) the next CRLF, advancing past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = cursor.position() as usize;
    let buf = *cursor.get_ref();

    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' {
            if buf[i + 1] != b'\n' {
                return Err(ProtocolError::Invalid("bare CR in line".into()));
            }
            cursor.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
        i += 1;
    }
    Err(ProtocolError::Incomplete)
}

/// Consumes the CRLF trailing a bulk payload.
fn expect_crlf(cursor: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
    if cursor.remaining() < 2 {
        return Err(ProtocolError::Incomplete);
    }
    if cursor.get_u8() != b'\r' || cursor.get_u8() != b'\n' {
        return Err(ProtocolError::Invalid("missing bulk terminator".into()));
    }
    Ok(())
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    let s = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::Invalid("non-utf8 integer".into()))?;
    s.parse()
        .map_err(|_| ProtocolError::Invalid(format!("invalid integer: '{s}'")))
}

fn utf8_line(line: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::Invalid("non-utf8 line".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::cmd_line;

    fn full(input: &[u8]) -> (Reply, usize) {
        parse_reply(input).unwrap().unwrap()
    }

    #[test]
    fn parses_simple_string() {
        let (reply, n) = full(b"+OK\r\n");
        assert_eq!(reply, Reply::ok());
        assert_eq!(n, 5);
    }

    #[test]
    fn parses_error() {
        let (reply, _) = full(b"-ERR nope\r\n");
        assert_eq!(reply, Reply::error("ERR nope"));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(full(b":1000\r\n").0, Reply::Integer(1000));
        assert_eq!(full(b":-1\r\n").0, Reply::Integer(-1));
    }

    #[test]
    fn parses_bulk() {
        let (reply, n) = full(b"$5\r\nhello\r\n");
        assert_eq!(reply, Reply::Bulk(Bytes::from("hello")));
        assert_eq!(n, 11);
    }

    #[test]
    fn parses_null_bulk() {
        assert_eq!(full(b"$-1\r\n").0, Reply::Null);
    }

    #[test]
    fn parses_command_array() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n";
        let (reply, n) = full(input);
        assert_eq!(n, input.len());
        assert_eq!(reply.into_cmd_line().unwrap(), cmd_line(&["SET", "k", "v"]));
    }

    #[test]
    fn parses_null_array() {
        assert_eq!(full(b"*-1\r\n").0, Reply::NullArray);
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_reply(b"").unwrap(), None);
        assert_eq!(parse_reply(b"+OK").unwrap(), None);
        assert_eq!(parse_reply(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_reply(b"*2\r\n$1\r\na\r\n").unwrap(), None);
    }

    #[test]
    fn consumed_covers_one_frame_only() {
        let input = b"+OK\r\n+PONG\r\n";
        let (reply, n) = full(input);
        assert_eq!(reply, Reply::ok());
        assert_eq!(n, 5);
        let (reply, _) = full(&input[n..]);
        assert_eq!(reply, Reply::pong());
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(matches!(
            parse_reply(b"?what\r\n"),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_negative_bulk_len() {
        assert!(matches!(
            parse_reply(b"$-2\r\n"),
            Err(ProtocolError::LengthOutOfRange(-2))
        ));
    }

    #[test]
    fn rejects_oversized_bulk_len() {
        let input = format!("${}\r\n", MAX_BULK_LEN + 1);
        assert!(matches!(
            parse_reply(input.as_bytes()),
            Err(ProtocolError::LengthOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_bad_integer() {
        assert!(matches!(
            parse_reply(b":12x\r\n"),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn binary_bulk_round_trip() {
        let payload = [0u8, 159, 146, 150];
        let mut input = b"$4\r\n".to_vec();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\n");
        let (reply, _) = full(&input);
        assert_eq!(reply, Reply::Bulk(Bytes::copy_from_slice(&payload)));
    }
}
