//! Reply values and command vectors.
//!
//! [`Reply`] represents a single RESP2 value. The same enum serves both
//! directions: replies the engine sends to clients, and parsed frames
//! arriving from clients or from the append-only log (a client request
//! is an `Array` of `Bulk` frames).
//!
//! A decoded request is a [`CmdLine`] — an ordered vector of binary-safe
//! byte strings, the first being the command name.

use bytes::Bytes;

/// A decoded command line: command name followed by its arguments.
pub type CmdLine = Vec<Bytes>;

/// Builds a command line from string literals. Used by the AOF rewrite
/// path and by undo-log generation.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

/// Builds a command line from a command name followed by pre-encoded
/// argument payloads.
pub fn cmd_line_with(name: &str, args: impl IntoIterator<Item = Bytes>) -> CmdLine {
    let mut line = vec![Bytes::copy_from_slice(name.as_bytes())];
    line.extend(args);
    line
}

/// A single RESP2 protocol value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple string, e.g. `+OK\r\n`. Status replies and PONG.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Null bulk string, `$-1\r\n`. GET on a missing key.
    Null,

    /// Array of replies, e.g. `*2\r\n$1\r\na\r\n$1\r\nb\r\n`.
    /// Client requests arrive as arrays of bulk strings; EXEC results
    /// are arrays of arbitrary replies.
    Array(Vec<Reply>),

    /// Null array, `*-1\r\n`. The aborted-transaction reply.
    NullArray,

    /// Serializes to nothing. Returned by commands whose acknowledgements
    /// are streamed through the connection's reply sink instead
    /// (SUBSCRIBE and friends).
    Empty,
}

impl Reply {
    /// The `+OK` status reply.
    pub fn ok() -> Reply {
        Reply::Simple("OK".into())
    }

    /// The `+PONG` reply.
    pub fn pong() -> Reply {
        Reply::Simple("PONG".into())
    }

    /// The `+QUEUED` reply returned for commands buffered inside MULTI.
    pub fn queued() -> Reply {
        Reply::Simple("QUEUED".into())
    }

    /// An error reply with the given message.
    pub fn error(msg: impl Into<String>) -> Reply {
        Reply::Error(msg.into())
    }

    /// The standard wrong-argument-count error for a command.
    pub fn arg_num_error(cmd: &str) -> Reply {
        Reply::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd.to_ascii_lowercase()
        ))
    }

    /// The standard wrong-type error.
    pub fn wrong_type_error() -> Reply {
        Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
    }

    /// A multi-bulk reply built from raw byte strings.
    pub fn multi_bulk(items: impl IntoIterator<Item = Bytes>) -> Reply {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    /// An array of nullable byte strings (MGET, HMGET).
    pub fn multi_bulk_opt(items: impl IntoIterator<Item = Option<Bytes>>) -> Reply {
        Reply::Array(
            items
                .into_iter()
                .map(|i| i.map_or(Reply::Null, Reply::Bulk))
                .collect(),
        )
    }

    /// Returns `true` for error replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Interprets this reply as a decoded command line: an array of bulk
    /// strings with at least one element. Returns `None` for anything else.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        let Reply::Array(items) = self else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Wraps a command line back into its wire form, an array of bulks.
    pub fn from_cmd_line(line: CmdLine) -> Reply {
        Reply::Array(line.into_iter().map(Reply::Bulk).collect())
    }
}
