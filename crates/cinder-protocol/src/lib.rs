//! cinder-protocol: RESP2 wire protocol implementation.
//!
//! Provides single-pass parsing and direct-to-buffer serialization of
//! the RESP2 protocol used both on client connections and in the
//! append-only log, which is a flat file of serialized command arrays.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{parse_reply, Reply};
//!
//! // parse a simple string
//! let (reply, consumed) = parse_reply(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(reply, Reply::ok());
//! assert_eq!(consumed, 5);
//!
//! // serialize it back
//! let mut buf = BytesMut::new();
//! reply.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod error;
pub mod parse;
pub mod reply;
mod serialize;

pub use error::ProtocolError;
pub use parse::parse_reply;
pub use reply::{cmd_line, cmd_line_with, CmdLine, Reply};
