//! Protocol-level error type.

use thiserror::Error;

/// Errors produced while parsing RESP2 data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer does not yet contain a complete frame. Callers that
    /// read from a socket should fetch more bytes and retry; callers
    /// replaying a finite log should treat this as a truncated record.
    #[error("incomplete frame")]
    Incomplete,

    /// The data is structurally invalid RESP.
    #[error("invalid frame: {0}")]
    Invalid(String),

    /// A declared length exceeds the protocol limits.
    #[error("length {0} out of range")]
    LengthOutOfRange(i64),
}
