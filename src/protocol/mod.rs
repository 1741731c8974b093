//! RESP wire protocol: request framing and reply encoding.
//!
//! The decoder is the single source of truth for wire byte counts.
//! Replication offsets on both roles are sums of [`Command::wire_len`]
//! values, so every read path here accounts for each byte it consumes,
//! CRLF terminators included.

mod reader;
mod reply;

pub use reader::{Command, FrameReader};
pub use reply::{Reply, encode_command};

use thiserror::Error;

/// Failures while reading RESP frames off the wire.
///
/// `Io` covers connection-level errors. Everything else is a protocol
/// violation; the session is closed without a reply.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("invalid length prefix: {0:?}")]
    BadLength(String),

    #[error("command name is not valid UTF-8")]
    NonUtf8Command,
}
