//! The `REDIS0011` snapshot codec.
//!
//! Layout: nine-byte magic, `0xFA` metadata pairs, a `0xFE` database
//! selector with `0xFB` sizing hints, string rows (optionally prefixed
//! by a `0xFC`/`0xFD` expiry), then `0xFF` and an eight-byte CRC64 of
//! everything before it. Lengths use the size encoding whose top two
//! bits select 6-bit, 14-bit, or 32-bit forms; the special `0b11` forms
//! are never written and are rejected on read.

mod reader;
mod writer;

pub use reader::parse;
pub use writer::{empty_snapshot, serialize, write_file};

use bytes::Bytes;
use crc::Crc;
use thiserror::Error;

pub const MAGIC: &[u8; 9] = b"REDIS0011";

/// The RDB trailer polynomial (Jones), little-endian on disk.
pub(crate) const CRC64: Crc<u64> = Crc::<u64>::new(&crc::CRC_64_REDIS);

/// One string row read from, or headed into, a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: Bytes,
    /// Absolute ms-since-epoch deadline.
    pub expires_at: Option<u64>,
}

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("snapshot I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a REDIS0011 snapshot")]
    BadMagic,

    #[error("snapshot ends mid-section")]
    Truncated,

    #[error("unsupported special size encoding ({0:#04x})")]
    SpecialEncoding(u8),

    #[error("unknown section marker {0:#04x}")]
    UnknownMarker(u8),

    #[error("snapshot key is not valid UTF-8")]
    NonUtf8Key,

    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,
}
