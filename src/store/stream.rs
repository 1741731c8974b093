use std::fmt;

use bytes::Bytes;

use super::StoreError;

/// Stream entry id: a (milliseconds, sequence) pair ordered
/// lexicographically. Every stream's ids are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamEntryId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamEntryId {
    pub const ZERO: StreamEntryId = StreamEntryId { ms: 0, seq: 0 };
    pub const MAX: StreamEntryId = StreamEntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Strict `ms-seq` form.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let (ms, seq) = text.split_once('-').ok_or(StoreError::InvalidStreamId)?;
        Ok(Self {
            ms: ms.parse().map_err(|_| StoreError::InvalidStreamId)?,
            seq: seq.parse().map_err(|_| StoreError::InvalidStreamId)?,
        })
    }
}

impl fmt::Display for StreamEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// How XADD asked for the new entry id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryIdSpec {
    /// `*`: wall-time milliseconds, sequence derived from the top entry.
    Auto,
    /// `ms-*`: explicit milliseconds, next free sequence.
    AutoSeq(u64),
    /// `ms-seq`.
    Explicit(StreamEntryId),
}

impl EntryIdSpec {
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        if text == "*" {
            return Ok(EntryIdSpec::Auto);
        }
        if let Some(ms) = text.strip_suffix("-*") {
            return Ok(EntryIdSpec::AutoSeq(
                ms.parse().map_err(|_| StoreError::InvalidStreamId)?,
            ));
        }
        StreamEntryId::parse(text).map(EntryIdSpec::Explicit)
    }
}

/// Start bound of an XRANGE: `-` is the smallest id, a bare `ms` means
/// `ms-0`.
pub fn parse_range_start(text: &str) -> Result<StreamEntryId, StoreError> {
    match text {
        "-" => Ok(StreamEntryId::ZERO),
        _ => parse_bound(text, 0),
    }
}

/// End bound of an XRANGE: `+` is the largest id, a bare `ms` means the
/// last possible sequence at that millisecond.
pub fn parse_range_end(text: &str) -> Result<StreamEntryId, StoreError> {
    match text {
        "+" => Ok(StreamEntryId::MAX),
        _ => parse_bound(text, u64::MAX),
    }
}

fn parse_bound(text: &str, default_seq: u64) -> Result<StreamEntryId, StoreError> {
    if text.contains('-') {
        StreamEntryId::parse(text)
    } else {
        Ok(StreamEntryId::new(
            text.parse().map_err(|_| StoreError::InvalidStreamId)?,
            default_seq,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamEntryId,
    /// Field/value pairs in the order XADD supplied them.
    pub fields: Vec<(Bytes, Bytes)>,
}

/// Append-only entry log for one stream key. Entries are kept in id
/// order; the log never shrinks.
#[derive(Debug, Default)]
pub struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    /// Id of the top entry, or `0-0` for an empty stream.
    pub fn last_id(&self) -> StreamEntryId {
        self.entries.last().map(|e| e.id).unwrap_or(StreamEntryId::ZERO)
    }

    pub fn append(
        &mut self,
        spec: EntryIdSpec,
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamEntryId, StoreError> {
        let id = self.resolve_id(spec, now_ms);
        if id == StreamEntryId::ZERO {
            return Err(StoreError::StreamIdZero);
        }
        if !self.entries.is_empty() && id <= self.last_id() {
            return Err(StoreError::StreamIdTooSmall);
        }
        self.entries.push(StreamEntry { id, fields });
        Ok(id)
    }

    fn resolve_id(&self, spec: EntryIdSpec, now_ms: u64) -> StreamEntryId {
        match spec {
            EntryIdSpec::Explicit(id) => id,
            EntryIdSpec::Auto => {
                let last = self.last_id();
                if !self.entries.is_empty() && last.ms >= now_ms {
                    // Never step behind the top entry, even if the clock did.
                    StreamEntryId::new(last.ms, last.seq + 1)
                } else {
                    StreamEntryId::new(now_ms, 0)
                }
            }
            EntryIdSpec::AutoSeq(ms) => match self.max_seq_at(ms) {
                Some(seq) => StreamEntryId::new(ms, seq + 1),
                // 0-0 is forbidden, so the first auto id at ms 0 is 0-1.
                None if ms == 0 => StreamEntryId::new(0, 1),
                None => StreamEntryId::new(ms, 0),
            },
        }
    }

    fn max_seq_at(&self, ms: u64) -> Option<u64> {
        let end = self
            .entries
            .partition_point(|e| e.id <= StreamEntryId::new(ms, u64::MAX));
        if end == 0 {
            return None;
        }
        let last = self.entries[end - 1].id;
        (last.ms == ms).then_some(last.seq)
    }

    /// Entries with `start <= id <= end`, in ascending id order.
    pub fn range(&self, start: StreamEntryId, end: StreamEntryId) -> Vec<StreamEntry> {
        let lo = self.entries.partition_point(|e| e.id < start);
        let hi = self.entries.partition_point(|e| e.id <= end);
        self.entries[lo..hi.max(lo)].to_vec()
    }

    /// Entries with id strictly greater than `after`.
    pub fn entries_after(&self, after: StreamEntryId) -> Vec<StreamEntry> {
        let lo = self.entries.partition_point(|e| e.id <= after);
        self.entries[lo..].to_vec()
    }
}
