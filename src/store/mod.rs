//! The concurrent data model: a string table with millisecond expiry, a
//! stream table, and the registry of blocked stream readers.
//!
//! Everything lives behind one readers/writer lock. Read commands take
//! the read lock, mutations the write lock, and no caller holds either
//! across an await point. Blocked XREADs park on a per-waiter
//! [`Notify`] outside the lock; XADD signals every waiter registered
//! for the stream while still holding the write lock.

mod stream;

pub use stream::{
    EntryIdSpec, Stream, StreamEntry, StreamEntryId, parse_range_end, parse_range_start,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Notify;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Data-model failures surfaced to clients as error replies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Stream,
    None,
}

impl KeyType {
    pub fn name(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Stream => "stream",
            KeyType::None => "none",
        }
    }
}

struct StringEntry {
    value: Bytes,
    /// Absolute deadline in ms since the epoch.
    expires_at: Option<u64>,
}

impl StringEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

struct Waiter {
    id: u64,
    notify: Arc<Notify>,
}

/// Handle a blocked reader holds while parked. The notify side lives in
/// the waiter registry; dropping the handle alone does not unregister,
/// callers do that explicitly once the wait resolves.
pub struct WaiterHandle {
    pub id: u64,
    pub notify: Arc<Notify>,
}

/// Outcome of the atomic scan-or-park step of a blocking read.
pub enum ScanOutcome {
    Data(Vec<(String, Vec<StreamEntry>)>),
    Registered(WaiterHandle),
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    streams: HashMap<String, Stream>,
    waiters: HashMap<String, Vec<Waiter>>,
}

/// The shared store. One instance per process, shared by every
/// connection task.
pub struct Store {
    inner: RwLock<Inner>,
    waiter_seq: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            waiter_seq: AtomicU64::new(1),
        }
    }

    /// Overwrites any existing string value. A prior expiry is cleared
    /// unless a new one is supplied.
    pub fn set(&self, key: &str, value: Bytes, expires_at: Option<u64>) {
        let mut inner = self.inner.write();
        inner
            .strings
            .insert(key.to_string(), StringEntry { value, expires_at });
    }

    /// Lazily removes the entry if its deadline has passed: the read
    /// lock detects, then a write acquisition rechecks and deletes.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = now_ms();
        {
            let inner = self.inner.read();
            match inner.strings.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => {
                    return if inner.streams.contains_key(key) {
                        Err(StoreError::WrongType)
                    } else {
                        Ok(None)
                    };
                }
            }
        }
        let mut inner = self.inner.write();
        if inner.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            inner.strings.remove(key);
        }
        Ok(None)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.write().strings.remove(key).is_some()
    }

    /// Keys matching a shell-style glob. Expired entries are invisible.
    pub fn keys(&self, pattern: &glob::Pattern) -> Vec<String> {
        let now = now_ms();
        let inner = self.inner.read();
        inner
            .strings
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key)
            .chain(inner.streams.keys())
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect()
    }

    /// Stream table first, then strings, then none.
    pub fn key_type(&self, key: &str) -> KeyType {
        let now = now_ms();
        let inner = self.inner.read();
        if inner.streams.contains_key(key) {
            KeyType::Stream
        } else if inner.strings.get(key).is_some_and(|e| !e.is_expired(now)) {
            KeyType::String
        } else {
            KeyType::None
        }
    }

    /// Missing (or expired) keys start from 1. Existing values must
    /// parse as a signed decimal integer; the expiry, if any, survives.
    pub fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut inner = self.inner.write();
        let (next, expires_at) = match inner.strings.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok())
                    .ok_or(StoreError::NotAnInteger)?;
                let next = current.checked_add(1).ok_or(StoreError::NotAnInteger)?;
                (next, entry.expires_at)
            }
            _ => (1, None),
        };
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: Bytes::from(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    /// Appends an entry and wakes every reader blocked on this stream,
    /// each exactly once, before the write lock is released.
    pub fn xadd(
        &self,
        key: &str,
        spec: EntryIdSpec,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<StreamEntryId, StoreError> {
        let now = now_ms();
        let mut inner = self.inner.write();
        if inner.strings.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Err(StoreError::WrongType);
        }
        let stream = inner.streams.entry(key.to_string()).or_default();
        let id = stream.append(spec, fields, now)?;
        if let Some(waiters) = inner.waiters.remove(key) {
            for waiter in waiters {
                waiter.notify.notify_one();
            }
        }
        Ok(id)
    }

    /// Inclusive range scan. A missing stream reads as empty.
    pub fn xrange(
        &self,
        key: &str,
        start: StreamEntryId,
        end: StreamEntryId,
    ) -> Vec<StreamEntry> {
        let inner = self.inner.read();
        inner
            .streams
            .get(key)
            .map(|stream| stream.range(start, end))
            .unwrap_or_default()
    }

    /// Resolution of the `$` read cursor: the stream's top id, or `0-0`
    /// when the stream is missing or empty.
    pub fn latest_id(&self, key: &str) -> StreamEntryId {
        let inner = self.inner.read();
        inner
            .streams
            .get(key)
            .map(|stream| stream.last_id())
            .unwrap_or(StreamEntryId::ZERO)
    }

    /// Non-blocking scan phase of XREAD: per-stream entries strictly
    /// after the given cursor, omitting streams with nothing new.
    pub fn scan_streams(
        &self,
        queries: &[(String, StreamEntryId)],
    ) -> Vec<(String, Vec<StreamEntry>)> {
        let inner = self.inner.read();
        Self::scan_locked(&inner, queries)
    }

    /// Atomic rescan-or-park step of a blocking XREAD. Registration and
    /// the final empty check happen under one write acquisition so an
    /// XADD can never slip between them unobserved.
    pub fn scan_or_register(&self, queries: &[(String, StreamEntryId)]) -> ScanOutcome {
        let mut inner = self.inner.write();
        let results = Self::scan_locked(&inner, queries);
        if !results.is_empty() {
            return ScanOutcome::Data(results);
        }
        let handle = WaiterHandle {
            id: self.waiter_seq.fetch_add(1, Ordering::Relaxed),
            notify: Arc::new(Notify::new()),
        };
        for (key, _) in queries {
            inner.waiters.entry(key.clone()).or_default().push(Waiter {
                id: handle.id,
                notify: handle.notify.clone(),
            });
        }
        ScanOutcome::Registered(handle)
    }

    /// Drops one waiter's registrations after its wait resolved, on
    /// whichever streams still hold them.
    pub fn remove_waiter(&self, keys: &[String], waiter_id: u64) {
        let mut inner = self.inner.write();
        for key in keys {
            if let Some(waiters) = inner.waiters.get_mut(key) {
                waiters.retain(|w| w.id != waiter_id);
                if waiters.is_empty() {
                    inner.waiters.remove(key);
                }
            }
        }
    }

    fn scan_locked(
        inner: &Inner,
        queries: &[(String, StreamEntryId)],
    ) -> Vec<(String, Vec<StreamEntry>)> {
        queries
            .iter()
            .filter_map(|(key, after)| {
                let entries = inner.streams.get(key)?.entries_after(*after);
                (!entries.is_empty()).then(|| (key.clone(), entries))
            })
            .collect()
    }

    /// Live string rows for the snapshot writer.
    pub fn string_entries(&self) -> Vec<(String, Bytes, Option<u64>)> {
        let now = now_ms();
        let inner = self.inner.read();
        inner
            .strings
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.expires_at))
            .collect()
    }

    /// Bulk-load string rows from a snapshot. Rows already past their
    /// deadline are dropped instead of resurrected.
    pub fn load_strings(&self, rows: Vec<(String, Bytes, Option<u64>)>) {
        let now = now_ms();
        let mut inner = self.inner.write();
        for (key, value, expires_at) in rows {
            if expires_at.is_some_and(|deadline| now >= deadline) {
                continue;
            }
            inner.strings.insert(key, StringEntry { value, expires_at });
        }
    }
}
