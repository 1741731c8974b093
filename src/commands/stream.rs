//! Stream commands: XADD, XRANGE, and the optionally blocking XREAD.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{text, wrong_arity};
use crate::protocol::Reply;
use crate::state::ServerState;
use crate::store::{
    EntryIdSpec, ScanOutcome, StreamEntry, StreamEntryId, WaiterHandle, parse_range_end,
    parse_range_start,
};

pub fn xadd(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key, id_spec, fields @ ..] = args else {
        return wrong_arity("xadd");
    };
    if fields.is_empty() || fields.len() % 2 != 0 {
        return wrong_arity("xadd");
    }
    let spec = match EntryIdSpec::parse(&text(id_spec)) {
        Ok(spec) => spec,
        Err(e) => return Reply::error(e.to_string()),
    };
    let pairs: Vec<(Bytes, Bytes)> = fields
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    match state.store.xadd(&text(key), spec, pairs) {
        Ok(id) => Reply::bulk(id.to_string()),
        Err(e) => Reply::error(e.to_string()),
    }
}

pub fn xrange(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key, start, end] = args else {
        return wrong_arity("xrange");
    };
    let (start, end) = match (
        parse_range_start(&text(start)),
        parse_range_end(&text(end)),
    ) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(e), _) | (_, Err(e)) => return Reply::error(e.to_string()),
    };
    let entries = state.store.xrange(&text(key), start, end);
    Reply::Array(entries.iter().map(entry_reply).collect())
}

/// `XREAD [BLOCK ms] STREAMS key… id…`. Returns entries strictly after
/// each given id; `$` reads from a stream's current top. With BLOCK the
/// call parks on the store's waiter registry until an XADD to one of
/// the streams wakes it, or the timeout elapses (BLOCK 0 waits
/// forever).
pub async fn xread(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let mut rest = args;
    let mut block_ms = None;
    if rest
        .first()
        .is_some_and(|arg| arg.eq_ignore_ascii_case(b"BLOCK"))
    {
        let Some(ms) = rest.get(1).and_then(super::parse_i64).filter(|ms| *ms >= 0) else {
            return Reply::error("timeout is not an integer or out of range");
        };
        block_ms = Some(ms as u64);
        rest = &rest[2..];
    }
    if !rest
        .first()
        .is_some_and(|arg| arg.eq_ignore_ascii_case(b"STREAMS"))
    {
        return Reply::error("syntax error");
    }
    let rest = &rest[1..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Reply::error(
            "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified",
        );
    }

    let count = rest.len() / 2;
    let mut queries = Vec::with_capacity(count);
    for i in 0..count {
        let key = text(&rest[i]);
        let cursor = text(&rest[count + i]);
        let after = if cursor == "$" {
            state.store.latest_id(&key)
        } else {
            match StreamEntryId::parse(&cursor) {
                Ok(id) => id,
                Err(e) => return Reply::error(e.to_string()),
            }
        };
        queries.push((key, after));
    }

    let Some(block_ms) = block_ms else {
        let results = state.store.scan_streams(&queries);
        return if results.is_empty() {
            Reply::NullArray
        } else {
            results_reply(results)
        };
    };

    let deadline = (block_ms > 0).then(|| Instant::now() + Duration::from_millis(block_ms));
    let keys: Vec<String> = queries.iter().map(|(key, _)| key.clone()).collect();
    loop {
        let handle = match state.store.scan_or_register(&queries) {
            ScanOutcome::Data(results) => return results_reply(results),
            ScanOutcome::Registered(handle) => handle,
        };
        let woken = wait(&handle, deadline).await;
        state.store.remove_waiter(&keys, handle.id);
        if !woken {
            return Reply::NullArray;
        }
        // Woken by an append: rescan, and re-park if another reader
        // consumed nothing but the entries still predate our cursors.
    }
}

async fn wait(handle: &WaiterHandle, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            handle.notify.notified().await;
            true
        }
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::timeout(remaining, handle.notify.notified())
                .await
                .is_ok()
        }
    }
}

fn entry_reply(entry: &StreamEntry) -> Reply {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in &entry.fields {
        fields.push(Reply::Bulk(field.clone()));
        fields.push(Reply::Bulk(value.clone()));
    }
    Reply::Array(vec![
        Reply::bulk(entry.id.to_string()),
        Reply::Array(fields),
    ])
}

fn results_reply(results: Vec<(String, Vec<StreamEntry>)>) -> Reply {
    Reply::Array(
        results
            .into_iter()
            .map(|(key, entries)| {
                Reply::Array(vec![
                    Reply::bulk(key),
                    Reply::Array(entries.iter().map(entry_reply).collect()),
                ])
            })
            .collect(),
    )
}
