//! Server administration: CONFIG GET, SAVE, INFO, and the REPLCONF
//! options exchanged during the replication handshake.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use super::text;
use crate::protocol::Reply;
use crate::rdb::{self, SnapshotEntry};
use crate::state::ServerState;

/// Only `CONFIG GET dir|dbfilename` is recognized. Known keys reply
/// `[name, value]`; unknown keys reply a nil bulk string.
pub fn config(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [action, key] = args else {
        return Reply::error("syntax error");
    };
    if !action.eq_ignore_ascii_case(b"GET") {
        return Reply::error("syntax error");
    }
    let name = text(key);
    match state.config.lookup(&name) {
        Some(value) => Reply::Array(vec![Reply::bulk(name), Reply::bulk(value)]),
        None => Reply::NullBulk,
    }
}

/// Dumps the live string table to the configured snapshot file.
pub fn save(state: &Arc<ServerState>) -> Reply {
    let rows: Vec<SnapshotEntry> = state
        .store
        .string_entries()
        .into_iter()
        .map(|(key, value, expires_at)| SnapshotEntry {
            key,
            value,
            expires_at,
        })
        .collect();
    let path = state.config.snapshot_path();
    match rdb::write_file(&path, &rows) {
        Ok(()) => {
            info!(keys = rows.len(), path = %path.display(), "snapshot written");
            Reply::ok()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot write failed");
            Reply::error(e.to_string())
        }
    }
}

/// Only the replication section exists; any requested section gets it.
pub fn info(state: &Arc<ServerState>) -> Reply {
    Reply::bulk(state.replication.info_section())
}

/// `listening-port` and `capa` from a synchronizing follower are
/// acknowledged as-is. ACK frames never reach this handler; the
/// follower-link reader consumes them.
pub fn replconf(_args: &[Bytes]) -> Reply {
    Reply::ok()
}
