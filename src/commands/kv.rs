//! String-table commands, plus the connection-level PING/ECHO pair.

use std::sync::Arc;

use bytes::Bytes;

use super::{parse_i64, text, wrong_arity};
use crate::protocol::Reply;
use crate::state::ServerState;
use crate::store::now_ms;

pub fn ping(args: &[Bytes]) -> Reply {
    match args {
        [] => Reply::Simple("PONG".to_string()),
        [message] => Reply::Bulk(message.clone()),
        _ => wrong_arity("ping"),
    }
}

pub fn echo(args: &[Bytes]) -> Reply {
    match args {
        [message] => Reply::Bulk(message.clone()),
        _ => wrong_arity("echo"),
    }
}

/// `SET key value [PX ms]`. A SET without PX clears any prior deadline.
pub fn set(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key, value, options @ ..] = args else {
        return wrong_arity("set");
    };
    let mut expires_at = None;
    let mut rest = options;
    while let [option, more @ ..] = rest {
        if option.eq_ignore_ascii_case(b"PX") {
            let [ms, tail @ ..] = more else {
                return Reply::error("syntax error");
            };
            let Some(ms) = parse_i64(ms) else {
                return Reply::error("value is not an integer or out of range");
            };
            if ms <= 0 {
                return Reply::error("invalid expire time in 'set' command");
            }
            expires_at = Some(now_ms() + ms as u64);
            rest = tail;
        } else {
            return Reply::error("syntax error");
        }
    }
    state.store.set(&text(key), value.clone(), expires_at);
    Reply::ok()
}

pub fn get(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key] = args else {
        return wrong_arity("get");
    };
    match state.store.get(&text(key)) {
        Ok(Some(value)) => Reply::Bulk(value),
        Ok(None) => Reply::NullBulk,
        Err(e) => Reply::error(e.to_string()),
    }
}

pub fn del(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    if args.is_empty() {
        return wrong_arity("del");
    }
    let removed = args
        .iter()
        .filter(|key| state.store.delete(&text(key)))
        .count();
    Reply::Integer(removed as i64)
}

pub fn incr(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key] = args else {
        return wrong_arity("incr");
    };
    match state.store.incr(&text(key)) {
        Ok(value) => Reply::Integer(value),
        Err(e) => Reply::error(e.to_string()),
    }
}

pub fn key_type(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [key] = args else {
        return wrong_arity("type");
    };
    Reply::Simple(state.store.key_type(&text(key)).name().to_string())
}

pub fn keys(args: &[Bytes], state: &Arc<ServerState>) -> Reply {
    let [pattern] = args else {
        return wrong_arity("keys");
    };
    let Ok(pattern) = glob::Pattern::new(&text(pattern)) else {
        return Reply::error("invalid pattern");
    };
    let mut keys = state.store.keys(&pattern);
    keys.sort();
    Reply::Array(keys.into_iter().map(Reply::bulk).collect())
}
