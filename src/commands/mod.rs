//! Command dispatch: uppercased name to handler, transaction
//! interception, follower write rejection, and leader-side mirroring.

mod admin;
mod kv;
mod stream;

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{Reply, encode_command};
use crate::session::Session;
use crate::state::ServerState;

/// Top of the command pipeline for one frame. MULTI/EXEC/DISCARD act on
/// the session before anything reaches a handler; inside an open
/// transaction every other command is queued, not run.
pub async fn dispatch(
    name: &str,
    args: &[Bytes],
    session: &mut Session,
    state: &Arc<ServerState>,
) -> Reply {
    match name {
        "MULTI" => {
            if session.in_transaction() {
                return Reply::error("MULTI calls can not be nested");
            }
            session.begin_transaction();
            return Reply::ok();
        }
        "EXEC" => return exec(session, state).await,
        "DISCARD" => {
            return if session.abort_transaction() {
                Reply::ok()
            } else {
                Reply::error("DISCARD without MULTI")
            };
        }
        _ => {}
    }

    if session.in_transaction() {
        session.queue_command(name, args);
        return Reply::queued();
    }

    run_command(name, args, session, state).await
}

/// Runs the queued commands in order and replies with the array of
/// their individual replies. Queued writes mirror to followers exactly
/// as they would outside a transaction.
async fn exec(session: &mut Session, state: &Arc<ServerState>) -> Reply {
    let Some(queued) = session.take_queue() else {
        return Reply::error("EXEC without MULTI");
    };
    let mut replies = Vec::with_capacity(queued.len());
    for cmd in queued {
        replies.push(run_command(&cmd.name, &cmd.args, session, state).await);
    }
    Reply::Array(replies)
}

async fn run_command(
    name: &str,
    args: &[Bytes],
    session: &Session,
    state: &Arc<ServerState>,
) -> Reply {
    match name {
        "PING" => kv::ping(args),
        "ECHO" => kv::echo(args),
        "GET" => kv::get(args, state),
        "TYPE" => kv::key_type(args, state),
        "KEYS" => kv::keys(args, state),
        "XRANGE" => stream::xrange(args, state),
        "XREAD" => stream::xread(args, state).await,
        "CONFIG" => admin::config(args, state),
        "SAVE" => admin::save(state),
        "INFO" => admin::info(state),
        "REPLCONF" => admin::replconf(args),
        "SET" | "DEL" | "INCR" | "XADD" => write_command(name, args, session, state),
        _ => Reply::error(format!("unknown command '{name}'")),
    }
}

/// Mutating commands: rejected for external clients on a follower,
/// committed and mirrored under the write-order lock on a leader so
/// follower sockets observe writes in commit order.
fn write_command(
    name: &str,
    args: &[Bytes],
    session: &Session,
    state: &Arc<ServerState>,
) -> Reply {
    if !session.from_leader && !state.replication.is_leader() {
        tracing::debug!(peer = %session.peer, command = name, "write refused on follower");
        return Reply::error("READONLY You can't write against a read only replica");
    }

    let _order = state.replication.write_order.lock();
    let reply = match name {
        "SET" => kv::set(args, state),
        "DEL" => kv::del(args, state),
        "INCR" => kv::incr(args, state),
        _ => stream::xadd(args, state),
    };
    if state.replication.is_leader() && !reply.is_error() {
        state.replication.propagate(encode_command(name, args));
    }
    reply
}

pub(crate) fn wrong_arity(cmd: &str) -> Reply {
    Reply::error(format!("wrong number of arguments for '{cmd}' command"))
}

/// Keys and option words arrive as raw bulk strings.
pub(crate) fn text(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

pub(crate) fn parse_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LeaderAddr, ServerConfig};

    fn leader_state() -> Arc<ServerState> {
        ServerState::new(ServerConfig {
            dir: std::env::temp_dir(),
            dbfilename: "coral-dispatch-test.rdb".to_string(),
            port: 0,
            replicaof: None,
        })
    }

    fn follower_state() -> Arc<ServerState> {
        ServerState::new(ServerConfig {
            dir: std::env::temp_dir(),
            dbfilename: "coral-dispatch-test.rdb".to_string(),
            port: 0,
            replicaof: Some(LeaderAddr {
                host: "localhost".to_string(),
                port: 1,
            }),
        })
    }

    fn session() -> Session {
        Session::new("127.0.0.1:0".parse().unwrap())
    }

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect()
    }

    async fn call(state: &Arc<ServerState>, session: &mut Session, parts: &[&str]) -> Reply {
        dispatch(
            &parts[0].to_ascii_uppercase(),
            &args(&parts[1..]),
            session,
            state,
        )
        .await
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let state = leader_state();
        let reply = call(&state, &mut session(), &["flush"]).await;
        assert_eq!(reply, Reply::error("unknown command 'FLUSH'"));
    }

    #[tokio::test]
    async fn test_transaction_queues_then_executes_in_order() {
        let state = leader_state();
        let mut s = session();
        assert_eq!(call(&state, &mut s, &["multi"]).await, Reply::ok());
        assert_eq!(call(&state, &mut s, &["incr", "n"]).await, Reply::queued());
        assert_eq!(call(&state, &mut s, &["incr", "n"]).await, Reply::queued());
        // Nothing ran yet.
        assert_eq!(state.store.get("n").unwrap(), None);
        assert_eq!(
            call(&state, &mut s, &["exec"]).await,
            Reply::Array(vec![Reply::Integer(1), Reply::Integer(2)])
        );
        assert!(!s.in_transaction());
    }

    #[tokio::test]
    async fn test_exec_without_multi() {
        let state = leader_state();
        let reply = call(&state, &mut session(), &["exec"]).await;
        assert_eq!(reply, Reply::error("EXEC without MULTI"));
    }

    #[tokio::test]
    async fn test_discard_drops_queue() {
        let state = leader_state();
        let mut s = session();
        call(&state, &mut s, &["multi"]).await;
        call(&state, &mut s, &["set", "k", "v"]).await;
        assert_eq!(call(&state, &mut s, &["discard"]).await, Reply::ok());
        assert_eq!(state.store.get("k").unwrap(), None);
        assert_eq!(
            call(&state, &mut s, &["discard"]).await,
            Reply::error("DISCARD without MULTI")
        );
    }

    #[tokio::test]
    async fn test_nested_multi_is_rejected() {
        let state = leader_state();
        let mut s = session();
        call(&state, &mut s, &["multi"]).await;
        assert_eq!(
            call(&state, &mut s, &["multi"]).await,
            Reply::error("MULTI calls can not be nested")
        );
    }

    #[tokio::test]
    async fn test_follower_rejects_external_writes_but_not_reads() {
        let state = follower_state();
        let mut s = session();
        let reply = call(&state, &mut s, &["set", "k", "v"]).await;
        assert!(reply.is_error(), "writes must be refused: {reply:?}");
        assert_eq!(call(&state, &mut s, &["get", "k"]).await, Reply::NullBulk);
    }

    #[tokio::test]
    async fn test_leader_link_session_bypasses_readonly_check() {
        let state = follower_state();
        let mut link = Session::leader_link("127.0.0.1:0".parse().unwrap());
        assert_eq!(call(&state, &mut link, &["set", "k", "v"]).await, Reply::ok());
        assert_eq!(
            state.store.get("k").unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn test_accepted_writes_are_mirrored_with_client_framing() {
        let state = leader_state();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.replication.register_link(tx);

        let mut s = session();
        call(&state, &mut s, &["set", "k", "v"]).await;
        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert_eq!(state.replication.offset(), frame.len() as u64);

        // Rejected writes are not mirrored.
        call(&state, &mut s, &["incr", "k"]).await;
        assert!(rx.try_recv().is_err());
    }
}
