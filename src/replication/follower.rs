//! Follower side of replication: the startup handshake, snapshot
//! ingest, and the replicated-command apply loop.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use super::ReplicationError;
use crate::commands;
use crate::config::LeaderAddr;
use crate::protocol::{FrameReader, encode_command};
use crate::rdb;
use crate::session::Session;
use crate::state::ServerState;

/// The synchronized leader connection, ready for the apply loop.
pub struct LeaderConn {
    peer: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Runs the four-step handshake, loads the snapshot the leader sends,
/// and stores its replication id. The offset counts replicated frame
/// bytes from this point on, starting at zero.
pub async fn sync_with_leader(
    state: &Arc<ServerState>,
    leader: &LeaderAddr,
) -> Result<LeaderConn, ReplicationError> {
    let stream = TcpStream::connect((leader.host.as_str(), leader.port)).await?;
    let peer = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = write_half;

    send(&mut writer, &["PING"]).await?;
    expect(&mut reader, "+PONG").await?;

    let port = state.config.port.to_string();
    send(&mut writer, &["REPLCONF", "listening-port", &port]).await?;
    expect(&mut reader, "+OK").await?;

    send(&mut writer, &["REPLCONF", "capa", "psync2"]).await?;
    expect(&mut reader, "+OK").await?;

    send(&mut writer, &["PSYNC", "?", "-1"]).await?;
    let line = reader.read_simple_line().await?;
    let replid = match line.strip_prefix("+FULLRESYNC ") {
        Some(rest) => rest
            .split_whitespace()
            .next()
            .ok_or_else(|| ReplicationError::UnexpectedReply(line.clone()))?,
        None => return Err(ReplicationError::UnexpectedReply(line)),
    };
    state.replication.set_replid(replid.to_string());

    let snapshot = reader.read_snapshot_body().await?;
    let rows = rdb::parse(&snapshot)?;
    debug!(keys = rows.len(), "ingested leader snapshot");
    state
        .store
        .load_strings(rows.into_iter().map(|r| (r.key, r.value, r.expires_at)).collect());

    Ok(LeaderConn {
        peer,
        reader,
        writer,
    })
}

/// Applies replicated frames until the leader link drops. Replies are
/// discarded; the sole frame answered is `REPLCONF GETACK *`, which
/// reports the offset as of the byte just before the GETACK frame
/// itself.
pub async fn run_apply_loop(state: Arc<ServerState>, conn: LeaderConn) {
    let LeaderConn {
        peer,
        mut reader,
        mut writer,
    } = conn;
    let mut session = Session::leader_link(peer);

    loop {
        let cmd = match reader.read_command().await {
            Ok(Some(cmd)) => cmd,
            Ok(None) => {
                info!(leader = %peer, "leader closed the replication link");
                return;
            }
            Err(e) => {
                warn!(leader = %peer, error = %e, "replication link failed");
                return;
            }
        };

        if is_getack(&cmd.name, &cmd.args) {
            let ack = state.replication.offset().to_string();
            let frame = encode_command(
                "REPLCONF",
                &[Bytes::from_static(b"ACK"), Bytes::from(ack)],
            );
            if writer.write_all(&frame).await.is_err() {
                warn!(leader = %peer, "replication link failed while acknowledging");
                return;
            }
            state.replication.add_offset(cmd.wire_len);
            continue;
        }

        debug!(command = %cmd.name, bytes = cmd.wire_len, "applying replicated frame");
        let _ = commands::dispatch(&cmd.name, &cmd.args, &mut session, &state).await;
        state.replication.add_offset(cmd.wire_len);
    }
}

fn is_getack(name: &str, args: &[Bytes]) -> bool {
    name == "REPLCONF"
        && args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case(b"GETACK"))
}

async fn send(writer: &mut OwnedWriteHalf, parts: &[&str]) -> Result<(), ReplicationError> {
    let args: Vec<Bytes> = parts[1..]
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect();
    writer.write_all(&encode_command(parts[0], &args)).await?;
    Ok(())
}

async fn expect(
    reader: &mut FrameReader<OwnedReadHalf>,
    wanted: &str,
) -> Result<(), ReplicationError> {
    let line = reader.read_simple_line().await?;
    if line != wanted {
        return Err(ReplicationError::UnexpectedReply(line));
    }
    Ok(())
}
