//! TCP accept loop and the per-connection session driver.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::commands;
use crate::protocol::{FrameError, FrameReader};
use crate::rdb;
use crate::session::Session;
use crate::state::ServerState;

/// Binds the configured port and serves until ctrl-c.
pub async fn run(state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", state.config.port)).await?;
    serve(state, listener).await
}

/// Accept loop over an already-bound listener. Each connection gets its
/// own task; a failing session never takes down its neighbors.
pub async fn serve(state: Arc<ServerState>, listener: TcpListener) -> std::io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        role = state.replication.role().name(),
        "listening"
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = drive_session(state, stream, peer).await {
                                debug!(%peer, error = %e, "session closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn drive_session(
    state: Arc<ServerState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), FrameError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = write_half;
    let mut session = Session::new(peer);

    loop {
        let Some(cmd) = reader.read_command().await? else {
            return Ok(());
        };
        debug!(%peer, command = %cmd.name, "dispatching");

        if cmd.name == "PSYNC" && state.replication.is_leader() {
            return serve_follower(state, reader, writer, peer).await;
        }

        let reply = commands::dispatch(&cmd.name, &cmd.args, &mut session, &state).await;
        writer.write_all(&reply.to_bytes()).await?;
    }
}

/// PSYNC repurposes the connection into a follower link: FULLRESYNC,
/// the bulk-framed snapshot (no trailing CRLF on the body), then the
/// socket splits for good. The write half drains mirrored frames, the
/// read half only ever carries acknowledgments back.
async fn serve_follower(
    state: Arc<ServerState>,
    mut reader: FrameReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
) -> Result<(), FrameError> {
    info!(%peer, "follower requested full resync");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    // Register before sending the snapshot: writes committed while the
    // bulk body is in flight queue on the channel and drain afterwards.
    let link_id = state.replication.register_link(tx);

    let header = format!("+FULLRESYNC {} 0\r\n", state.replication.replid());
    let snapshot = rdb::empty_snapshot();
    let resync = async {
        writer.write_all(header.as_bytes()).await?;
        writer
            .write_all(format!("${}\r\n", snapshot.len()).as_bytes())
            .await?;
        writer.write_all(&snapshot).await
    };
    if let Err(e) = resync.await {
        state.replication.remove_link(link_id);
        return Err(e.into());
    }

    let drain_state = state.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                warn!(%peer, "follower write failed, dropping link");
                drain_state.replication.remove_link(link_id);
                return;
            }
        }
    });

    loop {
        match reader.read_command().await {
            Ok(Some(cmd)) if cmd.name == "REPLCONF" => {
                if let [action, offset] = cmd.args.as_slice()
                    && action.eq_ignore_ascii_case(b"ACK")
                    && let Some(offset) = commands::parse_i64(offset).filter(|o| *o >= 0)
                {
                    state.replication.record_ack(link_id, offset as u64);
                }
            }
            Ok(Some(cmd)) => debug!(%peer, command = %cmd.name, "ignoring frame from follower"),
            Ok(None) | Err(_) => break,
        }
    }
    info!(%peer, "follower disconnected");
    state.replication.remove_link(link_id);
    Ok(())
}
