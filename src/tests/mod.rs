//! End-to-end tests: real servers on ephemeral ports, driven over raw
//! RESP TCP connections.


use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::ServerConfig;
use crate::protocol::encode_command;
use crate::server;
use crate::state::ServerState;

pub(crate) fn test_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        dir: dir.to_path_buf(),
        dbfilename: "dump.rdb".to_string(),
        port: 0,
        replicaof: None,
    }
}

/// Binds an ephemeral port, spawns the accept loop, and hands back the
/// address to dial.
pub(crate) async fn spawn_server(config: ServerConfig) -> (Arc<ServerState>, SocketAddr) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new(config);
    tokio::spawn(server::serve(state.clone(), listener));
    (state, addr)
}

/// A raw RESP client: sends command frames, reads back exactly one
/// complete reply at a time as wire bytes.
pub(crate) struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    pub(crate) async fn send(&mut self, parts: &[&str]) {
        let args: Vec<Bytes> = parts[1..]
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        self.writer
            .write_all(&encode_command(parts[0], &args))
            .await
            .unwrap();
    }

    pub(crate) async fn roundtrip(&mut self, parts: &[&str]) -> Vec<u8> {
        self.send(parts).await;
        self.read_reply().await
    }

    /// Reads one reply, nested arrays included, returning its exact
    /// wire bytes.
    pub(crate) async fn read_reply(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut pending = 1usize;
        while pending > 0 {
            pending -= 1;
            let line = self.read_line(&mut out).await;
            match line.as_bytes().first() {
                Some(b'+') | Some(b'-') | Some(b':') => {}
                Some(b'$') => {
                    let len: i64 = line[1..].parse().unwrap();
                    if len >= 0 {
                        let mut payload = vec![0u8; len as usize + 2];
                        self.reader.read_exact(&mut payload).await.unwrap();
                        out.extend_from_slice(&payload);
                    }
                }
                Some(b'*') => {
                    let len: i64 = line[1..].parse().unwrap();
                    if len > 0 {
                        pending += len as usize;
                    }
                }
                _ => panic!("unexpected reply line: {line:?}"),
            }
        }
        out
    }

    async fn read_line(&mut self, out: &mut Vec<u8>) -> String {
        let mut raw = Vec::new();
        let n = self.reader.read_until(b'\n', &mut raw).await.unwrap();
        assert!(n > 0, "server closed the connection mid-reply");
        out.extend_from_slice(&raw);
        assert!(raw.ends_with(b"\r\n"), "reply line without CRLF: {raw:?}");
        raw.truncate(raw.len() - 2);
        String::from_utf8(raw).unwrap()
    }
}
