//! Leader/follower replication.
//!
//! The leader keeps one [`FollowerLink`] per synchronized follower and
//! mirrors every accepted write to all of them, in commit order. The
//! follower side (see [`follower`]) performs the handshake, ingests the
//! snapshot, and applies replicated frames while accounting their wire
//! bytes into the offset. Roles are fixed for the process lifetime.

mod follower;

pub use follower::{LeaderConn, run_apply_loop, sync_with_leader};

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::FrameError;
use crate::rdb::RdbError;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("leader connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake framing: {0}")]
    Frame(#[from] FrameError),

    #[error("unexpected handshake reply: {0:?}")]
    UnexpectedReply(String),

    #[error("snapshot from leader: {0}")]
    Snapshot(#[from] RdbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    /// Wire name, as INFO reports it.
    pub fn name(self) -> &'static str {
        match self {
            Role::Leader => "master",
            Role::Follower => "slave",
        }
    }
}

/// Leader-side handle to one synchronized follower. Frames pushed into
/// `sender` are drained to the follower's socket by its writer task.
struct FollowerLink {
    id: u64,
    sender: UnboundedSender<Bytes>,
    acked_offset: u64,
}

/// Role, identity, and offset bookkeeping for one process.
pub struct ReplicationState {
    role: Role,
    /// 40 hex chars. A leader generates its own; a follower stores the
    /// leader's after FULLRESYNC.
    replid: RwLock<String>,
    /// Leader: bytes of mirrored frames. Follower: bytes of replicated
    /// frames consumed since the handshake.
    offset: AtomicU64,
    links: Mutex<Vec<FollowerLink>>,
    link_seq: AtomicU64,
    /// Held across commit-plus-mirror of each write so follower sockets
    /// observe writes in store commit order.
    pub write_order: Mutex<()>,
}

impl ReplicationState {
    pub fn leader() -> Self {
        Self::with_role(Role::Leader, generate_replid())
    }

    pub fn follower() -> Self {
        // Overwritten with the leader's id during the handshake.
        Self::with_role(Role::Follower, generate_replid())
    }

    fn with_role(role: Role, replid: String) -> Self {
        Self {
            role,
            replid: RwLock::new(replid),
            offset: AtomicU64::new(0),
            links: Mutex::new(Vec::new()),
            link_seq: AtomicU64::new(1),
            write_order: Mutex::new(()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn replid(&self) -> String {
        self.replid.read().clone()
    }

    pub fn set_replid(&self, replid: String) {
        *self.replid.write() = replid;
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn add_offset(&self, bytes: u64) {
        self.offset.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn register_link(&self, sender: UnboundedSender<Bytes>) -> u64 {
        let id = self.link_seq.fetch_add(1, Ordering::Relaxed);
        self.links.lock().push(FollowerLink {
            id,
            sender,
            acked_offset: 0,
        });
        id
    }

    pub fn remove_link(&self, id: u64) {
        self.links.lock().retain(|link| link.id != id);
    }

    pub fn record_ack(&self, id: u64, offset: u64) {
        let mut links = self.links.lock();
        if let Some(link) = links.iter_mut().find(|link| link.id == id) {
            link.acked_offset = offset;
        }
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    #[cfg(test)]
    pub fn acked_offsets(&self) -> Vec<u64> {
        self.links.lock().iter().map(|link| link.acked_offset).collect()
    }

    /// Mirror one accepted write to every follower. Dead links are
    /// dropped here; their writer tasks wind down when the channel
    /// closes. The leader's offset advances by the frame's wire length
    /// exactly once, however many followers are connected.
    pub fn propagate(&self, frame: Bytes) {
        self.add_offset(frame.len() as u64);
        let mut links = self.links.lock();
        links.retain(|link| link.sender.send(frame.clone()).is_ok());
    }

    /// Body of the `INFO replication` reply.
    pub fn info_section(&self) -> String {
        format!(
            "role:{}\r\nconnected_slaves:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
            self.role.name(),
            self.link_count(),
            self.replid(),
            self.offset(),
        )
    }
}

fn generate_replid() -> String {
    hex::encode(rand::thread_rng().r#gen::<[u8; 20]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_replid_is_40_hex_chars() {
        let state = ReplicationState::leader();
        let id = state.replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, ReplicationState::leader().replid());
    }

    #[test]
    fn test_propagate_fans_out_in_order_and_advances_offset() {
        let state = ReplicationState::leader();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.register_link(tx_a);
        state.register_link(tx_b);

        let first = Bytes::from_static(b"*1\r\n$4\r\nPING\r\n");
        let second = Bytes::from_static(b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n");
        state.propagate(first.clone());
        state.propagate(second.clone());

        assert_eq!(state.offset(), (first.len() + second.len()) as u64);
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap(), first);
            assert_eq!(rx.try_recv().unwrap(), second);
        }
    }

    #[test]
    fn test_dead_links_are_dropped_on_propagate() {
        let state = ReplicationState::leader();
        let (tx, rx) = mpsc::unbounded_channel();
        state.register_link(tx);
        drop(rx);
        state.propagate(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"));
        assert_eq!(state.link_count(), 0);
    }

    #[test]
    fn test_record_ack_updates_matching_link() {
        let state = ReplicationState::leader();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = state.register_link(tx);
        state.record_ack(id, 37);
        state.record_ack(9999, 1); // unknown ids are ignored
        assert_eq!(state.acked_offsets(), vec![37]);
    }

    #[test]
    fn test_info_section_shape() {
        let state = ReplicationState::leader();
        let info = state.info_section();
        assert!(info.starts_with("role:master\r\n"));
        assert!(info.contains("connected_slaves:0\r\n"));
        assert!(info.contains("master_repl_offset:0"));
        assert!(
            ReplicationState::follower()
                .info_section()
                .starts_with("role:slave\r\n")
        );
    }
}
