use std::net::SocketAddr;

use bytes::Bytes;

/// One command held back while a transaction is open.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub name: String,
    pub args: Vec<Bytes>,
}

/// Per-connection state, owned by the connection task. Transaction
/// bookkeeping lives here rather than in the store: sessions are values,
/// the store is the only shared mutable resource.
pub struct Session {
    pub peer: SocketAddr,
    /// Set on the follower's leader-link session. Replicated writes
    /// bypass the read-only check that applies to external clients.
    pub from_leader: bool,
    transaction: Option<Vec<QueuedCommand>>,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            from_leader: false,
            transaction: None,
        }
    }

    /// Session for the frames a follower receives over its leader link.
    pub fn leader_link(peer: SocketAddr) -> Self {
        Self {
            peer,
            from_leader: true,
            transaction: None,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// MULTI: opens a transaction with an empty queue.
    pub fn begin_transaction(&mut self) {
        self.transaction = Some(Vec::new());
    }

    pub fn queue_command(&mut self, name: &str, args: &[Bytes]) {
        if let Some(queue) = self.transaction.as_mut() {
            queue.push(QueuedCommand {
                name: name.to_string(),
                args: args.to_vec(),
            });
        }
    }

    /// EXEC: closes the transaction and hands back its queue, or `None`
    /// when no transaction was open.
    pub fn take_queue(&mut self) -> Option<Vec<QueuedCommand>> {
        self.transaction.take()
    }

    /// DISCARD: drops the queue. False when no transaction was open.
    pub fn abort_transaction(&mut self) -> bool {
        self.transaction.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut s = session();
        assert!(!s.in_transaction());
        assert!(s.take_queue().is_none());

        s.begin_transaction();
        assert!(s.in_transaction());
        s.queue_command("INCR", &[Bytes::from_static(b"n")]);
        s.queue_command("INCR", &[Bytes::from_static(b"n")]);

        let queue = s.take_queue().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].name, "INCR");
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_multi_resets_any_previous_queue() {
        let mut s = session();
        s.begin_transaction();
        s.queue_command("SET", &[Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
        s.begin_transaction();
        assert_eq!(s.take_queue().unwrap().len(), 0);
    }

    #[test]
    fn test_abort_drops_queue() {
        let mut s = session();
        assert!(!s.abort_transaction());
        s.begin_transaction();
        s.queue_command("SET", &[Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
        assert!(s.abort_transaction());
        assert!(!s.in_transaction());
    }
}
