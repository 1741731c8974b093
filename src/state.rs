use std::sync::Arc;

use crate::config::ServerConfig;
use crate::replication::ReplicationState;
use crate::store::Store;

/// Process-wide state: one instance behind an `Arc`, shared by every
/// connection task, the replication engine, and the snapshot codec.
pub struct ServerState {
    pub config: ServerConfig,
    pub store: Store,
    pub replication: ReplicationState,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let replication = if config.is_follower() {
            ReplicationState::follower()
        } else {
            ReplicationState::leader()
        };
        Arc::new(Self {
            config,
            store: Store::new(),
            replication,
        })
    }
}
