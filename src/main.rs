use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod protocol;
mod rdb;
mod replication;
mod server;
mod session;
mod state;
mod store;

#[cfg(test)]
mod tests;

use config::{LeaderAddr, ServerConfig};
use state::ServerState;

/// A Redis-compatible in-memory key/value server.
#[derive(Parser, Debug)]
#[command(name = "coral", version, about)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// Directory holding the snapshot file.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Snapshot file name inside `--dir`.
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    /// Run as a follower of this leader, given as "<host> <port>".
    #[arg(long)]
    replicaof: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing();

    let replicaof = match args.replicaof.as_deref().map(LeaderAddr::parse).transpose() {
        Ok(replicaof) => replicaof,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let config = ServerConfig {
        dir: args.dir,
        dbfilename: args.dbfilename,
        port: args.port,
        replicaof,
    };
    let state = ServerState::new(config);

    load_snapshot(&state);

    if let Some(leader) = state.config.replicaof.clone() {
        match replication::sync_with_leader(&state, &leader).await {
            Ok(conn) => {
                info!(leader = %leader, "synchronized with leader");
                tokio::spawn(replication::run_apply_loop(state.clone(), conn));
            }
            Err(e) => {
                error!(leader = %leader, error = %e, "replication handshake failed");
                eprintln!("Failed to synchronize with leader {leader}: {e}");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = server::run(state).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// A missing snapshot file means a cold start; a malformed one is
/// fatal.
fn load_snapshot(state: &Arc<ServerState>) {
    let path = state.config.snapshot_path();
    let image = match std::fs::read(&path) {
        Ok(image) => image,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            eprintln!("Failed to read snapshot {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match rdb::parse(&image) {
        Ok(rows) => {
            let count = rows.len();
            state.store.load_strings(
                rows.into_iter().map(|r| (r.key, r.value, r.expires_at)).collect(),
            );
            info!(keys = count, path = %path.display(), "loaded snapshot");
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "snapshot is unreadable");
            eprintln!("Failed to load snapshot {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}
