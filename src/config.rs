use std::fmt;
use std::path::PathBuf;

/// Runtime configuration, assembled from the command line at startup
/// and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the snapshot file.
    pub dir: PathBuf,
    /// Snapshot file name inside `dir`.
    pub dbfilename: String,
    /// TCP listen port.
    pub port: u16,
    /// When set, the process runs as a follower of this leader.
    pub replicaof: Option<LeaderAddr>,
}

impl ServerConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    pub fn is_follower(&self) -> bool {
        self.replicaof.is_some()
    }

    /// Backing lookup for `CONFIG GET`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "dir" => Some(self.dir.display().to_string()),
            "dbfilename" => Some(self.dbfilename.clone()),
            _ => None,
        }
    }
}

/// Leader address as given to `--replicaof`, a single `"<host> <port>"`
/// value.
#[derive(Debug, Clone)]
pub struct LeaderAddr {
    pub host: String,
    pub port: u16,
}

impl LeaderAddr {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = text.split_whitespace();
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!(
                "--replicaof expects \"<host> <port>\", got {text:?}"
            ));
        };
        let port = port
            .parse()
            .map_err(|_| format!("--replicaof port is not a number: {port:?}"))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for LeaderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
