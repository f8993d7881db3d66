use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FarmError, Result};

pub const SERVER_CONFIG_FILE: &str = "server.json";
pub const CLIENT_CONFIG_FILE: &str = "client.json";

/// Shortest accepted periodic save interval.
pub const MIN_SAVE_INTERVAL_MS: u64 = 2000;

/// Read a JSON config file over the defaults. A missing file yields the
/// defaults; an unreadable or unparsable one is a configuration error.
fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(contents) => serde_json::from_slice(&contents)
            .map_err(|e| FarmError::Config(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(FarmError::Config(format!("{}: {}", path.display(), e))),
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ip: IpAddr,
    pub port: u16,
    /// Root directory for persisted state. Required.
    pub database: PathBuf,
    /// How often a changed store is flushed to disk.
    pub save_interval_ms: u64,
    /// Clients silent for longer than this are flagged as stale. They are
    /// never evicted.
    pub client_timeout_ms: u64,
    /// Interval of the overview log line; 0 disables it.
    pub overview_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::from([0, 0, 0, 0]),
            port: 8081,
            database: PathBuf::new(),
            save_interval_ms: 5000,
            client_timeout_ms: 15000,
            overview_interval_ms: 2000,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = database.into();
        self
    }

    /// Check required settings and clamp out-of-range ones.
    pub fn validate(mut self) -> Result<Self> {
        if self.database.as_os_str().is_empty() {
            return Err(FarmError::Config(
                "database path is not set; set \"database\" in the config file or pass --database"
                    .to_string(),
            ));
        }
        self.save_interval_ms = self.save_interval_ms.max(MIN_SAVE_INTERVAL_MS);
        Ok(self)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Directory holding one subdirectory per job.
    pub fn jobs_root(&self) -> PathBuf {
        self.database.join("jobs")
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Worker client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the coordinator.
    pub server: String,
    /// Where per-job working directories and task logs go.
    pub temp_dir: PathBuf,
    pub update_interval_ms: u64,
    /// 0 means one thread per CPU core.
    pub max_threads: u32,
    /// Empty means the machine hostname.
    pub hostname: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8081".to_string(),
            temp_dir: PathBuf::from("temp"),
            update_interval_ms: 2000,
            max_threads: 0,
            hostname: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// Fill in the automatic values: core count and hostname.
    pub fn resolve(mut self) -> Self {
        if self.max_threads == 0 {
            self.max_threads = u32::try_from(num_cpus::get()).unwrap_or(1).max(1);
        }
        if self.hostname.is_empty() {
            self.hostname = gethostname::gethostname().to_string_lossy().into_owned();
        }
        if self.hostname.is_empty() {
            self.hostname = "localhost".to_string();
        }
        self
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}
