//! Worker configuration.
//!
//! Defaults come from the environment ([`WorkerConfig::from_env`]); a
//! [`ConfigStore`] persists the effective configuration, including the
//! master-assigned unique id, across restarts.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Human readable node name
    pub name: String,
    /// Address the inbound listener binds to
    pub bind_address: IpAddr,
    /// Address advertised to the master
    pub advertise_address: IpAddr,
    /// Inbound listener port
    pub listen_port: u16,
    /// Master host name or address
    pub master_host: String,
    /// Master port
    pub master_port: u16,
    /// Master-assigned unique id, empty until assigned
    pub unid: String,
    /// Encoder binary
    pub ffmpeg_path: PathBuf,
    /// Local root of per-task working directories
    pub temp_root: PathBuf,
    /// Root of the filesystem shared with the master
    pub shared_root: PathBuf,
    /// Concurrent audio encodes
    pub thread_count: usize,
    /// Bound of each connect/write/read with the master
    pub contact_timeout_secs: u64,
    /// First reconnection delay
    pub reconnect_base_secs: u64,
    /// Reconnection delay cap
    pub reconnect_max_secs: u64,
    /// Kill an encoder pass after this many seconds
    pub encode_timeout_secs: Option<u64>,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 1338,
            master_host: "localhost".to_string(),
            master_port: 1337,
            unid: String::new(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_root: PathBuf::from("/tmp/encmesh"),
            shared_root: PathBuf::from("/srv/encmesh"),
            thread_count: num_cpus::get(),
            contact_timeout_secs: 5,
            reconnect_base_secs: 1,
            reconnect_max_secs: 30,
            encode_timeout_secs: None,
            metrics_addr: None,
        }
    }
}

fn default_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "encmesh-worker".to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: std::env::var("WORKER_NAME").unwrap_or(defaults.name),
            bind_address: env_parse("WORKER_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            advertise_address: env_parse("WORKER_ADDRESS").unwrap_or(defaults.advertise_address),
            listen_port: env_parse("WORKER_PORT").unwrap_or(defaults.listen_port),
            master_host: std::env::var("MASTER_HOST").unwrap_or(defaults.master_host),
            master_port: env_parse("MASTER_PORT").unwrap_or(defaults.master_port),
            unid: std::env::var("WORKER_UNID").unwrap_or_default(),
            ffmpeg_path: std::env::var("WORKER_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            temp_root: std::env::var("WORKER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_root),
            shared_root: std::env::var("WORKER_SHARED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.shared_root),
            thread_count: env_parse::<usize>("WORKER_THREADS")
                .unwrap_or(defaults.thread_count)
                .max(1),
            contact_timeout_secs: env_parse("MASTER_CONTACT_TIMEOUT_SECS")
                .unwrap_or(defaults.contact_timeout_secs),
            reconnect_base_secs: env_parse("WORKER_RECONNECT_BASE_SECS")
                .unwrap_or(defaults.reconnect_base_secs),
            reconnect_max_secs: env_parse("WORKER_RECONNECT_MAX_SECS")
                .unwrap_or(defaults.reconnect_max_secs),
            encode_timeout_secs: env_parse("WORKER_ENCODE_TIMEOUT_SECS"),
            metrics_addr: env_parse("WORKER_METRICS_ADDR"),
        }
    }

    pub fn contact_timeout(&self) -> Duration {
        Duration::from_secs(self.contact_timeout_secs.max(1))
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs.max(self.reconnect_base_secs))
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.name.trim().is_empty() {
            return Err(WorkerError::config_error("node name is empty"));
        }
        if self.master_host.trim().is_empty() {
            return Err(WorkerError::config_error("master host is empty"));
        }
        if self.thread_count == 0 {
            return Err(WorkerError::config_error("thread count must be positive"));
        }
        if self.reconnect_base_secs == 0 {
            return Err(WorkerError::config_error("reconnect delay must be at least one second"));
        }
        Ok(())
    }
}

/// Persistence of the worker configuration.
pub trait ConfigStore: Send + Sync {
    /// Load the stored configuration, `None` if nothing was stored yet.
    fn load(&self) -> WorkerResult<Option<WorkerConfig>>;

    fn dump(&self, config: &WorkerConfig) -> WorkerResult<()>;
}

/// Configuration stored as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `WORKER_CONFIG_PATH`, default `encmesh-worker.json`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("WORKER_CONFIG_PATH")
                .unwrap_or_else(|_| "encmesh-worker.json".to_string()),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> WorkerResult<Option<WorkerConfig>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn dump(&self, config: &WorkerConfig) -> WorkerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Worker configuration saved");
        Ok(())
    }
}

/// Load the stored configuration, falling back to the environment and
/// storing the result.
pub fn load_or_init(store: &dyn ConfigStore) -> WorkerResult<WorkerConfig> {
    match store.load()? {
        Some(config) => Ok(config),
        None => {
            let config = WorkerConfig::from_env();
            store.dump(&config)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.contact_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_base(), Duration::from_secs(1));
        assert_eq!(config.reconnect_max(), Duration::from_secs(30));
        assert!(config.thread_count >= 1);
        assert!(config.unid.is_empty());
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(dir.path().join("conf").join("worker.json"));
        assert!(store.load().unwrap().is_none());

        let config = WorkerConfig {
            unid: "abc123".to_string(),
            ..WorkerConfig::default()
        };
        store.dump(&config).unwrap();

        assert_eq!(store.load().unwrap(), Some(config));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"name": "w7", "master_port": 4000}"#).unwrap();

        let config = JsonConfigStore::new(&path).load().unwrap().unwrap();
        assert_eq!(config.name, "w7");
        assert_eq!(config.master_port, 4000);
        assert_eq!(config.contact_timeout_secs, 5);
    }

    #[test]
    fn test_load_or_init_writes_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(dir.path().join("worker.json"));

        let config = load_or_init(&store).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), Some(config));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = WorkerConfig {
            name: " ".to_string(),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_reconnect_delay() {
        let config = WorkerConfig {
            reconnect_base_secs: 0,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }
}
