use serde::Deserialize;
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use super::types::de_duration;
use crate::driver::Driver;
use crate::endpoint::{ServerEndpoint, SessionMode};
use crate::flat::FlatPool;
use crate::handle::PoolSettings;
use crate::topology::TopologyPool;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ----- PoolsFile -------------------------------------------------------------

/// Parsed and validated pool file. Building pools from it never touches the
/// network; sessions open on first use or on the first refresh.
#[derive(Debug, Clone)]
pub struct PoolsFile {
    pub settings: PoolSettings,
    /// How often the keeper refreshes the flat pool.
    pub refresh_interval: Duration,
    pub masters: Vec<ServerEndpoint>,
    pub slaves: Vec<ServerEndpoint>,
    pub connections: Vec<ServerEndpoint>,
}

// -----------------------------------------------------------------------------
// ----- PoolsFile: Static -----------------------------------------------------

impl PoolsFile {
    pub async fn from_file_async(path: &Path) -> Result<PoolsFile, PoolsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| PoolsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<PoolsFile, PoolsError> {
        let doc: PoolsFileDoc = toml::from_str(raw).map_err(|e| PoolsError::Toml { source: e })?;

        if doc.masters.is_empty() && doc.slaves.is_empty() && doc.connections.is_empty() {
            return Err(PoolsError::EmptyConfig);
        }

        let mut seen_masters = HashSet::with_capacity(doc.masters.len());
        let mut masters = Vec::with_capacity(doc.masters.len());
        for entry in doc.masters {
            validate_server("masters", &entry)?;
            if !seen_masters.insert(entry.name.clone()) {
                return Err(PoolsError::DuplicateMaster { name: entry.name });
            }
            masters.push(entry.into_endpoint(ServerEndpoint::master));
        }

        let mut slaves = Vec::with_capacity(doc.slaves.len());
        for entry in doc.slaves {
            validate_server("slaves", &entry)?;
            slaves.push(entry.into_endpoint(ServerEndpoint::slave));
        }

        let mut connections = Vec::with_capacity(doc.connections.len());
        for entry in doc.connections {
            validate_server("connections", &entry.server)?;
            if !entry.accepts_writes && !entry.accepts_reads {
                return Err(PoolsError::NoCapability {
                    name: entry.server.name,
                });
            }
            let mode = SessionMode::from_autocommit(entry.autocommit);
            let endpoint = entry
                .server
                .into_endpoint(ServerEndpoint::new)
                .with_capabilities(entry.accepts_writes, entry.accepts_reads)
                .with_mode(mode);
            connections.push(endpoint);
        }

        let refresh_interval = doc.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL);
        if refresh_interval.is_zero() {
            return Err(PoolsError::ZeroDuration {
                field: "refresh_interval",
            });
        }

        let settings = doc.settings.resolve();
        debug!(
            "pool file: {} master(s), {} slave(s), {} connection(s)",
            masters.len(),
            slaves.len(),
            connections.len()
        );

        Ok(PoolsFile {
            settings,
            refresh_interval,
            masters,
            slaves,
            connections,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- PoolsFile: Public -----------------------------------------------------

impl PoolsFile {
    pub fn build_topology(&self, driver: Arc<dyn Driver>) -> TopologyPool {
        let pool = TopologyPool::new(driver, self.settings.clone());
        for master in &self.masters {
            pool.register_master(&master.name, master.clone());
        }
        for slave in &self.slaves {
            pool.register_slave(&slave.name, slave.clone());
        }
        pool
    }

    pub fn build_flat(&self, driver: Arc<dyn Driver>) -> FlatPool {
        let pool = FlatPool::new(driver, self.settings.clone());
        for connection in &self.connections {
            pool.add_connection(&connection.name, connection.clone());
        }
        pool
    }

    pub fn endpoint_count(&self) -> usize {
        self.masters.len() + self.slaves.len() + self.connections.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Deserialize)]
struct PoolsFileDoc {
    #[serde(flatten)]
    settings: SettingsFileEntry,

    #[serde(default, deserialize_with = "de_duration")]
    refresh_interval: Option<Duration>,

    #[serde(default)]
    masters: Vec<ServerFileEntry>,

    #[serde(default)]
    slaves: Vec<ServerFileEntry>,

    #[serde(default)]
    connections: Vec<ConnectionFileEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFileEntry {
    #[serde(default, deserialize_with = "de_duration")]
    health_check_interval: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    probe_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    connect_timeout: Option<Duration>,

    #[serde(default)]
    connect_retries: Option<u32>,

    #[serde(default, deserialize_with = "de_duration")]
    connect_backoff: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    acquire_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    query_timeout: Option<Duration>,
}

impl SettingsFileEntry {
    fn resolve(self) -> PoolSettings {
        let defaults = PoolSettings::default();
        PoolSettings {
            health_check_interval: self
                .health_check_interval
                .unwrap_or(defaults.health_check_interval),
            probe_timeout: self.probe_timeout.unwrap_or(defaults.probe_timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            connect_retries: self.connect_retries.unwrap_or(defaults.connect_retries),
            connect_backoff: self.connect_backoff.unwrap_or(defaults.connect_backoff),
            acquire_timeout: self.acquire_timeout.unwrap_or(defaults.acquire_timeout),
            query_timeout: self.query_timeout.unwrap_or(defaults.query_timeout),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServerFileEntry {
    name: String,
    database: String,
    host: String,
    port: u16,
    user: String,
    #[serde(default)]
    password: String,

    #[serde(default, deserialize_with = "de_duration")]
    max_lifetime: Option<Duration>,
}

type EndpointCtor = fn(String, String, String, u16, String, String) -> ServerEndpoint;

impl ServerFileEntry {
    fn into_endpoint(self, ctor: EndpointCtor) -> ServerEndpoint {
        ctor(
            self.name,
            self.database,
            self.host,
            self.port,
            self.user,
            self.password,
        )
        .with_max_lifetime(self.max_lifetime)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectionFileEntry {
    #[serde(flatten)]
    server: ServerFileEntry,

    #[serde(default)]
    accepts_writes: bool,

    #[serde(default)]
    accepts_reads: bool,

    #[serde(default = "default_autocommit")]
    autocommit: bool,
}

fn default_autocommit() -> bool {
    true
}

// -----------------------------------------------------------------------------
// ----- Internal: Validation --------------------------------------------------

fn validate_server(section: &'static str, entry: &ServerFileEntry) -> Result<(), PoolsError> {
    let invalid = |field: &'static str| PoolsError::InvalidField {
        section,
        name: entry.name.clone(),
        field,
    };

    if entry.name.trim().is_empty() {
        return Err(invalid("name"));
    }
    if entry.database.trim().is_empty() {
        return Err(invalid("database"));
    }
    if entry.host.trim().is_empty() {
        return Err(invalid("host"));
    }
    if entry.port == 0 {
        return Err(invalid("port"));
    }
    if entry.user.trim().is_empty() {
        return Err(invalid("user"));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PoolsError {
    #[error("pool file declares no [[masters]], [[slaves]] or [[connections]]")]
    EmptyConfig,

    #[error("duplicate [[masters]] entry for pool '{name}'")]
    DuplicateMaster { name: String },

    #[error("[[{section}]] entry '{name}': invalid or missing field '{field}'")]
    InvalidField {
        section: &'static str,
        name: String,
        field: &'static str,
    },

    #[error("[[connections]] entry '{name}' accepts neither reads nor writes")]
    NoCapability { name: String },

    #[error("'{field}' must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
