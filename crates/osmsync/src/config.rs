//! Configuration management
//!
//! Values come from the environment (optionally seeded from a `.env` file) and
//! fall back to the defaults below. Everything that varies per invocation,
//! such as the project id or the replication url, is a CLI argument instead.

use crate::error::{SyncError, SyncResult};
use crate::storage::config::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Defaults
// ============================================================================

/// Local directory for diffs, scripts and expire lists.
pub const DEFAULT_WORK_DIR: &str = "/tmp";

pub const DEFAULT_OSM2PGSQL_PATH: &str = "osm2pgsql";
pub const DEFAULT_OSM2PGSQL_CACHE_MB: u32 = 2500;
pub const DEFAULT_OSM2PGSQL_PROCESSES: u32 = 2;
pub const DEFAULT_OSM2PGSQL_OUTPUT: &str = "flex";
pub const DEFAULT_OSM2PGSQL_LOG_LEVEL: &str = "info";

pub const DEFAULT_OSMIUM_PATH: &str = "osmium";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_HTTP_USER_AGENT: &str = concat!("osmsync/", env!("CARGO_PKG_VERSION"));

/// Schema pg-boss was installed into.
pub const DEFAULT_PGBOSS_SCHEMA: &str = "pgboss";

pub const DEFAULT_QUEUE_MAX_CONNECTIONS: u32 = 5;

const OSM2PGSQL_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub work_dir: PathBuf,
    pub osm2pgsql: Osm2pgsqlConfig,
    pub osmium: OsmiumConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub queue: QueueConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Osm2pgsqlConfig {
    pub path: PathBuf,
    pub slim: bool,
    pub cache_mb: u32,
    pub processes: u32,
    pub output: String,
    pub log_level: String,
    pub log_progress: bool,
    pub middle_schema: Option<String>,
    pub schema: Option<String>,
    /// Ask osm2pgsql for expired tiles and hand them to the upload targets
    pub generate_expire_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmiumConfig {
    pub path: PathBuf,
    pub verbose: bool,
    pub progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// pg-boss connection settings; the queue itself is selected on the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub database_url: Option<String>,
    pub schema: String,
    pub max_connections: u32,
}

/// Advisory locking of projects; without a database url a single writer is assumed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    pub database_url: Option<String>,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> SyncResult<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            work_dir: PathBuf::from(env_string("OSMSYNC_WORK_DIR", DEFAULT_WORK_DIR)),
            osm2pgsql: Osm2pgsqlConfig {
                path: PathBuf::from(env_string("OSM2PGSQL_PATH", DEFAULT_OSM2PGSQL_PATH)),
                slim: env_parse("OSM2PGSQL_SLIM", false),
                cache_mb: env_parse("OSM2PGSQL_CACHE", DEFAULT_OSM2PGSQL_CACHE_MB),
                processes: env_parse("OSM2PGSQL_PROCESSES", DEFAULT_OSM2PGSQL_PROCESSES),
                output: env_string("OSM2PGSQL_OUTPUT", DEFAULT_OSM2PGSQL_OUTPUT),
                log_level: env_string("OSM2PGSQL_LOG_LEVEL", DEFAULT_OSM2PGSQL_LOG_LEVEL),
                log_progress: env_parse("OSM2PGSQL_LOG_PROGRESS", false),
                middle_schema: env_optional("OSM2PGSQL_MIDDLE_SCHEMA"),
                schema: env_optional("OSM2PGSQL_SCHEMA"),
                generate_expire_output: env_parse("OSM2PGSQL_GENERATE_EXPIRE_OUTPUT", true),
            },
            osmium: OsmiumConfig {
                path: PathBuf::from(env_string("OSMIUM_PATH", DEFAULT_OSMIUM_PATH)),
                verbose: env_parse("OSMIUM_VERBOSE", false),
                progress: env_parse("OSMIUM_PROGRESS", false),
            },
            storage: StorageConfig::from_env()?,
            http: HttpConfig {
                timeout_secs: env_parse("HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT_SECS),
                user_agent: env_string("HTTP_USER_AGENT", DEFAULT_HTTP_USER_AGENT),
            },
            queue: QueueConfig {
                database_url: env_optional("PGBOSS_DATABASE_URL"),
                schema: env_string("PGBOSS_SCHEMA", DEFAULT_PGBOSS_SCHEMA),
                max_connections: env_parse("PGBOSS_MAX_CONNECTIONS", DEFAULT_QUEUE_MAX_CONNECTIONS),
            },
            lock: LockConfig {
                database_url: env_optional("OSMSYNC_LOCK_DATABASE_URL"),
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(SyncError::config("work directory cannot be empty"));
        }

        if self.osm2pgsql.cache_mb == 0 {
            return Err(SyncError::config("osm2pgsql cache must be greater than 0"));
        }

        if self.osm2pgsql.processes == 0 {
            return Err(SyncError::config("osm2pgsql processes must be greater than 0"));
        }

        if self.osm2pgsql.output.is_empty() {
            return Err(SyncError::config("osm2pgsql output cannot be empty"));
        }

        if !OSM2PGSQL_LOG_LEVELS.contains(&self.osm2pgsql.log_level.as_str()) {
            return Err(SyncError::config(format!(
                "osm2pgsql log level '{}' must be one of {}",
                self.osm2pgsql.log_level,
                OSM2PGSQL_LOG_LEVELS.join(", ")
            )));
        }

        if self.storage.bucket.is_empty() {
            return Err(SyncError::config("S3 bucket cannot be empty"));
        }

        if self.http.timeout_secs == 0 {
            return Err(SyncError::config("HTTP timeout must be greater than 0"));
        }

        if self.queue.max_connections == 0 {
            return Err(SyncError::config("queue max_connections must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            osm2pgsql: Osm2pgsqlConfig {
                path: PathBuf::from(DEFAULT_OSM2PGSQL_PATH),
                slim: false,
                cache_mb: DEFAULT_OSM2PGSQL_CACHE_MB,
                processes: DEFAULT_OSM2PGSQL_PROCESSES,
                output: DEFAULT_OSM2PGSQL_OUTPUT.to_string(),
                log_level: DEFAULT_OSM2PGSQL_LOG_LEVEL.to_string(),
                log_progress: false,
                middle_schema: None,
                schema: None,
                generate_expire_output: true,
            },
            osmium: OsmiumConfig {
                path: PathBuf::from(DEFAULT_OSMIUM_PATH),
                verbose: false,
                progress: false,
            },
            storage: StorageConfig::default(),
            http: HttpConfig {
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                user_agent: DEFAULT_HTTP_USER_AGENT.to_string(),
            },
            queue: QueueConfig {
                database_url: None,
                schema: DEFAULT_PGBOSS_SCHEMA.to_string(),
                max_connections: DEFAULT_QUEUE_MAX_CONNECTIONS,
            },
            lock: LockConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_osm2pgsql_log_level() {
        let mut config = Config::default();
        config.osm2pgsql.log_level = "chatty".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chatty"));
    }

    #[test]
    fn test_rejects_zero_processes() {
        let mut config = Config::default();
        config.osm2pgsql.processes = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}
