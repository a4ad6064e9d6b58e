//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use harbor_engine::{EntityConfig, Scope};

/// Entity types served when `ENTITIES` is not set.
pub const DEFAULT_ENTITIES: &[&str] = &[
    "cases",
    "ciclcar",
    "fac",
    "far",
    "sp",
    "pwd",
    "senior_citizens",
    "partners",
    "service_deliveries",
    "staff_workload",
];

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; an in-memory remote is used when absent
    pub database_url: Option<String>,
    /// Remote connection pool size
    pub max_connections: u32,
    /// Directory for replica snapshots; kept in memory when absent
    pub data_dir: Option<PathBuf>,
    /// Entity types to serve
    pub entities: Vec<EntityConfig>,
    /// How often the remote is probed for reachability
    pub probe_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|n: &u32| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections)?,
            None => 10,
        };

        let data_dir = lookup("DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let entities = match lookup("ENTITIES") {
            Some(raw) => parse_entities(&raw)?,
            None => DEFAULT_ENTITIES
                .iter()
                .map(|name| EntityConfig::new(*name))
                .collect(),
        };

        let probe_secs: u64 = lookup("PROBE_INTERVAL_SECS")
            .unwrap_or_else(|| "15".to_string())
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidProbeInterval)?;
        if probe_secs == 0 {
            return Err(ConfigError::InvalidProbeInterval);
        }

        Ok(Self {
            host,
            port,
            database_url,
            max_connections,
            data_dir,
            entities,
            probe_interval: Duration::from_secs(probe_secs),
        })
    }
}

/// Parse a comma-separated list of `name[:table][@column=value]` entries.
///
/// The scope value is read as JSON when it parses, otherwise as a string.
pub fn parse_entities(raw: &str) -> Result<Vec<EntityConfig>, ConfigError> {
    let mut configs: Vec<EntityConfig> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (head, scope) = match entry.split_once('@') {
            Some((head, scope)) => (head, Some(scope)),
            None => (entry, None),
        };
        let (name, table) = match head.split_once(':') {
            Some((name, table)) => (name.trim(), Some(table.trim())),
            None => (head.trim(), None),
        };

        if name.is_empty() || table.is_some_and(str::is_empty) {
            return Err(ConfigError::InvalidEntity(entry.to_string()));
        }
        if configs.iter().any(|c| c.name == name) {
            return Err(ConfigError::InvalidEntity(format!("duplicate entity '{name}'")));
        }

        let mut config = EntityConfig::new(name);
        if let Some(table) = table {
            config = config.with_table(table);
        }
        if let Some(scope) = scope {
            let (column, value) = scope
                .split_once('=')
                .map(|(c, v)| (c.trim(), v.trim()))
                .filter(|(c, _)| !c.is_empty())
                .ok_or_else(|| ConfigError::InvalidEntity(entry.to_string()))?;
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            config = config.with_scope(Scope::new(column, value));
        }
        configs.push(config);
    }

    if configs.is_empty() {
        return Err(ConfigError::InvalidEntity(raw.to_string()));
    }
    Ok(configs)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid DB_MAX_CONNECTIONS value")]
    InvalidMaxConnections,

    #[error("Invalid PROBE_INTERVAL_SECS value")]
    InvalidProbeInterval,

    #[error("Invalid ENTITIES entry: {0}")]
    InvalidEntity(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert!(config.data_dir.is_none());
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.probe_interval, Duration::from_secs(15));
        assert_eq!(config.entities.len(), DEFAULT_ENTITIES.len());
        assert_eq!(config.entities[0].name, "cases");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(load(&[("PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            load(&[("PROBE_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidProbeInterval)
        ));
        assert!(matches!(
            load(&[("DB_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::InvalidMaxConnections)
        ));
    }

    #[test]
    fn blank_database_url_means_memory() {
        let config = load(&[("DATABASE_URL", "  "), ("DATA_DIR", "/var/lib/harbor")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/harbor")));
    }

    #[test]
    fn entity_list_with_tables_and_scopes() {
        let configs =
            parse_entities("cases, staff:staff_workload@office_id=4, fac@region=north").unwrap();
        assert_eq!(configs.len(), 3);

        assert_eq!(configs[0].name, "cases");
        assert_eq!(configs[0].table, "cases");
        assert!(configs[0].scope.is_none());

        assert_eq!(configs[1].name, "staff");
        assert_eq!(configs[1].table, "staff_workload");
        let scope = configs[1].scope.as_ref().unwrap();
        assert_eq!(scope.column, "office_id");
        assert_eq!(scope.value, json!(4));

        assert_eq!(configs[2].scope.as_ref().unwrap().value, json!("north"));
    }

    #[test]
    fn malformed_entities_are_rejected() {
        for raw in ["", ",", ":cases", "cases:", "cases@office", "cases@=1", "cases,cases"] {
            assert!(
                matches!(parse_entities(raw), Err(ConfigError::InvalidEntity(_))),
                "{raw:?} should be rejected"
            );
        }
    }
}
