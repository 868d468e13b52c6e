//! Connection configuration for db-sheets.
//!
//! Handles loading the connection-config store (a map from connection key to
//! [`ConnectionConfig`]) from JSON or TOML files. The store is loaded once and
//! treated as immutable for the rest of the run.

use crate::error::{ConfigError, Result, SheetError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use url::Url;

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Vendor type string (`mssql`, `pg`, `sqlite3`, ...). Defaults to `mssql`.
    #[serde(rename = "type", default)]
    pub db_type: Option<String>,

    /// Server host. For the file-based vendor this may hold the file path.
    pub server: Option<String>,

    /// Server port.
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<i64>,

    /// Database name, or the file path for the file-based vendor.
    pub database: Option<String>,

    /// Database user.
    pub user: Option<String>,

    /// Database password.
    pub password: Option<String>,

    /// Oracle service name.
    pub service_name: Option<String>,

    /// Oracle SID.
    pub sid: Option<String>,

    /// Oracle full connect string (overrides host/port/service).
    pub connect_string: Option<String>,

    /// Vendor-specific options bag.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Ports show up both as numbers and as numeric strings in hand-written stores.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port: {n}"))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid port: {s}"))),
        Some(other) => Err(D::Error::custom(format!("invalid port: {other}"))),
    }
}

impl ConnectionConfig {
    /// Creates a new connection config from a connection URL.
    ///
    /// Format: `<scheme>://user:pass@host:port/database`, or `sqlite://<path>`.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let url = Url::parse(conn_str)
            .map_err(|e| ConfigError::InvalidStore(format!("Invalid connection string: {e}")))?;

        let scheme = url.scheme().to_lowercase();
        if crate::db::Dialect::parse(&scheme).is_none() {
            return Err(ConfigError::UnsupportedVendor { vendor: scheme }.into());
        }

        if scheme.starts_with("sqlite") {
            let path = conn_str
                .split_once("://")
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default();
            return Ok(Self {
                db_type: Some(scheme),
                database: Some(if path.is_empty() { ":memory:".into() } else { path }),
                ..Default::default()
            });
        }

        let user = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };

        Ok(Self {
            db_type: Some(scheme),
            server: url.host_str().map(String::from),
            port: url.port().map(i64::from),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|p| !p.is_empty())
                .map(String::from),
            user,
            password: url.password().map(String::from),
            ..Default::default()
        })
    }

    /// Returns the named field if it is present and non-empty.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "type" => self.db_type.as_deref(),
            "server" => self.server.as_deref(),
            "database" => self.database.as_deref(),
            "user" => self.user.as_deref(),
            "password" => self.password.as_deref(),
            "serviceName" => self.service_name.as_deref(),
            "sid" => self.sid.as_deref(),
            "connectString" => self.connect_string.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }

    /// Vendor type string, defaulting to `mssql` like historical stores expect.
    pub fn vendor(&self) -> &str {
        self.field("type").unwrap_or("mssql")
    }

    /// Reads a boolean from the options bag.
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| match v {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    /// Reads an unsigned integer from the options bag.
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    /// Returns a display-safe string (no password) for log output.
    pub fn display_string(&self) -> String {
        let host = self.field("server").unwrap_or("localhost");
        let database = self.field("database").unwrap_or("unknown");
        match self.port {
            Some(port) => format!("{database} @ {host}:{port}"),
            None => format!("{database} @ {host}"),
        }
    }
}

/// The connection-config store: connection key to [`ConnectionConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStore {
    connections: BTreeMap<String, ConnectionConfig>,
}

impl ConnectionStore {
    /// Builds a store from already-parsed entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, ConnectionConfig)>) -> Self {
        Self {
            connections: entries.into_iter().collect(),
        }
    }

    /// Returns the default store path (`config/dbinfo.json` under the working directory).
    pub fn default_path() -> PathBuf {
        PathBuf::from("config").join("dbinfo.json")
    }

    /// Loads the store from a JSON or TOML file (chosen by extension).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SheetError::io(format!(
                "Connection config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SheetError::io(format!("Failed to read config file: {e}")))?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let value: serde_json::Value = if is_toml {
            let table: toml::Value = toml::from_str(&content).map_err(|e| {
                ConfigError::InvalidStore(format!("{}:\n  {}", path.display(), e))
            })?;
            serde_json::to_value(table)
                .map_err(|e| ConfigError::InvalidStore(format!("{}: {}", path.display(), e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| ConfigError::InvalidStore(format!("{}: {}", path.display(), e)))?
        };

        Self::from_value(value)
    }

    /// Parses a store from a JSON value. The top level must be an object of objects;
    /// a single `dbs` wrapper key is unwrapped.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut top) = value else {
            return Err(ConfigError::InvalidStore("top level must be an object".into()).into());
        };

        if top.len() == 1 {
            if let Some(serde_json::Value::Object(inner)) = top.get("dbs") {
                if inner.values().all(|v| v.is_object()) {
                    let inner = inner.clone();
                    top = inner;
                }
            }
        }

        let mut connections = BTreeMap::new();
        for (key, entry) in top {
            if !entry.is_object() {
                return Err(ConfigError::InvalidStore(format!(
                    "connection '{key}' must be an object"
                ))
                .into());
            }
            let config: ConnectionConfig = serde_json::from_value(entry)
                .map_err(|e| ConfigError::InvalidStore(format!("connection '{key}': {e}")))?;
            connections.insert(key, config);
        }

        Ok(Self { connections })
    }

    /// Gets a connection by key.
    pub fn get(&self, key: &str) -> Option<&ConnectionConfig> {
        self.connections.get(key)
    }

    /// Iterates connections in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConnectionConfig)> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
