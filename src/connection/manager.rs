//! Connection manager for one pipeline run.
//!
//! Resolves connection keys against the connection-config store, creates one
//! adapter per dialect through the factory, and caches connections inside
//! those adapters. Dynamic variables and sheets share the same manager, so a
//! key connects at most once per run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConnectionConfig, ConnectionStore};
use crate::db::{
    create_adapter_with, validate_config, ConnectionHandle, Connector, DatabaseAdapter, Dialect,
    DriverConnector, Language, QueryResult,
};
use crate::error::{ConfigError, Result, SheetError};
use tracing::{info, warn};

/// A live connection: the dialect whose adapter owns it, plus the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    pub dialect: Dialect,
    pub handle: ConnectionHandle,
}

impl ActiveConnection {
    /// Connection key.
    pub fn key(&self) -> &str {
        self.handle.key()
    }
}

/// Outcome of testing one configured connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub key: String,
    /// Connection summary without credentials.
    pub target: String,
    /// `Err` carries the language-aware failure message.
    pub outcome: std::result::Result<(), String>,
}

impl ConnectionCheck {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Owns the adapters (and through them, every connection) of a run.
pub struct ConnectionManager {
    store: ConnectionStore,
    language: Language,
    connector: Arc<dyn Connector>,
    adapters: HashMap<Dialect, DatabaseAdapter>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.store.len())
            .field("adapters", &self.adapters.values().collect::<Vec<_>>())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager backed by the real vendor drivers.
    pub fn new(store: ConnectionStore, language: Language) -> Self {
        Self::with_connector(store, language, Arc::new(DriverConnector))
    }

    /// Creates a manager with an explicit connector.
    pub fn with_connector(
        store: ConnectionStore,
        language: Language,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            store,
            language,
            connector,
            adapters: HashMap::new(),
        }
    }

    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Looks up `key` and validates its config for the declared vendor.
    pub fn resolve(&self, key: &str) -> Result<(Dialect, &ConnectionConfig)> {
        let config = self.store.get(key).ok_or_else(|| ConfigError::ConfigMissing {
            key: key.to_string(),
        })?;
        let vendor = config.vendor();
        let dialect = Dialect::parse(vendor).ok_or_else(|| ConfigError::UnsupportedVendor {
            vendor: vendor.to_string(),
        })?;
        validate_config(vendor, config)?;
        Ok((dialect, config))
    }

    /// Connects to `key`, reusing the cached connection when there is one.
    pub async fn connect(&mut self, key: &str) -> Result<ActiveConnection> {
        let (dialect, config) = self.resolve(key)?;
        let config = config.clone();

        if !self.adapters.contains_key(&dialect) {
            let adapter = create_adapter_with(
                config.vendor(),
                &config,
                self.language,
                Arc::clone(&self.connector),
            )?;
            self.adapters.insert(dialect, adapter);
        }

        let adapter = self
            .adapters
            .get_mut(&dialect)
            .ok_or_else(|| SheetError::internal(format!("no adapter for {dialect}")))?;
        let handle = adapter.create_connection(Some(&config), key).await?;
        Ok(ActiveConnection { dialect, handle })
    }

    /// Adapter for a dialect, if one has been created this run.
    pub fn adapter(&self, dialect: Dialect) -> Option<&DatabaseAdapter> {
        self.adapters.get(&dialect)
    }

    /// Executes `sql` as-is on an open connection.
    pub async fn execute(&self, conn: &ActiveConnection, sql: &str) -> Result<QueryResult> {
        let adapter = self
            .adapter(conn.dialect)
            .ok_or_else(|| SheetError::internal(format!("no adapter for {}", conn.dialect)))?;
        adapter.execute(&conn.handle, sql).await
    }

    /// Connects to `key`, rewrites the current-time marker, and executes.
    pub async fn run(&mut self, key: &str, sql: &str) -> Result<QueryResult> {
        let conn = self.connect(key).await?;
        let sql = conn.dialect.substitute_current_timestamp(sql);
        self.execute(&conn, &sql).await
    }

    /// One-line, language-aware description of an error raised for `key`.
    pub fn describe_error(&self, key: &str, error: &SheetError) -> String {
        match error {
            SheetError::Execution(e) => self
                .store
                .get(key)
                .and_then(|c| Dialect::parse(c.vendor()))
                .and_then(|d| self.adapter(d))
                .map(|a| a.classify_error(e))
                .unwrap_or_else(|| e.to_string()),
            other => other.to_string(),
        }
    }

    /// Connects to every configured key in order and runs the dialect's test
    /// query. Connections are closed afterwards.
    pub async fn check_all(&mut self) -> Vec<ConnectionCheck> {
        let mut keys: Vec<String> = self.store.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();

        let mut checks = Vec::with_capacity(keys.len());
        for key in keys {
            let target = self
                .store
                .get(&key)
                .map(ConnectionConfig::display_string)
                .unwrap_or_default();
            let dialect = self.resolve(&key).map(|(dialect, _)| dialect);
            let outcome = match dialect {
                Ok(dialect) => self.run(&key, dialect.test_query()).await.map(|_| ()),
                Err(e) => Err(e),
            };
            let outcome = outcome.map_err(|e| self.describe_error(&key, &e));
            match &outcome {
                Ok(()) => info!("{}: connected ({})", key, target),
                Err(message) => warn!("{}: connection failed - {}", key, message),
            }
            checks.push(ConnectionCheck {
                key,
                target,
                outcome,
            });
        }

        self.close_all().await;
        checks
    }

    /// Keys of every open connection, across all adapters.
    pub fn open_connections(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .adapters
            .values()
            .flat_map(|a| a.connection_keys())
            .collect();
        keys.sort();
        keys
    }

    /// Closes every adapter's connections. Safe to call more than once.
    pub async fn close_all(&mut self) {
        let mut dialects: Vec<Dialect> = self.adapters.keys().copied().collect();
        dialects.sort_by_key(|d| d.as_str());
        for dialect in dialects {
            if let Some(adapter) = self.adapters.get_mut(&dialect) {
                adapter.close_all().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockConnector, MockResponse};
    use crate::error::ErrorClass;
    use serde_json::json;

    fn store() -> ConnectionStore {
        ConnectionStore::from_value(json!({
            "main": { "type": "pg", "server": "db", "database": "app", "user": "u", "password": "p" },
            "sales": { "type": "postgresql", "server": "db2", "database": "sales", "user": "u", "password": "p" },
            "local": { "type": "sqlite", "database": ":memory:" },
            "broken": { "type": "mysql", "server": "db" },
            "odd": { "type": "db2", "server": "db" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_reuses_adapter_and_connection() {
        let connector = Arc::new(MockConnector::new());
        let mut manager = ConnectionManager::with_connector(store(), Language::En, connector.clone());

        let a = manager.connect("main").await.unwrap();
        let b = manager.connect("main").await.unwrap();
        let c = manager.connect("sales").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.dialect, c.dialect);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(manager.open_connections(), vec!["main", "sales"]);
    }

    #[tokio::test]
    async fn test_config_errors() {
        let mut manager =
            ConnectionManager::with_connector(store(), Language::En, Arc::new(MockConnector::new()));

        assert!(matches!(
            manager.connect("nope").await,
            Err(SheetError::Config(ConfigError::ConfigMissing { .. }))
        ));
        assert!(matches!(
            manager.connect("odd").await,
            Err(SheetError::Config(ConfigError::UnsupportedVendor { .. }))
        ));
        match manager.connect("broken").await {
            Err(SheetError::Config(ConfigError::RequiredFieldsMissing { fields })) => {
                assert_eq!(fields, vec!["database", "user", "password"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_rewrites_timestamp_marker() {
        let connector = Arc::new(MockConnector::new());
        let mut manager = ConnectionManager::with_connector(store(), Language::En, connector.clone());

        manager.run("main", "SELECT GETDATE()").await.unwrap();
        assert_eq!(connector.executed(), vec!["SELECT NOW()"]);
    }

    #[tokio::test]
    async fn test_describe_error_uses_dialect_classifier() {
        let connector = Arc::new(MockConnector::new().respond(
            "bad",
            MockResponse::Error {
                code: Some("3D000".into()),
                message: "database \"nope\" does not exist".into(),
            },
        ));
        let mut manager = ConnectionManager::with_connector(store(), Language::En, connector);

        let err = manager.run("main", "SELECT bad").await.unwrap_err();
        match &err {
            SheetError::Execution(e) => assert_eq!(e.class, ErrorClass::UnknownSchema),
            other => panic!("unexpected {other:?}"),
        }
        let message = manager.describe_error("main", &err);
        assert_eq!(message, "Database error: Check database name.");
    }

    #[tokio::test]
    async fn test_check_all_reports_each_key() {
        let connector = Arc::new(MockConnector::new());
        let mut manager = ConnectionManager::with_connector(store(), Language::En, connector.clone());

        let checks = manager.check_all().await;
        let summary: Vec<(&str, bool)> = checks.iter().map(|c| (c.key.as_str(), c.is_ok())).collect();
        assert_eq!(
            summary,
            vec![
                ("broken", false),
                ("local", true),
                ("main", true),
                ("odd", false),
                ("sales", true)
            ]
        );
        assert!(connector.executed().iter().all(|sql| sql == "SELECT 1 AS test"));
        assert!(manager.open_connections().is_empty());
        assert_eq!(connector.close_count(), 3);
    }

    #[tokio::test]
    async fn test_close_all_closes_each_connection_once() {
        let connector = Arc::new(MockConnector::new());
        let mut manager = ConnectionManager::with_connector(store(), Language::En, connector.clone());
        manager.connect("main").await.unwrap();
        manager.connect("local").await.unwrap();

        manager.close_all().await;
        manager.close_all().await;
        assert_eq!(connector.close_count(), 2);
        assert!(manager.open_connections().is_empty());
    }
}
