//! Database abstraction layer for db-sheets.
//!
//! Vendor differences live behind a fixed set of [`Dialect`] variants. Each
//! dialect owns the handful of text-level operations that genuinely differ
//! between vendors (row limiting, current-time substitution, config checks,
//! error classification) while live connections are cached per key inside a
//! [`DatabaseAdapter`].

mod classify;
mod mock;
mod mssql;
mod mysql;
mod oracle;
mod postgres;
pub mod sql_text;
mod sqlite;
mod types;

pub use classify::{map_sqlx_error, Language};
pub use mock::{MockConnector, MockDatabaseClient, MockResponse};
pub use mssql::MssqlClient;
pub use mysql::MySqlClient;
pub use oracle::OracleClient;
pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::{ConfigError, ExecutionError, Result, SheetError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    SqlServer,
    MySql,
    Postgres,
    Oracle,
    Sqlite,
}

impl Dialect {
    /// All dialects, in alias-table order.
    pub const ALL: [Dialect; 5] = [
        Self::SqlServer,
        Self::MySql,
        Self::Postgres,
        Self::Oracle,
        Self::Sqlite,
    ];

    /// Returns the canonical vendor string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlServer => "mssql",
            Self::MySql => "mysql",
            Self::Postgres => "postgresql",
            Self::Oracle => "oracle",
            Self::Sqlite => "sqlite",
        }
    }

    /// Human-readable vendor name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SqlServer => "Microsoft SQL Server",
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Oracle => "Oracle",
            Self::Sqlite => "SQLite",
        }
    }

    /// Parses a vendor type string (case-insensitive, aliased).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mssql" | "sqlserver" => Some(Self::SqlServer),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgresql" | "postgres" | "pg" => Some(Self::Postgres),
            "oracle" | "oracledb" => Some(Self::Oracle),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this dialect. The file-based engine has none.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::SqlServer => Some(1433),
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Oracle => Some(1521),
            Self::Sqlite => None,
        }
    }

    /// True for the file-based engine.
    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Statement used to check a connection is usable.
    pub fn test_query(&self) -> &'static str {
        match self {
            Self::Oracle => "SELECT 1 FROM dual",
            _ => "SELECT 1 AS test",
        }
    }

    /// Injects the dialect's row-limiting clause unless one is already present.
    ///
    /// A missing or non-positive `max_rows` leaves the SQL untouched.
    pub fn add_row_limit(&self, sql: &str, max_rows: Option<i64>) -> String {
        let Some(n) = max_rows.filter(|n| *n > 0) else {
            return sql.to_string();
        };

        if limit_pattern(*self).is_match(sql) {
            return sql.to_string();
        }

        match self {
            Self::SqlServer => {
                static SELECT: OnceLock<Regex> = OnceLock::new();
                let re = SELECT
                    .get_or_init(|| Regex::new(r"(?i)^\s*SELECT\s+").expect("valid regex"));
                re.replace(sql, format!("SELECT TOP {n} ").as_str())
                    .into_owned()
            }
            Self::Oracle => format!("{} FETCH FIRST {n} ROWS ONLY", sql_text::trim_statement(sql)),
            Self::MySql | Self::Postgres | Self::Sqlite => {
                format!("{} LIMIT {n}", sql_text::trim_statement(sql))
            }
        }
    }

    /// Replaces the vendor-neutral `GETDATE()` marker with the native current-time
    /// expression.
    pub fn substitute_current_timestamp(&self, sql: &str) -> String {
        let replacement = match self {
            Self::SqlServer => sql_text::timestamp_literal(chrono::Utc::now()),
            Self::MySql | Self::Postgres => "NOW()".to_string(),
            Self::Oracle => "SYSTIMESTAMP".to_string(),
            Self::Sqlite => "datetime('now')".to_string(),
        };
        sql_text::current_timestamp_marker()
            .replace_all(sql, regex::NoExpand(&replacement))
            .into_owned()
    }

    /// Per-vendor required-field check.
    pub fn validate_config(&self, config: &ConnectionConfig) -> bool {
        match self {
            Self::Sqlite => config.field("database").is_some() || config.field("server").is_some(),
            Self::Oracle => {
                ["server", "user", "password"]
                    .iter()
                    .all(|f| config.field(f).is_some())
                    && oracle_service(config).is_some()
            }
            _ => ["server", "database", "user", "password"]
                .iter()
                .all(|f| config.field(f).is_some()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects the dialect's own limiting keyword, case-insensitively.
fn limit_pattern(dialect: Dialect) -> &'static Regex {
    static TOP: OnceLock<Regex> = OnceLock::new();
    static LIMIT: OnceLock<Regex> = OnceLock::new();
    static FETCH: OnceLock<Regex> = OnceLock::new();
    match dialect {
        Dialect::SqlServer => TOP.get_or_init(|| Regex::new(r"(?i)\bTOP\s").expect("valid regex")),
        Dialect::Oracle => FETCH.get_or_init(|| {
            Regex::new(r"(?i)\bFETCH\s+FIRST\b|\bROWNUM\b").expect("valid regex")
        }),
        _ => LIMIT.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s").expect("valid regex")),
    }
}

/// Oracle accepts a service name, SID, database, or full connect string.
pub(crate) fn oracle_service(config: &ConnectionConfig) -> Option<&str> {
    config
        .field("connectString")
        .or_else(|| config.field("serviceName"))
        .or_else(|| config.field("sid"))
        .or_else(|| config.field("database"))
}

/// Configured port, or the dialect default.
pub(crate) fn port_or_default(config: &ConnectionConfig, dialect: Dialect) -> u16 {
    config
        .port
        .and_then(|p| u16::try_from(p).ok())
        .or(dialect.default_port())
        .unwrap_or_default()
}

/// Statement timeout from the `requestTimeout` option (milliseconds).
pub(crate) fn query_timeout(config: &ConnectionConfig, default_secs: u64) -> Duration {
    config
        .option_u64("requestTimeout")
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(default_secs))
}

/// Execution error raised when a statement exceeds its timeout.
pub(crate) fn timeout_error(limit: Duration, sql: &str) -> SheetError {
    ExecutionError::new(
        Some("ETIMEOUT".to_string()),
        format!("Query timed out after {} seconds", limit.as_secs()),
        sql,
    )
    .into()
}

/// Validates a connection config for a declared vendor type.
///
/// Returns `Ok(true)` when valid; otherwise fails with the exact missing field
/// names or an out-of-range port.
pub fn validate_config(vendor_type: &str, config: &ConnectionConfig) -> Result<bool> {
    let dialect = Dialect::parse(vendor_type).ok_or_else(|| ConfigError::UnsupportedVendor {
        vendor: vendor_type.to_string(),
    })?;

    if dialect.is_file_based() {
        if config.field("database").is_none() && config.field("server").is_none() {
            return Err(ConfigError::RequiredFieldsMissing {
                fields: vec!["database".to_string()],
            }
            .into());
        }
        return Ok(true);
    }

    let missing: Vec<String> = ["server", "database", "user", "password"]
        .iter()
        .filter(|f| match **f {
            "database" if dialect == Dialect::Oracle => oracle_service(config).is_none(),
            other => config.field(other).is_none(),
        })
        .map(|f| f.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(ConfigError::RequiredFieldsMissing { fields: missing }.into());
    }

    if let Some(port) = config.port {
        if !(1..=65535).contains(&port) {
            return Err(ConfigError::PortOutOfRange { port }.into());
        }
    }

    Ok(true)
}

/// Creates an adapter for the declared vendor type after validating `config`.
pub fn create_adapter(
    vendor_type: &str,
    config: &ConnectionConfig,
    language: Language,
) -> Result<DatabaseAdapter> {
    create_adapter_with(vendor_type, config, language, Arc::new(DriverConnector))
}

/// Like [`create_adapter`], with an explicit connector (used by tests).
pub fn create_adapter_with(
    vendor_type: &str,
    config: &ConnectionConfig,
    language: Language,
    connector: Arc<dyn Connector>,
) -> Result<DatabaseAdapter> {
    let dialect = Dialect::parse(vendor_type).ok_or_else(|| ConfigError::UnsupportedVendor {
        vendor: vendor_type.to_string(),
    })?;
    validate_config(vendor_type, config)?;
    Ok(DatabaseAdapter::new(dialect, language, connector))
}

/// Trait defining the interface for a live database connection.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a SQL statement and returns the normalized result.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Closes the connection. Must tolerate being called more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens vendor connections. Swappable so the pipeline can run against mocks.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        dialect: Dialect,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn DatabaseClient>>;
}

/// Connector backed by the real vendor drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        dialect: Dialect,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn DatabaseClient>> {
        match dialect {
            Dialect::SqlServer => Ok(Box::new(MssqlClient::connect(config).await?)),
            Dialect::MySql => Ok(Box::new(MySqlClient::connect(config).await?)),
            Dialect::Postgres => Ok(Box::new(PostgresClient::connect(config).await?)),
            Dialect::Oracle => Ok(Box::new(OracleClient::connect(config).await?)),
            Dialect::Sqlite => Ok(Box::new(SqliteClient::connect(config).await?)),
        }
    }
}

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a cached connection. Only usable with the adapter that
/// created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    adapter_id: u64,
    key: String,
}

impl ConnectionHandle {
    /// The connection key this handle was created for.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A dialect plus its cache of live connections, keyed by connection name.
pub struct DatabaseAdapter {
    id: u64,
    dialect: Dialect,
    language: Language,
    connector: Arc<dyn Connector>,
    connections: HashMap<String, Box<dyn DatabaseClient>>,
}

impl fmt::Debug for DatabaseAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseAdapter")
            .field("dialect", &self.dialect)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DatabaseAdapter {
    /// Creates an adapter with no open connections.
    pub fn new(dialect: Dialect, language: Language, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            dialect,
            language,
            connector,
            connections: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Opens (or reuses) the connection cached under `key`.
    ///
    /// Idempotent per key. Fails with `ConfigMissing` when no config is given for a
    /// key that is not yet connected. Connect failures propagate without retry.
    pub async fn create_connection(
        &mut self,
        config: Option<&ConnectionConfig>,
        key: &str,
    ) -> Result<ConnectionHandle> {
        if !self.connections.contains_key(key) {
            let config = config.ok_or_else(|| ConfigError::ConfigMissing {
                key: key.to_string(),
            })?;

            info!("[DB] {} connecting to database ({})", key, self.dialect);
            let client = self
                .connector
                .connect(self.dialect, config)
                .await
                .map_err(|e| self.classified(e))?;
            self.connections.insert(key.to_string(), client);
            info!("[DB] {} database connected", key);
        }

        Ok(ConnectionHandle {
            adapter_id: self.id,
            key: key.to_string(),
        })
    }

    /// Executes `sql` on the connection behind `handle`.
    pub async fn execute(&self, handle: &ConnectionHandle, sql: &str) -> Result<QueryResult> {
        let client = self.client(handle)?;
        debug!("[DB] {} executing {} bytes of SQL", handle.key, sql.len());
        client
            .execute_query(sql)
            .await
            .map_err(|e| self.classified(e))
    }

    /// Delegates to [`Dialect::add_row_limit`].
    pub fn add_row_limit(&self, sql: &str, max_rows: Option<i64>) -> String {
        self.dialect.add_row_limit(sql, max_rows)
    }

    /// Delegates to [`Dialect::substitute_current_timestamp`].
    pub fn substitute_current_timestamp(&self, sql: &str) -> String {
        self.dialect.substitute_current_timestamp(sql)
    }

    /// Delegates to [`Dialect::validate_config`].
    pub fn validate_config(&self, config: &ConnectionConfig) -> bool {
        self.dialect.validate_config(config)
    }

    /// Renders a classified error as one human-readable line.
    pub fn classify_error(&self, error: &ExecutionError) -> String {
        classify::describe(self.dialect, self.language, error)
    }

    /// True when a connection is cached under `key`.
    pub fn is_connected(&self, key: &str) -> bool {
        self.connections.contains_key(key)
    }

    /// Keys of every cached connection.
    pub fn connection_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.connections.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Closes the connection behind `handle`. Closing twice is a no-op.
    pub async fn close(&mut self, handle: &ConnectionHandle) -> Result<()> {
        self.check_owner(handle)?;
        if let Some(client) = self.connections.remove(&handle.key) {
            info!("[DB] {} closing database connection", handle.key);
            if let Err(e) = client.close().await {
                warn!("[DB] {} disconnect error: {}", handle.key, e);
            }
        }
        Ok(())
    }

    /// Closes every cached connection. Safe to call repeatedly.
    pub async fn close_all(&mut self) {
        let mut drained: Vec<(String, Box<dyn DatabaseClient>)> = self.connections.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, client) in drained {
            info!("[DB] {} closing database connection", key);
            if let Err(e) = client.close().await {
                warn!("[DB] {} disconnect error: {}", key, e);
            }
        }
    }

    fn check_owner(&self, handle: &ConnectionHandle) -> Result<()> {
        if handle.adapter_id != self.id {
            return Err(SheetError::internal(format!(
                "connection handle '{}' belongs to another adapter",
                handle.key
            )));
        }
        Ok(())
    }

    fn client(&self, handle: &ConnectionHandle) -> Result<&dyn DatabaseClient> {
        self.check_owner(handle)?;
        self.connections
            .get(&handle.key)
            .map(|c| c.as_ref())
            .ok_or_else(|| SheetError::internal(format!("connection '{}' is not open", handle.key)))
    }

    fn classified(&self, error: SheetError) -> SheetError {
        match error {
            SheetError::Execution(e) => {
                let class = classify::classify(self.dialect, &e);
                SheetError::Execution(e.with_class(class))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use pretty_assertions::assert_eq;

    fn full_config() -> ConnectionConfig {
        ConnectionConfig {
            server: Some("localhost".into()),
            database: Some("SampleDB".into()),
            user: Some("sa".into()),
            password: Some("pw".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Dialect::parse("MSSQL"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::parse("SqlServer"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::parse("mariadb"), Some(Dialect::MySql));
        assert_eq!(Dialect::parse("PG"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("postgres"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("sqlite3"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::parse("oracle"), Some(Dialect::Oracle));
        assert_eq!(Dialect::parse("db2"), None);
    }

    #[test]
    fn test_add_row_limit_top_style() {
        let d = Dialect::SqlServer;
        assert_eq!(
            d.add_row_limit("SELECT * FROM t", Some(10)),
            "SELECT TOP 10 * FROM t"
        );
        assert_eq!(
            d.add_row_limit("select top 5 * from t", Some(10)),
            "select top 5 * from t"
        );
    }

    #[test]
    fn test_add_row_limit_limit_style() {
        assert_eq!(
            Dialect::Postgres.add_row_limit("SELECT * FROM t;", Some(3)),
            "SELECT * FROM t LIMIT 3"
        );
        assert_eq!(
            Dialect::MySql.add_row_limit("SELECT * FROM t limit 1", Some(3)),
            "SELECT * FROM t limit 1"
        );
        assert_eq!(
            Dialect::Oracle.add_row_limit("SELECT * FROM t", Some(3)),
            "SELECT * FROM t FETCH FIRST 3 ROWS ONLY"
        );
        assert_eq!(
            Dialect::Oracle.add_row_limit("SELECT * FROM t WHERE ROWNUM <= 2", Some(3)),
            "SELECT * FROM t WHERE ROWNUM <= 2"
        );
    }

    #[test]
    fn test_add_row_limit_noop_without_positive_limit() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.add_row_limit("SELECT 1", None), "SELECT 1");
            assert_eq!(dialect.add_row_limit("SELECT 1", Some(0)), "SELECT 1");
            assert_eq!(dialect.add_row_limit("SELECT 1", Some(-4)), "SELECT 1");
        }
    }

    #[test]
    fn test_add_row_limit_is_idempotent() {
        let inputs = [
            "SELECT * FROM orders",
            "  select id from t order by id;",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "SELECT TOP 3 * FROM t",
            "SELECT * FROM t LIMIT 2",
            "SELECT * FROM t FETCH FIRST 2 ROWS ONLY",
            "",
        ];
        for dialect in Dialect::ALL {
            for sql in inputs {
                for n in [None, Some(0), Some(1), Some(500)] {
                    let once = dialect.add_row_limit(sql, n);
                    let twice = dialect.add_row_limit(&once, n);
                    assert_eq!(once, twice, "{dialect} {sql:?} {n:?}");
                }
            }
        }
    }

    #[test]
    fn test_substitute_current_timestamp() {
        let sql = "SELECT * FROM t WHERE d < GETDATE() AND e > getdate()";
        assert_eq!(
            Dialect::Postgres.substitute_current_timestamp(sql),
            "SELECT * FROM t WHERE d < NOW() AND e > NOW()"
        );
        assert_eq!(
            Dialect::Oracle.substitute_current_timestamp("SELECT GETDATE() FROM dual"),
            "SELECT SYSTIMESTAMP FROM dual"
        );
        assert_eq!(
            Dialect::Sqlite.substitute_current_timestamp("SELECT GETDATE()"),
            "SELECT datetime('now')"
        );
        let mssql = Dialect::SqlServer.substitute_current_timestamp("SELECT GETDATE()");
        assert!(mssql.starts_with("SELECT '"));
        assert!(!mssql.contains("GETDATE"));
    }

    #[test]
    fn test_validate_config_complete() {
        assert!(validate_config("mssql", &full_config()).unwrap());
    }

    #[test]
    fn test_validate_config_lists_exact_missing_fields() {
        let mut config = full_config();
        config.password = None;
        let err = validate_config("mssql", &config).unwrap_err();
        match err {
            SheetError::Config(ConfigError::RequiredFieldsMissing { fields }) => {
                assert_eq!(fields, vec!["password".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validate_config_port_range() {
        let mut config = full_config();
        config.port = Some(70000);
        assert!(matches!(
            validate_config("mysql", &config),
            Err(SheetError::Config(ConfigError::PortOutOfRange { port: 70000 }))
        ));
        config.port = Some(3306);
        assert!(validate_config("mysql", &config).unwrap());
    }

    #[test]
    fn test_validate_config_file_based_needs_path_only() {
        let config = ConnectionConfig {
            database: Some("data.db".into()),
            ..Default::default()
        };
        assert!(validate_config("sqlite", &config).unwrap());
        assert!(validate_config("sqlite", &ConnectionConfig::default()).is_err());
    }

    #[test]
    fn test_validate_config_oracle_service_name() {
        let config = ConnectionConfig {
            server: Some("ora".into()),
            user: Some("scott".into()),
            password: Some("tiger".into()),
            service_name: Some("ORCLPDB1".into()),
            ..Default::default()
        };
        assert!(validate_config("oracle", &config).unwrap());
        assert!(Dialect::Oracle.validate_config(&config));
        assert!(!Dialect::Postgres.validate_config(&config));
    }

    #[test]
    fn test_unsupported_vendor() {
        let err = create_adapter("db2", &full_config(), Language::En).unwrap_err();
        assert!(matches!(
            err,
            SheetError::Config(ConfigError::UnsupportedVendor { .. })
        ));
    }

    #[tokio::test]
    async fn test_connections_are_cached_per_key() {
        let connector = Arc::new(MockConnector::new());
        let mut adapter =
            create_adapter_with("pg", &full_config(), Language::En, connector.clone()).unwrap();
        let config = full_config();

        let a = adapter.create_connection(Some(&config), "main").await.unwrap();
        let b = adapter.create_connection(None, "main").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(connector.connect_count(), 1);

        let missing = adapter.create_connection(None, "other").await;
        assert!(matches!(
            missing,
            Err(SheetError::Config(ConfigError::ConfigMissing { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = Arc::new(MockConnector::new());
        let mut adapter = DatabaseAdapter::new(Dialect::Sqlite, Language::En, connector.clone());
        let handle = adapter
            .create_connection(Some(&full_config()), "main")
            .await
            .unwrap();

        adapter.close(&handle).await.unwrap();
        adapter.close(&handle).await.unwrap();
        adapter.close_all().await;
        adapter.close_all().await;
        assert!(!adapter.is_connected("main"));
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_handle_is_rejected() {
        let connector = Arc::new(MockConnector::new());
        let mut first = DatabaseAdapter::new(Dialect::MySql, Language::En, connector.clone());
        let mut second = DatabaseAdapter::new(Dialect::MySql, Language::En, connector);
        let handle = first
            .create_connection(Some(&full_config()), "main")
            .await
            .unwrap();
        second
            .create_connection(Some(&full_config()), "main")
            .await
            .unwrap();

        assert!(second.close(&handle).await.is_err());
        assert!(second.execute(&handle, "SELECT 1").await.is_err());
        assert!(second.is_connected("main"));
    }

    #[tokio::test]
    async fn test_execution_errors_are_classified() {
        let connector = Arc::new(MockConnector::new().respond(
            "SELECT broken",
            MockResponse::Error {
                code: Some("28P01".into()),
                message: "password authentication failed".into(),
            },
        ));
        let mut adapter = DatabaseAdapter::new(Dialect::Postgres, Language::En, connector);
        let handle = adapter
            .create_connection(Some(&full_config()), "main")
            .await
            .unwrap();

        let err = adapter.execute(&handle, "SELECT broken").await.unwrap_err();
        match err {
            SheetError::Execution(e) => {
                assert_eq!(e.class, ErrorClass::Auth);
                assert_eq!(e.sql, "SELECT broken");
                assert!(adapter.classify_error(&e).contains("authentication"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
