//! Oracle client implementation using the `oracle` crate (ODPI-C).
//!
//! The driver is blocking, so every call runs on tokio's blocking pool.

use super::sql_text::is_row_returning;
use super::{
    oracle_service, port_or_default, query_timeout, timeout_error, ColumnInfo, DatabaseClient,
    Dialect, QueryResult, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{ExecutionError, Result, SheetError};
use async_trait::async_trait;
use oracle::sql_type::OracleType;
use oracle::{Connection, SqlValue};
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::debug;

const QUERY_TIMEOUT_SECS: u64 = 300;

/// Oracle database client.
pub struct OracleClient {
    conn: Arc<Mutex<Option<Connection>>>,
    query_timeout: Duration,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Builds an EZConnect string unless a full connect string is configured.
fn connect_string(config: &ConnectionConfig) -> String {
    if let Some(full) = config.field("connectString") {
        return full.to_string();
    }
    let host = config.field("server").unwrap_or("localhost");
    let port = port_or_default(config, Dialect::Oracle);
    let service = oracle_service(config).unwrap_or_default();
    format!("//{host}:{port}/{service}")
}

impl OracleClient {
    /// Opens a session for `config` and checks it with the test query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let user = config.field("user").unwrap_or_default().to_string();
        let password = config.field("password").unwrap_or_default().to_string();
        let target = connect_string(config);
        let test_query = Dialect::Oracle.test_query();

        debug!("Connecting to Oracle at {}", target);
        let conn = blocking(move || {
            let mut conn = Connection::connect(&user, &password, &target)
                .map_err(|e| map_oracle_error(e, test_query))?;
            conn.set_autocommit(true);
            conn.query(test_query, &[])
                .and_then(|mut rows| rows.next().transpose())
                .map_err(|e| map_oracle_error(e, test_query))?;
            Ok(conn)
        })
        .await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            query_timeout: query_timeout(config, QUERY_TIMEOUT_SECS),
        })
    }

    async fn run(&self, sql: &str) -> Result<QueryResult> {
        let conn = Arc::clone(&self.conn);
        let statement = sql.to_string();
        let start = Instant::now();

        let result = blocking(move || {
            let sql = statement.as_str();
            let guard = conn.lock().map_err(|_| closed_error(sql))?;
            let conn = guard.as_ref().ok_or_else(|| closed_error(sql))?;

            if !is_row_returning(sql) {
                let count = conn
                    .execute(sql, &[])
                    .and_then(|stmt| stmt.row_count())
                    .map_err(|e| map_oracle_error(e, sql))?;
                return Ok(QueryResult::affected(count as usize));
            }

            let result_set = conn
                .query(sql, &[])
                .map_err(|e| map_oracle_error(e, sql))?;
            let columns: Vec<ColumnInfo> = result_set
                .column_info()
                .iter()
                .map(|c| ColumnInfo::new(c.name(), c.oracle_type().to_string()))
                .collect();

            let mut rows: Vec<Row> = Vec::new();
            for row in result_set {
                let row = row.map_err(|e| map_oracle_error(e, sql))?;
                rows.push(row.sql_values().iter().map(convert_value).collect());
            }
            Ok(QueryResult::with_data(columns, rows))
        })
        .await?;

        Ok(result.with_execution_time(start.elapsed()))
    }
}

#[async_trait]
impl DatabaseClient for OracleClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        tokio::time::timeout(self.query_timeout, self.run(sql))
            .await
            .map_err(|_| timeout_error(self.query_timeout, sql))?
    }

    async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        blocking(move || {
            let taken = conn.lock().map_err(|_| closed_error(""))?.take();
            if let Some(conn) = taken {
                conn.close().map_err(|e| map_oracle_error(e, ""))?;
            }
            Ok(())
        })
        .await
    }
}

fn closed_error(sql: &str) -> SheetError {
    ExecutionError::new(Some("ENOTOPEN".to_string()), "Connection is closed", sql).into()
}

/// Runs a driver call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SheetError::internal(format!("Oracle worker failed: {e}")))?
}

fn map_oracle_error(error: oracle::Error, sql: &str) -> SheetError {
    let message = error.to_string();
    ExecutionError::new(native_code(&message), message, sql).into()
}

/// First `ORA-nnnnn` / `DPI-nnnn` code in a driver message.
fn native_code(message: &str) -> Option<String> {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| Regex::new(r"\b(ORA|DPI)-\d{4,5}\b").expect("valid regex"))
        .find(message)
        .map(|m| m.as_str().to_string())
}

fn convert_value(value: &SqlValue) -> Value {
    if value.is_null().unwrap_or(true) {
        return Value::Null;
    }

    let typed = match value.oracle_type() {
        Ok(OracleType::Number(_, 0)) | Ok(OracleType::Int64) | Ok(OracleType::UInt64) => {
            value.get::<i64>().ok().map(Value::Int)
        }
        Ok(OracleType::Number(_, _))
        | Ok(OracleType::Float(_))
        | Ok(OracleType::BinaryDouble)
        | Ok(OracleType::BinaryFloat) => value.get::<f64>().ok().map(Value::Float),
        Ok(OracleType::Date) | Ok(OracleType::Timestamp(_)) => value
            .get::<chrono::NaiveDateTime>()
            .ok()
            .map(|v| Value::String(v.to_string())),
        Ok(OracleType::TimestampTZ(_)) | Ok(OracleType::TimestampLTZ(_)) => value
            .get::<chrono::DateTime<chrono::FixedOffset>>()
            .ok()
            .map(|v| Value::String(v.to_string())),
        Ok(OracleType::Raw(_)) | Ok(OracleType::BLOB) | Ok(OracleType::LongRaw) => {
            value.get::<Vec<u8>>().ok().map(Value::Bytes)
        }
        Ok(OracleType::Boolean) => value.get::<bool>().ok().map(Value::Bool),
        _ => None,
    };

    typed
        .or_else(|| value.get::<String>().ok().map(Value::String))
        .unwrap_or(Value::Null)
}
