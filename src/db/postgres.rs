//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx.

use super::sql_text::is_row_returning;
use super::{
    map_sqlx_error, port_or_default, query_timeout, timeout_error, ColumnInfo, DatabaseClient,
    Dialect, QueryResult, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default statement timeout in seconds.
const QUERY_TIMEOUT_SECS: u64 = 300;

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresClient {
    /// Opens a pool for `config` and checks it with the test query. No retries.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let dialect = Dialect::Postgres;
        let mut options = PgConnectOptions::new()
            .host(config.field("server").unwrap_or("localhost"))
            .port(port_or_default(config, dialect))
            .username(config.field("user").unwrap_or_default())
            .password(config.field("password").unwrap_or_default());
        if let Some(database) = config.field("database") {
            options = options.database(database);
        }
        if config.option_bool("ssl") == Some(true) {
            options = options.ssl_mode(PgSslMode::Require);
        }

        let connect_timeout = config
            .option_u64("connectionTimeout")
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(CONNECT_TIMEOUT_SECS));

        debug!("Connecting to {}", config.display_string());
        let pool = PgPoolOptions::new()
            .max_connections(config.option_u64("max").unwrap_or(5) as u32)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error(dialect, e, dialect.test_query()))?;

        sqlx::query(dialect.test_query())
            .execute(&pool)
            .await
            .map_err(|e| map_sqlx_error(dialect, e, dialect.test_query()))?;

        Ok(Self {
            pool,
            query_timeout: query_timeout(config, QUERY_TIMEOUT_SECS),
        })
    }

    /// Creates a new PostgresClient from an existing connection pool.
    #[allow(dead_code)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
        }
    }

    /// Column metadata for a statement that produced no rows.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.pool).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!("Could not describe empty result: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let dialect = Dialect::Postgres;
        let start = Instant::now();

        if !is_row_returning(sql) {
            let done = tokio::time::timeout(self.query_timeout, sqlx::query(sql).execute(&self.pool))
                .await
                .map_err(|_| timeout_error(self.query_timeout, sql))?
                .map_err(|e| map_sqlx_error(dialect, e, sql))?;
            return Ok(QueryResult::affected(done.rows_affected() as usize)
                .with_execution_time(start.elapsed()));
        }

        let rows = tokio::time::timeout(self.query_timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| timeout_error(self.query_timeout, sql))?
            .map_err(|e| map_sqlx_error(dialect, e, sql))?;

        let execution_time = start.elapsed();

        let columns: Vec<ColumnInfo> = match rows.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.describe_columns(sql).await,
        };

        let rows: Vec<Row> = rows.iter().map(convert_row).collect();
        Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)
            .ok()
            .flatten()
            .map(|d| d.to_f64().map(Value::Float).unwrap_or_else(|| Value::String(d.to_string())))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // For all other types, try to get as string
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
