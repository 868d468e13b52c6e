//! SQLite database client implementation using sqlx.
//!
//! The database path comes from `database`, falling back to `server`.
//! `:memory:` opens a private in-memory database.

use super::sql_text::is_row_returning;
use super::{map_sqlx_error, ColumnInfo, DatabaseClient, Dialect, QueryResult, Row, Value};
use crate::config::ConnectionConfig;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// SQLite database client.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    /// Opens the database file named by `config`.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let dialect = Dialect::Sqlite;
        let path = config
            .field("database")
            .or_else(|| config.field("server"))
            .ok_or_else(|| ConfigError::RequiredFieldsMissing {
                fields: vec!["database".to_string()],
            })?;

        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| map_sqlx_error(dialect, e, dialect.test_query()))?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(config.option_bool("fileMustExist") != Some(true))
                .read_only(config.option_bool("readonly") == Some(true))
        };

        let busy_timeout = config
            .option_u64("timeout")
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        debug!("Opening SQLite database {}", path);
        // One connection keeps in-memory databases coherent across statements.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.busy_timeout(busy_timeout))
            .await
            .map_err(|e| map_sqlx_error(dialect, e, dialect.test_query()))?;

        sqlx::query(dialect.test_query())
            .execute(&pool)
            .await
            .map_err(|e| map_sqlx_error(dialect, e, dialect.test_query()))?;

        Ok(Self { pool })
    }

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
impl DatabaseClient for SqliteClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let dialect = Dialect::Sqlite;
        let start = Instant::now();

        if !is_row_returning(sql) {
            let done = sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(dialect, e, sql))?;
            return Ok(QueryResult::affected(done.rows_affected() as usize)
                .with_execution_time(start.elapsed()));
        }

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(dialect, e, sql))?;

        let execution_time = start.elapsed();

        let columns = match rows.first() {
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

fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// SQLite types are per value, so the declared name is only a hint.
fn convert_value(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "NULL" => Value::Null,

        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INTEGER" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .or_else(|| {
                row.try_get::<Option<i64>, _>(index)
                    .ok()
                    .flatten()
                    .map(Value::Int)
            })
            .or_else(|| {
                row.try_get::<Option<f64>, _>(index)
                    .ok()
                    .flatten()
                    .map(Value::Float)
            })
            .unwrap_or(Value::Null),
    }
}
