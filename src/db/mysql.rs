//! MySQL / MariaDB database client implementation using sqlx.

use super::sql_text::is_row_returning;
use super::{
    map_sqlx_error, port_or_default, query_timeout, timeout_error, ColumnInfo, DatabaseClient,
    Dialect, QueryResult, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::debug;

const QUERY_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// MySQL database client.
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
    query_timeout: Duration,
}

impl MySqlClient {
    /// Opens a pool for `config` and checks it with the test query. No retries.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let dialect = Dialect::MySql;
        let mut options = MySqlConnectOptions::new()
            .host(config.field("server").unwrap_or("localhost"))
            .port(port_or_default(config, dialect))
            .username(config.field("user").unwrap_or_default())
            .password(config.field("password").unwrap_or_default())
            .charset("utf8mb4");
        if let Some(database) = config.field("database") {
            options = options.database(database);
        }
        if config.option_bool("ssl") == Some(true) {
            options = options.ssl_mode(MySqlSslMode::Required);
        }

        let connect_timeout = config
            .option_u64("connectTimeout")
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(CONNECT_TIMEOUT_SECS));

        debug!("Connecting to {}", config.display_string());
        let pool = MySqlPoolOptions::new()
            .max_connections(config.option_u64("connectionLimit").unwrap_or(5) as u32)
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
impl DatabaseClient for MySqlClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let dialect = Dialect::MySql;
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

fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let upper = type_name.to_uppercase();
    match upper.as_str() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        t if t.ends_with("UNSIGNED") => row
            .try_get::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map(|v| i64::try_from(v).map(Value::Int).unwrap_or(Value::Float(v as f64)))
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "DECIMAL" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)
            .ok()
            .flatten()
            .map(|d| d.to_f64().map(Value::Float).unwrap_or_else(|| Value::String(d.to_string())))
            .unwrap_or(Value::Null),

        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.naive_utc().to_string()))
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

        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => row
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
            .unwrap_or(Value::Null),
    }
}
