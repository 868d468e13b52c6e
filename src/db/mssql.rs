//! Microsoft SQL Server client implementation using tiberius.
//!
//! tiberius speaks TDS over any `AsyncRead + AsyncWrite`; the tokio socket is
//! bridged through `tokio_util::compat`. A TDS connection handles one request at
//! a time, so the client sits behind a mutex.

use super::sql_text::is_row_returning;
use super::{
    port_or_default, query_timeout, timeout_error, ColumnInfo, DatabaseClient, Dialect,
    QueryResult, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{ExecutionError, Result, SheetError};
use async_trait::async_trait;
use std::time::Instant;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const QUERY_TIMEOUT_SECS: u64 = 300;

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server database client.
pub struct MssqlClient {
    client: Mutex<Option<TdsClient>>,
    query_timeout: std::time::Duration,
}

impl std::fmt::Debug for MssqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlClient")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl MssqlClient {
    /// Opens a TDS connection for `config` and checks it with the test query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let dialect = Dialect::SqlServer;
        let test_query = dialect.test_query();

        let mut tds = Config::new();
        tds.host(config.field("server").unwrap_or("localhost"));
        tds.port(port_or_default(config, dialect));
        if let Some(database) = config.field("database") {
            tds.database(database);
        }
        tds.authentication(AuthMethod::sql_server(
            config.field("user").unwrap_or_default(),
            config.field("password").unwrap_or_default(),
        ));
        if config.option_bool("trustServerCertificate").unwrap_or(true) {
            tds.trust_cert();
        }
        if config.option_bool("encrypt") == Some(false) {
            tds.encryption(EncryptionLevel::Off);
        }

        debug!("Connecting to {}", config.display_string());
        let tcp = TcpStream::connect(tds.get_addr())
            .await
            .map_err(|e| io_error(&e, test_query))?;
        tcp.set_nodelay(true).map_err(|e| io_error(&e, test_query))?;

        let mut client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| map_tds_error(e, test_query))?;

        client
            .simple_query(test_query)
            .await
            .map_err(|e| map_tds_error(e, test_query))?
            .into_results()
            .await
            .map_err(|e| map_tds_error(e, test_query))?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            query_timeout: query_timeout(config, QUERY_TIMEOUT_SECS),
        })
    }

    async fn run(&self, sql: &str) -> Result<QueryResult> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(|| {
            SheetError::from(ExecutionError::new(
                Some("ENOTOPEN".to_string()),
                "Connection is closed",
                sql,
            ))
        })?;

        let start = Instant::now();

        if !is_row_returning(sql) {
            let done = client
                .execute(sql, &[])
                .await
                .map_err(|e| map_tds_error(e, sql))?;
            return Ok(QueryResult::affected(done.total() as usize)
                .with_execution_time(start.elapsed()));
        }

        let mut stream = client
            .simple_query(sql)
            .await
            .map_err(|e| map_tds_error(e, sql))?;

        let columns: Vec<ColumnInfo> = stream
            .columns()
            .await
            .map_err(|e| map_tds_error(e, sql))?
            .map(|cols| {
                cols.iter()
                    .map(|c| ColumnInfo::new(c.name(), format!("{:?}", c.column_type())))
                    .collect()
            })
            .unwrap_or_default();

        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| map_tds_error(e, sql))?;

        let execution_time = start.elapsed();
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|row| row.into_iter().map(convert_value).collect())
            .collect();

        Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
    }
}

#[async_trait]
impl DatabaseClient for MssqlClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        tokio::time::timeout(self.query_timeout, self.run(sql))
            .await
            .map_err(|_| timeout_error(self.query_timeout, sql))?
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| map_tds_error(e, ""))?;
        }
        Ok(())
    }
}

fn convert_value(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map(|v| Value::Int(v as i64)).into(),
        ColumnData::I16(v) => v.map(|v| Value::Int(v as i64)).into(),
        ColumnData::I32(v) => v.map(|v| Value::Int(v as i64)).into(),
        ColumnData::I64(v) => v.map(Value::Int).into(),
        ColumnData::F32(v) => v.map(|v| Value::Float(v as f64)).into(),
        ColumnData::F64(v) => v.map(Value::Float).into(),
        ColumnData::Bit(v) => v.map(Value::Bool).into(),
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())).into(),
        ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())).into(),
        ColumnData::Binary(v) => v.map(|b| Value::Bytes(b.into_owned())).into(),
        ColumnData::Numeric(v) => v.map(|n| Value::Float(f64::from(n))).into(),
        ColumnData::Xml(v) => v.map(|x| Value::String(x.into_owned().into_string())).into(),
        ColumnData::Date(_) => temporal::<chrono::NaiveDate>(&data),
        ColumnData::Time(_) => temporal::<chrono::NaiveTime>(&data),
        ColumnData::DateTimeOffset(_) => temporal::<chrono::DateTime<chrono::FixedOffset>>(&data),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal::<chrono::NaiveDateTime>(&data)
        }
    }
}

fn temporal<'a, T>(data: &'a ColumnData<'static>) -> Value
where
    T: FromSql<'a> + ToString,
{
    T::from_sql(data)
        .ok()
        .flatten()
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}

fn io_error(error: &std::io::Error, sql: &str) -> SheetError {
    let code = match error.kind() {
        std::io::ErrorKind::TimedOut => "ETIMEOUT",
        _ => "ESOCKET",
    };
    ExecutionError::new(Some(code.to_string()), error.to_string(), sql).into()
}

/// Maps a TDS error onto driver-style codes.
fn map_tds_error(error: tiberius::error::Error, sql: &str) -> SheetError {
    use tiberius::error::Error as TdsError;

    let code = match &error {
        TdsError::Server(token) => Some(match token.code() {
            18456 => "ELOGIN".to_string(),
            4060 => "ENAME".to_string(),
            n => n.to_string(),
        }),
        TdsError::Io { kind, .. } => Some(
            if *kind == std::io::ErrorKind::TimedOut {
                "ETIMEOUT"
            } else {
                "ESOCKET"
            }
            .to_string(),
        ),
        TdsError::Tls(_) | TdsError::Routing { .. } => Some("ESOCKET".to_string()),
        _ => None,
    };

    let message = match &error {
        TdsError::Server(token) => token.message().to_string(),
        other => other.to_string(),
    };

    ExecutionError::new(code, message, sql).into()
}
