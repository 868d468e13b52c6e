//! Mock database client for testing.
//!
//! Provides a scripted in-memory client so the pipeline can run headless. A
//! [`MockConnector`] hands out clients that share one script and one log of
//! executed statements.

use super::{ColumnInfo, Connector, DatabaseClient, Dialect, QueryResult, Row, Value};
use crate::config::ConnectionConfig;
use crate::error::{ExecutionError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned reply for statements containing a given fragment.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Affected(usize),
    Error { code: Option<String>, message: String },
}

impl MockResponse {
    /// Shorthand for a row-returning reply.
    pub fn rows(columns: &[&str], rows: Vec<Row>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

/// Counters and statement log shared by a connector and its clients.
#[derive(Debug, Default)]
struct MockLog {
    executed: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// A mock database client that returns scripted results.
#[derive(Debug, Clone)]
pub struct MockDatabaseClient {
    script: Arc<Vec<(String, MockResponse)>>,
    log: Arc<MockLog>,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with an empty script.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Vec::new()),
            log: Arc::new(MockLog::default()),
        }
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        if let Ok(mut executed) = self.log.executed.lock() {
            executed.push(sql.to_string());
        }

        let scripted = self
            .script
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());

        let result = match scripted {
            Some(MockResponse::Rows { columns, rows }) => QueryResult::with_data(
                columns
                    .into_iter()
                    .map(|name| ColumnInfo::new(name, "text"))
                    .collect(),
                rows,
            ),
            Some(MockResponse::Affected(n)) => QueryResult::affected(n),
            Some(MockResponse::Error { code, message }) => {
                return Err(ExecutionError::new(code, message, sql).into());
            }
            None if sql.trim_start().to_uppercase().starts_with("SELECT") => {
                QueryResult::with_data(
                    vec![ColumnInfo::new("result", "text")],
                    vec![vec![Value::String(format!("Mock result for: {sql}"))]],
                )
            }
            None => QueryResult::affected(0),
        };

        Ok(result.with_execution_time(Duration::from_millis(1)))
    }

    async fn close(&self) -> Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector producing [`MockDatabaseClient`]s that share one script.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Vec<(String, MockResponse)>,
    connect_failure: Option<(Option<String>, String)>,
    log: Arc<MockLog>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a reply for any statement containing `fragment`. First match wins.
    pub fn respond(mut self, fragment: &str, response: MockResponse) -> Self {
        self.script.push((fragment.to_string(), response));
        self
    }

    /// Makes every connect attempt fail with the given driver code and message.
    pub fn fail_connect(mut self, code: Option<&str>, message: &str) -> Self {
        self.connect_failure = Some((code.map(String::from), message.to_string()));
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.log
            .executed
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.log.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.log.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _dialect: Dialect,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn DatabaseClient>> {
        if let Some((code, message)) = &self.connect_failure {
            return Err(ExecutionError::new(code.clone(), message.clone(), "").into());
        }
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDatabaseClient {
            script: Arc::new(self.script.clone()),
            log: Arc::clone(&self.log),
        }))
    }
}
