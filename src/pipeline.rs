//! Export pipeline.
//!
//! Drives one run over a parsed [`QueryDefinition`]: merges command-line
//! variables over document globals, resolves dynamic variables, then executes
//! every enabled sheet in declaration order. Each sheet yields a
//! [`SheetOutput`] for the spreadsheet writer.
//!
//! Config errors abort the run before any sheet executes. Execution errors are
//! recorded on the failing sheet and the run continues. Every connection is
//! closed exactly once when the run ends, whichever way it ends.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{error, info, warn};

use crate::connection::ConnectionManager;
use crate::db::{ColumnInfo, QueryResult, Row};
use crate::definition::{correct_sheet_name, QueryDefinition, SheetSpec};
use crate::error::Result;
use crate::vars::{DynamicVariableResolver, Substitutor};

/// Connection key used when nothing else names one.
pub const DEFAULT_CONNECTION_KEY: &str = "main";

/// Output path used when neither the command line nor the document names one.
pub const DEFAULT_OUTPUT_PATH: &str = "output.xlsx";

/// Run-level overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Variables that override document globals.
    pub variables: Map<String, JsonValue>,
    /// Default connection key override.
    pub db: Option<String>,
    /// Output path override.
    pub output: Option<String>,
}

/// Distinct value of the aggregate column and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateEntry {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SheetStatus {
    Exported,
    Failed { message: String },
}

/// One processed sheet, ready for the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetOutput {
    /// Name after substitution and correction.
    pub display_name: String,
    /// Name as written in the document.
    pub original_name: String,
    pub connection_key: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub record_count: usize,
    pub aggregate: Vec<AggregateEntry>,
    pub aggregate_info_template: Option<String>,
    pub style: Option<String>,
    /// SQL as sent to the database, after row limiting and `GETDATE()` rewriting.
    pub sql: String,
    pub status: SheetStatus,
}

impl SheetOutput {
    pub fn is_exported(&self) -> bool {
        self.status == SheetStatus::Exported
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub output_path: Option<String>,
    pub sheets: Vec<SheetOutput>,
}

impl PipelineOutput {
    pub fn exported_count(&self) -> usize {
        self.sheets.iter().filter(|s| s.is_exported()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SheetOutput> {
        self.sheets.iter().filter(|s| !s.is_exported())
    }

    /// True when every processed sheet exported. Drives the CLI exit status.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// One run over a query definition.
#[derive(Debug)]
pub struct Pipeline {
    definition: QueryDefinition,
    options: PipelineOptions,
    substitutor: Substitutor,
}

impl Pipeline {
    pub fn new(definition: QueryDefinition, options: PipelineOptions) -> Self {
        Self {
            definition,
            options,
            substitutor: Substitutor::new(),
        }
    }

    /// Replaces the substitutor (environment lookup, clock).
    pub fn with_substitutor(mut self, substitutor: Substitutor) -> Self {
        self.substitutor = substitutor;
        self
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Command-line `--db`, then the document's `excel.db`, then `main`.
    pub fn default_key(&self) -> &str {
        self.options
            .db
            .as_deref()
            .or(self.definition.export.db.as_deref())
            .unwrap_or(DEFAULT_CONNECTION_KEY)
    }

    /// A sheet's own `db` wins over the run default.
    pub fn connection_key<'a>(&'a self, sheet: &'a SheetSpec) -> &'a str {
        sheet.db.as_deref().unwrap_or_else(|| self.default_key())
    }

    /// Document globals with command-line variables layered on top.
    pub fn general_variables(&self) -> Map<String, JsonValue> {
        let mut merged = self.definition.variables.clone();
        for (name, value) in &self.options.variables {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Runs every enabled sheet and closes all connections afterwards.
    pub async fn run(mut self, manager: &mut ConnectionManager) -> Result<PipelineOutput> {
        let outcome = self.run_sheets(manager).await;
        manager.close_all().await;
        outcome
    }

    async fn run_sheets(&mut self, manager: &mut ConnectionManager) -> Result<PipelineOutput> {
        self.preflight(manager)?;

        let general = self.general_variables();

        DynamicVariableResolver::new(self.default_key())
            .resolve_all(
                &self.definition.dynamic_vars,
                &general,
                &mut self.substitutor,
                manager,
            )
            .await;

        let output_path = self
            .options
            .output
            .as_deref()
            .or(self.definition.export.output.as_deref())
            .unwrap_or(DEFAULT_OUTPUT_PATH);
        let output_path = self.substitutor.substitute(output_path, &general, &Map::new());
        info!("Exporting to {}", output_path);

        let mut sheets = Vec::new();
        for (index, sheet) in self.definition.sheets.iter().enumerate() {
            if !sheet.enabled {
                info!("Sheet '{}' is disabled; skipping", sheet.name);
                continue;
            }
            sheets.push(self.run_sheet(index, sheet, &general, manager).await?);
        }

        let output = PipelineOutput {
            output_path: Some(output_path),
            sheets,
        };
        info!(
            "Run complete: {} sheet(s) exported, {} failed",
            output.exported_count(),
            output.failed().count()
        );
        Ok(output)
    }

    /// Every enabled sheet must name a usable connection before anything runs.
    fn preflight(&self, manager: &ConnectionManager) -> Result<()> {
        for sheet in self.definition.enabled_sheets() {
            manager.resolve(self.connection_key(sheet))?;
        }
        Ok(())
    }

    async fn run_sheet(
        &self,
        index: usize,
        sheet: &SheetSpec,
        general: &Map<String, JsonValue>,
        manager: &mut ConnectionManager,
    ) -> Result<SheetOutput> {
        let key = self.connection_key(sheet).to_string();
        let display_name = self.display_name(index, sheet, general);

        let mut output = SheetOutput {
            display_name,
            original_name: sheet.name.clone(),
            connection_key: key.clone(),
            columns: Vec::new(),
            rows: Vec::new(),
            record_count: 0,
            aggregate: Vec::new(),
            aggregate_info_template: sheet
                .aggregate_info_template
                .clone()
                .or_else(|| self.definition.export.aggregate_info_template.clone()),
            style: sheet
                .style
                .clone()
                .or_else(|| self.definition.export.style.clone()),
            sql: String::new(),
            status: SheetStatus::Exported,
        };

        let sql = self.substitutor.substitute(&sheet.query, general, &sheet.params);
        if sql.trim().is_empty() {
            warn!("Sheet '{}' has no query", output.display_name);
            output.status = SheetStatus::Failed {
                message: "Sheet has no query".to_string(),
            };
            return Ok(output);
        }

        let (dialect, _) = manager.resolve(&key)?;
        let max_rows = sheet.max_rows.or(self.definition.export.max_rows);
        output.sql = dialect.substitute_current_timestamp(&dialect.add_row_limit(&sql, max_rows));

        info!("[{}] Executing on '{}'", output.display_name, key);
        match manager.run(&key, &output.sql).await {
            Ok(result) => {
                let result = result.without_columns(&sheet.except_columns);
                if let Some(column) = &sheet.aggregate_column {
                    output.aggregate = aggregate(&result, column, &output.display_name);
                }
                output.record_count = result.rows.len();
                output.columns = result.columns;
                output.rows = result.rows;
                info!("\t---> {} row(s) selected", output.record_count);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let message = manager.describe_error(&key, &e);
                error!(
                    "[{}] Query failed: {}\n{}",
                    output.display_name, message, output.sql
                );
                output.status = SheetStatus::Failed { message };
            }
        }

        Ok(output)
    }

    /// Substitutes and corrects the sheet name; an empty result falls back
    /// to `Sheet{n}`.
    fn display_name(&self, index: usize, sheet: &SheetSpec, general: &Map<String, JsonValue>) -> String {
        let resolved = self.substitutor.substitute(&sheet.name, general, &sheet.params);
        let corrected = correct_sheet_name(&resolved);
        if corrected.is_empty() {
            let fallback = format!("Sheet{}", index + 1);
            warn!("Sheet name '{}' is empty after substitution; using '{}'", sheet.name, fallback);
            fallback
        } else {
            corrected
        }
    }
}

/// Counts distinct trimmed values of `column`, most frequent first. Ties keep
/// first-seen order.
pub fn aggregate(result: &QueryResult, column: &str, sheet: &str) -> Vec<AggregateEntry> {
    let Some(index) = result.column_index(column) else {
        warn!("Sheet '{}': aggregate column '{}' not in result", sheet, column);
        return Vec::new();
    };

    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut entries: Vec<AggregateEntry> = Vec::new();
    for value in result.column_values(index).filter(|v| !v.is_null()) {
        let key = value.to_display_string().trim().to_string();
        match positions.get(&key) {
            Some(&i) => entries[i].count += 1,
            None => {
                positions.insert(key.clone(), entries.len());
                entries.push(AggregateEntry { key, count: 1 });
            }
        }
    }

    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries
}
