//! Query definition documents.
//!
//! A query definition declares global variables, reusable query fragments,
//! database-derived (dynamic) variables, and the sheets to export. It can be
//! written as XML markup or as relaxed JSON; both produce the same
//! [`QueryDefinition`].

pub mod coerce;
mod json;
mod markup;
pub mod sheet_name;

pub use json::parse_json;
pub use markup::parse_markup;
pub use sheet_name::{correct_sheet_name, validate_sheet_name, SheetNameIssue};

use crate::error::{ParseError, Result, SheetError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Parsed query definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDefinition {
    /// Global variables, already coerced.
    pub variables: Map<String, Value>,

    /// Reusable query fragments by id.
    pub query_defs: BTreeMap<String, QueryFragment>,

    /// Dynamic variables in declaration order.
    pub dynamic_vars: Vec<DynamicVarDecl>,

    /// Sheets in declaration order.
    pub sheets: Vec<SheetSpec>,

    /// Document-wide export settings.
    pub export: ExportSettings,
}

/// A named, reusable piece of SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryFragment {
    pub id: String,
    pub description: Option<String>,
    pub query: String,
}

/// How a dynamic variable's result set is shaped into a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicVarKind {
    /// One array per returned column.
    #[default]
    ColumnIdentified,
    /// First column maps to second column, plus both raw columns.
    KeyValuePairs,
}

impl DynamicVarKind {
    /// Parses a declared type. Unknown or missing types fall back to
    /// column-identified.
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("key_value_pairs") => Self::KeyValuePairs,
            _ => Self::ColumnIdentified,
        }
    }
}

impl fmt::Display for DynamicVarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnIdentified => write!(f, "column_identified"),
            Self::KeyValuePairs => write!(f, "key_value_pairs"),
        }
    }
}

/// Declaration of a database-derived variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DynamicVarDecl {
    pub name: String,
    pub query: String,
    pub kind: DynamicVarKind,
    pub description: Option<String>,
    /// Connection key to run against; the default connection when absent.
    pub database: Option<String>,
}

/// One sheet to export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSpec {
    /// Sheet name template (may contain `${...}` tokens).
    pub name: String,

    pub enabled: bool,

    /// SQL text, inline or resolved from `query_ref` at parse time.
    pub query: String,

    pub query_ref: Option<String>,

    /// Parameters that override global variables for this sheet only.
    pub params: Map<String, Value>,

    pub max_rows: Option<i64>,

    /// Connection key override.
    pub db: Option<String>,

    pub aggregate_column: Option<String>,

    pub aggregate_info_template: Option<String>,

    pub style: Option<String>,

    /// Columns dropped from the exported rows.
    pub except_columns: Vec<String>,
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            query: String::new(),
            query_ref: None,
            params: Map::new(),
            max_rows: None,
            db: None,
            aggregate_column: None,
            aggregate_info_template: None,
            style: None,
            except_columns: Vec::new(),
        }
    }
}

/// Settings from the `excel` block (plus legacy top-level `db`/`output`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSettings {
    /// Default connection key.
    pub db: Option<String>,
    /// Output path template.
    pub output: Option<String>,
    /// Global row cap.
    pub max_rows: Option<i64>,
    pub style: Option<String>,
    pub separate_toc: bool,
    pub aggregate_info_template: Option<String>,
}

/// Surface syntax of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Markup,
    Json,
}

impl SourceFormat {
    /// Picks the format from the file extension, sniffing the content when the
    /// extension is not recognised.
    pub fn detect(path: &Path, content: &str) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xml") => Self::Markup,
            Some("json") | Some("json5") => Self::Json,
            _ if content.trim_start_matches('\u{feff}').trim_start().starts_with('<') => {
                Self::Markup
            }
            _ => Self::Json,
        }
    }
}

impl QueryDefinition {
    /// Reads and parses a definition file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SheetError::io(format!(
                "Query definition file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SheetError::io(format!("Failed to read {}: {e}", path.display())))?;

        let format = SourceFormat::detect(path, &content);
        info!("Loading query definition from {} ({:?})", path.display(), format);
        Self::parse(&content, format)
    }

    /// Parses a definition from text in the given syntax.
    pub fn parse(content: &str, format: SourceFormat) -> Result<Self> {
        let definition = match format {
            SourceFormat::Markup => parse_markup(content)?,
            SourceFormat::Json => parse_json(content)?,
        };
        debug!(
            "Parsed {} sheet(s), {} variable(s), {} fragment(s), {} dynamic variable(s)",
            definition.sheets.len(),
            definition.variables.len(),
            definition.query_defs.len(),
            definition.dynamic_vars.len()
        );
        Ok(definition)
    }

    /// Sheets that are enabled, in declaration order.
    pub fn enabled_sheets(&self) -> impl Iterator<Item = &SheetSpec> {
        self.sheets.iter().filter(|s| s.enabled)
    }

    /// Sheet-name problems in the raw (pre-substitution) names. Length checks
    /// are waived for templated names.
    pub fn sheet_name_issues(&self) -> Vec<(String, Vec<SheetNameIssue>)> {
        self.sheets
            .iter()
            .map(|s| (s.name.clone(), sheet_name::validate_template(&s.name)))
            .filter(|(_, issues)| !issues.is_empty())
            .collect()
    }
}

/// Resolves a sheet's SQL: a `queryRef` wins over inline text and must name a
/// known fragment.
pub(crate) fn resolve_sheet_query(
    sheet: &str,
    inline: &str,
    query_ref: Option<&str>,
    query_defs: &BTreeMap<String, QueryFragment>,
) -> Result<String> {
    let Some(reference) = query_ref else {
        return Ok(inline.trim().to_string());
    };

    match query_defs.get(reference) {
        Some(fragment) => {
            debug!("Sheet '{}' uses query definition '{}'", sheet, reference);
            Ok(fragment.query.clone())
        }
        None => Err(ParseError::QueryDefNotFound {
            sheet: sheet.to_string(),
            reference: reference.to_string(),
        }
        .into()),
    }
}

/// Sheet enablement: disabled for `false`, `0`, `"false"`, `"0"`, `""`, and
/// null. An absent flag means enabled.
pub fn is_enabled(flag: Option<&Value>) -> bool {
    match flag {
        None => true,
        Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::String(s)) => !matches!(s.as_str(), "false" | "0" | ""),
        Some(_) => true,
    }
}

/// Splits a comma-separated column list, dropping blanks.
pub(crate) fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}
