//! Database-derived variables.
//!
//! Each declared dynamic variable runs its own query before any sheet does.
//! The result set is shaped into a [`DynamicValue`] and registered in a
//! per-run [`DynamicVariables`] registry, which the substitutor consults
//! before every other tier.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use super::{Pass, Substitutor};
use crate::connection::ConnectionManager;
use crate::db::sql_text::to_in_clause;
use crate::db::{QueryResult, Value};
use crate::definition::{DynamicVarDecl, DynamicVarKind};

/// Shaped result of a dynamic-variable query.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    /// No rows, a failed query, or an unusable result shape.
    Empty,

    /// One value list per returned column, nulls dropped.
    Columns(Vec<(String, Vec<Value>)>),

    /// Raw columns plus a first-column to second-column mapping. A repeated
    /// key resolves to its last row.
    KeyValue {
        columns: Vec<(String, Vec<Value>)>,
        pairs: Vec<(String, Value)>,
    },
}

impl DynamicValue {
    /// Shapes a query result according to the declared kind.
    pub fn from_result(kind: DynamicVarKind, result: &QueryResult, name: &str) -> Self {
        if result.rows.is_empty() {
            return Self::Empty;
        }

        match kind {
            DynamicVarKind::ColumnIdentified => Self::Columns(column_arrays(result)),
            DynamicVarKind::KeyValuePairs => {
                if result.columns.len() < 2 {
                    warn!(
                        "Dynamic variable '{}' is key_value_pairs but returned {} column(s); need at least 2",
                        name,
                        result.columns.len()
                    );
                    return Self::Empty;
                }

                let pairs = result
                    .rows
                    .iter()
                    .filter_map(|row| {
                        let key = row.first()?.to_key_string()?;
                        let value = row.get(1).cloned().unwrap_or(Value::Null);
                        Some((key, value))
                    })
                    .collect();

                Self::KeyValue {
                    columns: column_arrays(result),
                    pairs,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Renders `${name}` (no key) or `${name.key}`.
    ///
    /// Returns `None` when the key is not addressable, leaving the token for
    /// later passes.
    pub fn render(&self, key: Option<&str>) -> Option<String> {
        match (self, key) {
            (Self::Empty, None) => Some(to_in_clause::<Value>(&[])),
            (Self::Empty, Some(_)) => None,

            (Self::Columns(columns), None) => Some(flatten(columns, &[])),
            (Self::Columns(columns), Some(key)) => column(columns, key),

            (Self::KeyValue { columns, pairs }, None) => Some(flatten(columns, pairs)),
            (Self::KeyValue { columns, pairs }, Some(key)) => {
                if let Some((_, value)) = pairs.iter().rfind(|(k, _)| k == key) {
                    return Some(to_in_clause(std::slice::from_ref(value)));
                }
                column(columns, key)
            }
        }
    }

    /// Number of rows or pairs backing this value, for logging.
    fn size(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Columns(columns) => columns.first().map_or(0, |(_, v)| v.len()),
            Self::KeyValue { pairs, .. } => pairs.len(),
        }
    }
}

fn column_arrays(result: &QueryResult) -> Vec<(String, Vec<Value>)> {
    result
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let values = result
                .column_values(i)
                .filter(|v| !v.is_null())
                .cloned()
                .collect();
            (column.name.clone(), values)
        })
        .collect()
}

fn column(columns: &[(String, Vec<Value>)], key: &str) -> Option<String> {
    columns
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, values)| to_in_clause(values))
}

fn flatten(columns: &[(String, Vec<Value>)], pairs: &[(String, Value)]) -> String {
    let mut all: Vec<Value> = columns.iter().flat_map(|(_, v)| v.iter().cloned()).collect();
    all.extend(pairs.iter().map(|(_, v)| v.clone()));
    to_in_clause(&all)
}

/// Registry of dynamic variables for one run.
#[derive(Debug, Clone, Default)]
pub struct DynamicVariables {
    values: BTreeMap<String, DynamicValue>,
}

impl DynamicVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, value: DynamicValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Runs declared dynamic-variable queries and registers their results.
#[derive(Debug, Clone)]
pub struct DynamicVariableResolver {
    default_key: String,
}

impl DynamicVariableResolver {
    /// `default_key` is used for declarations without a `database`.
    pub fn new(default_key: impl Into<String>) -> Self {
        Self {
            default_key: default_key.into(),
        }
    }

    /// Resolves every declaration in order. Failures register the variable
    /// empty and never abort the run.
    pub async fn resolve_all(
        &self,
        decls: &[DynamicVarDecl],
        general: &Map<String, JsonValue>,
        substitutor: &mut Substitutor,
        manager: &mut ConnectionManager,
    ) {
        if decls.is_empty() {
            return;
        }
        info!("Resolving {} dynamic variable(s)", decls.len());

        for decl in decls {
            let value = self.resolve_one(decl, general, substitutor, manager).await;
            substitutor.dynamic_mut().register(decl.name.clone(), value);
        }
    }

    async fn resolve_one(
        &self,
        decl: &DynamicVarDecl,
        general: &Map<String, JsonValue>,
        substitutor: &Substitutor,
        manager: &mut ConnectionManager,
    ) -> DynamicValue {
        if decl.query.trim().is_empty() {
            warn!("Dynamic variable '{}' has no query; registering empty", decl.name);
            return DynamicValue::Empty;
        }

        // A dynamic query never sees other dynamic variables.
        let sql = substitutor.substitute_passes(&Pass::DYNAMIC_QUERY, &decl.query, general, &Map::new());
        let key = decl.database.as_deref().unwrap_or(&self.default_key);

        match manager.run(key, &sql).await {
            Ok(result) => {
                let value = DynamicValue::from_result(decl.kind, &result, &decl.name);
                info!(
                    "Dynamic variable '{}' ({}) registered from '{}': {} value(s)",
                    decl.name,
                    decl.kind,
                    key,
                    value.size()
                );
                value
            }
            Err(e) => {
                warn!(
                    "Dynamic variable '{}' failed on '{}': {}; registering empty. SQL: {}",
                    decl.name,
                    key,
                    manager.describe_error(key, &e),
                    sql
                );
                DynamicValue::Empty
            }
        }
    }
}
