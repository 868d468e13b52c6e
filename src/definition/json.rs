//! Relaxed-JSON (JSON5) surface syntax.
//!
//! Comments, trailing commas, single quotes, and unquoted keys are accepted.
//! There is no structural whitelist here; shape errors are reported as
//! malformed documents.

use super::coerce::{as_bool, as_integer, coerce_value};
use super::{
    is_enabled, resolve_sheet_query, split_columns, DynamicVarDecl, DynamicVarKind,
    ExportSettings, QueryDefinition, QueryFragment, SheetSpec,
};
use crate::error::{ParseError, Result, SheetError};
use serde_json::{Map, Value};

/// Parses a relaxed-JSON query definition.
pub fn parse_json(content: &str) -> Result<QueryDefinition> {
    let document: Value = json5::from_str(content.trim_start_matches('\u{feff}'))
        .map_err(|e| SheetError::malformed(e.to_string()))?;

    let Value::Object(top) = document else {
        return Err(SheetError::malformed("top level must be an object"));
    };

    let mut definition = QueryDefinition::default();

    if let Some(vars) = top.get("vars") {
        definition.variables = coerced_map(object(vars, "vars")?);
    }

    if let Some(defs) = top.get("queryDefs") {
        for (id, def) in object(defs, "queryDefs")? {
            definition.query_defs.insert(id.clone(), fragment(id, def)?);
        }
    }

    if let Some(dynamics) = top.get("dynamicVars") {
        for (i, dynamic) in array(dynamics, "dynamicVars")?.iter().enumerate() {
            definition
                .dynamic_vars
                .push(dynamic_var(dynamic, &format!("dynamicVars[{i}]"))?);
        }
    }

    definition.export = export_settings(&top)?;

    let sheets = match top.get("sheets") {
        Some(sheets) => array(sheets, "sheets")?,
        None => return Err(ParseError::MissingSheets.into()),
    };
    for (i, sheet) in sheets.iter().enumerate() {
        let spec = sheet_spec(sheet, &format!("sheets[{i}]"), &definition)?;
        definition.sheets.push(spec);
    }

    if definition.sheets.is_empty() {
        return Err(ParseError::MissingSheets.into());
    }
    Ok(definition)
}

fn object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SheetError::malformed(format!("'{path}' must be an object")))
}

fn array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| SheetError::malformed(format!("'{path}' must be an array")))
}

/// Reads a scalar as text. Numbers and booleans are accepted for identifiers
/// written without quotes.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerced_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), coerce_value(v.clone())))
        .collect()
}

/// A fragment is either `{ query, description }` or a bare SQL string.
fn fragment(id: &str, def: &Value) -> Result<QueryFragment> {
    match def {
        Value::String(query) => Ok(QueryFragment {
            id: id.to_string(),
            description: None,
            query: query.trim().to_string(),
        }),
        Value::Object(map) => Ok(QueryFragment {
            id: id.to_string(),
            description: text(map, "description"),
            query: text(map, "query").unwrap_or_default().trim().to_string(),
        }),
        _ => Err(SheetError::malformed(format!(
            "'queryDefs.{id}' must be an object or a string"
        ))),
    }
}

fn dynamic_var(value: &Value, path: &str) -> Result<DynamicVarDecl> {
    let map = object(value, path)?;
    let name = text(map, "name")
        .ok_or_else(|| SheetError::malformed(format!("'{path}.name' is required")))?;
    Ok(DynamicVarDecl {
        name,
        query: text(map, "query").unwrap_or_default().trim().to_string(),
        kind: DynamicVarKind::parse(text(map, "type").as_deref()),
        description: text(map, "description"),
        database: text(map, "database"),
    })
}

fn sheet_spec(value: &Value, path: &str, definition: &QueryDefinition) -> Result<SheetSpec> {
    let map = object(value, path)?;
    let name = text(map, "name").unwrap_or_default();
    let query_ref = text(map, "queryRef");

    let params = match map.get("params") {
        Some(params) => coerced_map(object(params, &format!("{path}.params"))?),
        None => Map::new(),
    };

    let inline = match map.get("query") {
        Some(Value::String(sql)) => sql.as_str(),
        _ => "",
    };
    let query = resolve_sheet_query(&name, inline, query_ref.as_deref(), &definition.query_defs)?;

    let except_columns = match map.get("exceptColumns") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(list)) => split_columns(list),
        _ => Vec::new(),
    };

    Ok(SheetSpec {
        enabled: is_enabled(map.get("use")),
        query,
        query_ref,
        params,
        max_rows: map.get("maxRows").and_then(as_integer),
        db: text(map, "db"),
        aggregate_column: text(map, "aggregateColumn"),
        aggregate_info_template: text(map, "aggregateInfoTemplate"),
        style: text(map, "style"),
        except_columns,
        name,
    })
}

/// Reads `excel`; legacy top-level `db` and `output` fill gaps.
fn export_settings(top: &Map<String, Value>) -> Result<ExportSettings> {
    let mut settings = ExportSettings::default();

    if let Some(excel) = top.get("excel") {
        let excel = object(excel, "excel")?;
        settings.db = text(excel, "db");
        settings.output = text(excel, "output");
        settings.max_rows = excel.get("maxRows").and_then(as_integer);
        settings.style = text(excel, "style");
        settings.separate_toc = excel.get("separateToc").and_then(as_bool).unwrap_or(false);
        settings.aggregate_info_template = text(excel, "aggregateInfoTemplate");
    }

    if settings.db.is_none() {
        settings.db = text(top, "db");
    }
    if settings.output.is_none() {
        settings.output = text(top, "output");
    }

    Ok(settings)
}
