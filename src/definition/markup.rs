//! XML surface syntax.
//!
//! The document is read into a small element tree, checked against a fixed
//! whitelist of elements and attributes, then lowered into a
//! [`QueryDefinition`]. Every violation is logged and collected before the
//! parse fails, so one run reports all of them.

use super::coerce::{as_bool, as_integer, coerce};
use super::{
    is_enabled, resolve_sheet_query, split_columns, DynamicVarDecl, DynamicVarKind,
    ExportSettings, QueryDefinition, QueryFragment, SheetSpec,
};
use crate::error::{ParseError, Result, SheetError};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Map;
use tracing::{debug, error, warn};

const ROOT: &str = "queries";

/// Allowed attributes and child elements for one element name.
struct Rule {
    attributes: &'static [&'static str],
    children: &'static [&'static str],
    /// Attribute names compared case-insensitively.
    relaxed_attributes: bool,
}

const SHEET_ATTRIBUTES: &[&str] = &[
    "name",
    "use",
    "aggregateColumn",
    "aggregateInfoTemplate",
    "maxRows",
    "db",
    "queryRef",
    "style",
    "exceptColumns",
];

fn rule(attributes: &'static [&'static str], children: &'static [&'static str]) -> Rule {
    Rule {
        attributes,
        children,
        relaxed_attributes: false,
    }
}

fn rule_for(element: &str) -> Option<Rule> {
    Some(match element {
        ROOT => rule(
            &["separateToc"],
            &["vars", "dynamicVars", "queryDefs", "sheet", "excel", "db", "output"],
        ),
        "vars" => rule(&[], &["var"]),
        "var" => rule(&["name"], &[]),
        "dynamicVars" => rule(&[], &["dynamicVar"]),
        "dynamicVar" => rule(&["name", "type", "description", "database"], &[]),
        "queryDefs" => rule(&[], &["queryDef"]),
        "queryDef" => rule(&["id", "name", "description"], &[]),
        "sheet" => Rule {
            attributes: SHEET_ATTRIBUTES,
            children: &["params"],
            relaxed_attributes: true,
        },
        "params" => rule(&[], &["param"]),
        "param" => rule(&["name"], &[]),
        "excel" => rule(
            &["db", "output", "maxRows", "style", "separateToc", "aggregateInfoTemplate"],
            &[],
        ),
        "db" => rule(&["id"], &[]),
        "output" => rule(&[], &[]),
        _ => return None,
    })
}

/// An element with its attributes, child elements, and concatenated text.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Attribute lookup ignoring ASCII case.
    fn attr_relaxed(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn body(&self) -> &str {
        self.text.trim()
    }
}

/// Parses an XML query definition.
pub fn parse_markup(content: &str) -> Result<QueryDefinition> {
    let root = read_tree(content.trim_start_matches('\u{feff}'))?;

    let violations = validate(&root);
    if !violations.is_empty() {
        for violation in &violations {
            error!("Query definition validation failed: {}", violation);
        }
        return Err(ParseError::Validation { violations }.into());
    }

    lower(&root)
}

fn read_tree(content: &str) -> Result<Element> {
    // Text stays raw; `body()` trims once per element.
    let mut reader = Reader::from_str(content);

    let malformed = |reader: &Reader<&[u8]>, msg: String| {
        SheetError::malformed(format!("at byte {}: {}", reader.buffer_position(), msg))
    };

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let element = open_element(&start).map_err(|e| malformed(&reader, e))?;
                if stack.is_empty() && root.is_some() {
                    return Err(malformed(&reader, "multiple root elements".into()));
                }
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                let element = open_element(&start).map_err(|e| malformed(&reader, e))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => return Err(malformed(&reader, "multiple root elements".into())),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed(&reader, "unexpected closing tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| malformed(&reader, e.to_string()))?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(malformed(&reader, "text outside the root element".into())),
                }
            }
            Ok(Event::CData(data)) => {
                let data = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| malformed(&reader, e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&data);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(&reader, e.to_string())),
        }
    }

    if let Some(open) = stack.last() {
        return Err(SheetError::malformed(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| SheetError::malformed("document has no root element"))
}

fn open_element(start: &quick_xml::events::BytesStart<'_>) -> std::result::Result<Element, String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Default::default()
    })
}

/// Checks the tree against the whitelist and required attributes.
fn validate(root: &Element) -> Vec<String> {
    let mut violations = Vec::new();
    if root.name != ROOT {
        violations.push(format!(
            "root element must be <{ROOT}>, found <{}>",
            root.name
        ));
        return violations;
    }

    validate_element(root, ROOT, &mut violations);

    let sheet_count = root.children_named("sheet").count();
    if sheet_count == 0 {
        violations.push(format!("<{ROOT}> must contain at least one <sheet>"));
    }
    for wrapper in ["vars", "dynamicVars", "queryDefs", "excel"] {
        if root.children_named(wrapper).count() > 1 {
            violations.push(format!("<{ROOT}> may contain only one <{wrapper}>"));
        }
    }

    violations
}

fn validate_element(element: &Element, path: &str, violations: &mut Vec<String>) {
    let Some(rule) = rule_for(&element.name) else {
        return;
    };

    for (key, _) in &element.attributes {
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let known = if rule.relaxed_attributes {
            rule.attributes.iter().any(|a| a.eq_ignore_ascii_case(key))
        } else {
            rule.attributes.contains(&key.as_str())
        };
        if !known {
            violations.push(format!(
                "{path}: attribute '{key}' is not allowed (allowed: {})",
                list_or_none(rule.attributes)
            ));
        }
    }

    match element.name.as_str() {
        "var" | "dynamicVar" | "param" => require(element, "name", path, violations),
        "sheet" if element.attr_relaxed("name").map_or(true, |n| n.is_empty()) => {
            violations.push(format!("{path}: required attribute 'name' is missing"));
        }
        "queryDef" if element.attr("id").or_else(|| element.attr("name")).is_none() => {
            violations.push(format!("{path}: required attribute 'id' is missing"));
        }
        _ => {}
    }

    let mut seen: Vec<(&str, usize)> = Vec::new();
    for child in &element.children {
        let index = match seen.iter_mut().find(|(n, _)| *n == child.name) {
            Some((_, count)) => {
                *count += 1;
                *count
            }
            None => {
                seen.push((child.name.as_str(), 1));
                1
            }
        };
        let child_path = format!("{path}/{}[{index}]", child.name);

        if !rule.children.contains(&child.name.as_str()) {
            violations.push(format!(
                "{path}: element <{}> is not allowed (allowed: {})",
                child.name,
                list_or_none(rule.children)
            ));
            continue;
        }
        validate_element(child, &child_path, violations);
    }
}

fn require(element: &Element, attr: &str, path: &str, violations: &mut Vec<String>) {
    if element.attr(attr).is_none() {
        violations.push(format!("{path}: required attribute '{attr}' is missing"));
    }
}

fn list_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Builds the model from a validated tree.
fn lower(root: &Element) -> Result<QueryDefinition> {
    let mut definition = QueryDefinition::default();

    for var in root.children_named("vars").flat_map(|v| v.children_named("var")) {
        match var.attr("name") {
            Some(name) if !var.body().is_empty() => {
                definition.variables.insert(name.to_string(), coerce(var.body()));
            }
            Some(name) => debug!("Variable '{}' has an empty value; skipping", name),
            None => {}
        }
    }

    for def in root.children_named("queryDefs").flat_map(|q| q.children_named("queryDef")) {
        let Some(id) = def.attr("id").or_else(|| def.attr("name")) else {
            continue;
        };
        definition.query_defs.insert(
            id.to_string(),
            QueryFragment {
                id: id.to_string(),
                description: def.attr("description").map(String::from),
                query: def.body().to_string(),
            },
        );
    }

    for dynamic in root
        .children_named("dynamicVars")
        .flat_map(|d| d.children_named("dynamicVar"))
    {
        let Some(name) = dynamic.attr("name") else {
            continue;
        };
        definition.dynamic_vars.push(DynamicVarDecl {
            name: name.to_string(),
            query: dynamic.body().to_string(),
            kind: DynamicVarKind::parse(dynamic.attr("type")),
            description: dynamic.attr("description").map(String::from),
            database: dynamic.attr("database").map(String::from),
        });
    }

    definition.export = export_settings(root);

    for sheet in root.children_named("sheet") {
        definition.sheets.push(lower_sheet(sheet, &definition)?);
    }

    if definition.sheets.is_empty() {
        return Err(ParseError::MissingSheets.into());
    }
    Ok(definition)
}

fn lower_sheet(sheet: &Element, definition: &QueryDefinition) -> Result<SheetSpec> {
    let attr = |name: &str| {
        sheet
            .attr_relaxed(name)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let name = attr("name").unwrap_or_default();
    let query_ref = attr("queryRef");

    let mut params = Map::new();
    for param in sheet.children_named("params").flat_map(|p| p.children_named("param")) {
        if let Some(key) = param.attr("name") {
            params.insert(key.to_string(), coerce(param.body()));
        }
    }

    if query_ref.is_some() && !sheet.body().is_empty() {
        warn!("Sheet '{}' has both queryRef and inline SQL; using queryRef", name);
    }
    let query = resolve_sheet_query(&name, sheet.body(), query_ref.as_deref(), &definition.query_defs)?;

    Ok(SheetSpec {
        enabled: is_enabled(sheet.attr_relaxed("use").map(coerce).as_ref()),
        query,
        query_ref,
        params,
        max_rows: attr("maxRows").and_then(|v| as_integer(&coerce(&v))),
        db: attr("db"),
        aggregate_column: attr("aggregateColumn"),
        aggregate_info_template: attr("aggregateInfoTemplate"),
        style: attr("style"),
        except_columns: attr("exceptColumns")
            .map(|v| split_columns(&v))
            .unwrap_or_default(),
        name,
    })
}

/// Reads the `excel` block; legacy `<db id>` and `<output>` elements fill gaps.
fn export_settings(root: &Element) -> ExportSettings {
    let mut settings = ExportSettings {
        separate_toc: root
            .attr("separateToc")
            .and_then(|v| as_bool(&coerce(v)))
            .unwrap_or(false),
        ..Default::default()
    };

    if let Some(excel) = root.children_named("excel").next() {
        settings.db = excel.attr("db").map(String::from);
        settings.output = excel.attr("output").map(String::from);
        settings.max_rows = excel.attr("maxRows").and_then(|v| as_integer(&coerce(v)));
        settings.style = excel.attr("style").map(String::from);
        settings.aggregate_info_template = excel.attr("aggregateInfoTemplate").map(String::from);
        if let Some(toc) = excel.attr("separateToc").and_then(|v| as_bool(&coerce(v))) {
            settings.separate_toc = toc;
        }
    }

    if settings.db.is_none() {
        settings.db = root
            .children_named("db")
            .find_map(|d| d.attr("id"))
            .map(String::from);
    }
    if settings.output.is_none() {
        settings.output = root
            .children_named("output")
            .map(|o| o.body())
            .find(|o| !o.is_empty())
            .map(String::from);
    }

    settings
}
