//! Query definition loading tests.
//!
//! The same document written as XML and as relaxed JSON must produce the
//! same model.

use db_sheets::definition::{DynamicVarKind, QueryDefinition, SheetNameIssue};
use db_sheets::error::{ParseError, SheetError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<queries>
  <excel db="main" output="report_${year}.xlsx" maxRows="100" />
  <vars>
    <var name="year">2024</var>
    <var name="regions">["Seoul", "Busan"]</var>
  </vars>
  <queryDefs>
    <queryDef id="sales">SELECT * FROM sales WHERE year = ${year}</queryDef>
  </queryDefs>
  <dynamicVars>
    <dynamicVar name="codes" type="key_value_pairs">SELECT code, label FROM codes</dynamicVar>
  </dynamicVars>
  <sheet name="Sales ${year}" queryRef="sales" aggregateColumn="region" />
  <sheet name="Regions" use="0" exceptColumns="secret">
    SELECT * FROM regions WHERE name IN (${regions})
  </sheet>
</queries>"#;

const JSON: &str = r#"{
  excel: { db: 'main', output: 'report_${year}.xlsx', maxRows: 100 },
  vars: { year: '2024', regions: ['Seoul', 'Busan'] },
  queryDefs: { sales: { query: 'SELECT * FROM sales WHERE year = ${year}' } },
  dynamicVars: [ { name: 'codes', type: 'key_value_pairs', query: 'SELECT code, label FROM codes' } ],
  sheets: [
    { name: 'Sales ${year}', queryRef: 'sales', aggregateColumn: 'region' },
    { name: 'Regions', use: 0, exceptColumns: ['secret'],
      query: 'SELECT * FROM regions WHERE name IN (${regions})' },
  ],
}"#;

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_xml_and_json_produce_same_model() {
    let xml_file = write_temp(".xml", XML);
    let json_file = write_temp(".json", JSON);

    let from_xml = QueryDefinition::load_from_file(xml_file.path()).unwrap();
    let from_json = QueryDefinition::load_from_file(json_file.path()).unwrap();

    assert_eq!(from_xml.variables, from_json.variables);
    assert_eq!(from_xml.export, from_json.export);
    assert_eq!(from_xml.sheets, from_json.sheets);
    assert_eq!(from_xml.dynamic_vars[0].kind, DynamicVarKind::KeyValuePairs);
    assert_eq!(from_json.dynamic_vars[0].query, from_xml.dynamic_vars[0].query);
    assert_eq!(from_xml.variables["year"], json!(2024));
    assert_eq!(from_xml.enabled_sheets().count(), 1);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = QueryDefinition::load_from_file(std::path::Path::new("/nonexistent/q.xml")).unwrap_err();
    assert!(matches!(err, SheetError::Config(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_whitelist_violations_are_collected() {
    let file = write_temp(
        ".xml",
        r#"<queries>
             <sheet name="A" color="red">SELECT 1</sheet>
             <chart />
           </queries>"#,
    );
    match QueryDefinition::load_from_file(file.path()).unwrap_err() {
        SheetError::Parse(ParseError::Validation { violations }) => {
            assert_eq!(violations.len(), 2, "{violations:?}");
            assert!(violations.iter().any(|v| v.contains("color")));
            assert!(violations.iter().any(|v| v.contains("chart")));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_sheet_name_issues_on_raw_names() {
    let file = write_temp(
        ".json",
        r#"{ sheets: [
              { name: 'Q1/Q2', query: 'SELECT 1' },
              { name: '${region}_with_a_name_that_is_clearly_longer_than_31', query: 'SELECT 1' },
              { name: ' padded', query: 'SELECT 1' },
           ] }"#,
    );
    let definition = QueryDefinition::load_from_file(file.path()).unwrap();
    let issues = definition.sheet_name_issues();

    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].0, "Q1/Q2");
    assert_eq!(issues[0].1, vec![SheetNameIssue::ForbiddenChars(vec!['/'])]);
    assert_eq!(issues[1].1, vec![SheetNameIssue::SurroundingWhitespace]);
}
