//! End-to-end pipeline tests against the scripted mock connector.

use db_sheets::config::ConnectionStore;
use db_sheets::connection::ConnectionManager;
use db_sheets::db::{Language, MockConnector, MockResponse, Value};
use db_sheets::definition::{QueryDefinition, SourceFormat};
use db_sheets::pipeline::{Pipeline, PipelineOptions, SheetStatus};
use db_sheets::vars::Substitutor;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const DEFINITION: &str = r#"<queries>
  <excel db="erp" output="out/${KST_DATE}_${team}.xlsx" />
  <vars>
    <var name="team">ops</var>
    <var name="minAmount">100</var>
  </vars>
  <queryDefs>
    <queryDef id="orders">
      SELECT * FROM orders WHERE amount >= ${minAmount} AND status IN (${statuses.code})
    </queryDef>
  </queryDefs>
  <dynamicVars>
    <dynamicVar name="statuses" type="key_value_pairs">SELECT code, label FROM order_status</dynamicVar>
    <dynamicVar name="nobody" database="hr">SELECT id FROM staff WHERE 1 = 0</dynamicVar>
  </dynamicVars>
  <sheet name="Orders ${team}" queryRef="orders">
    <params><param name="minAmount">500</param></params>
  </sheet>
  <sheet name="Open" maxRows="10">
    SELECT * FROM orders WHERE status = ${statuses.OPEN} AND created &lt; GETDATE()
  </sheet>
  <sheet name="Assigned" db="hr">
    SELECT * FROM tasks WHERE owner IN (${nobody}) OR reviewer IN (${nobody.id})
  </sheet>
  <sheet name="Schema" db="hr">SELECT * FROM ${SCHEMA_NAME}.audit</sheet>
</queries>"#;

fn store() -> ConnectionStore {
    ConnectionStore::from_value(json!({
        "erp": { "type": "mssql", "server": "erp", "database": "erp", "user": "u", "password": "p" },
        "hr": { "type": "mysql", "server": "hr", "database": "hr", "user": "u", "password": "p" }
    }))
    .unwrap()
}

fn connector() -> MockConnector {
    MockConnector::new()
        .respond(
            "FROM order_status",
            MockResponse::rows(
                &["code", "label"],
                vec![
                    vec![Value::from("OPEN"), Value::from("Open")],
                    vec![Value::from("HOLD"), Value::from("On hold")],
                ],
            ),
        )
        .respond("FROM staff", MockResponse::rows(&["id"], vec![]))
        .respond(
            "FROM orders",
            MockResponse::rows(&["id", "amount"], vec![vec![Value::Int(1), Value::Int(900)]]),
        )
        .respond(
            ".audit",
            MockResponse::Error {
                code: Some("1146".into()),
                message: "Table 'hr.audit' doesn't exist".into(),
            },
        )
}

#[tokio::test]
async fn test_full_run_through_mock_connector() {
    let connector = Arc::new(connector());
    let mut manager = ConnectionManager::with_connector(store(), Language::En, connector.clone());
    let definition = QueryDefinition::parse(DEFINITION, SourceFormat::Markup).unwrap();

    let options = PipelineOptions {
        variables: json!({ "team": "finance" }).as_object().cloned().unwrap(),
        ..Default::default()
    };
    let substitutor = Substitutor::new()
        .with_env(|name| (name == "SCHEMA_NAME").then(|| "audit_db".to_string()))
        .with_verbose(false);

    let output = Pipeline::new(definition, options)
        .with_substitutor(substitutor)
        .run(&mut manager)
        .await
        .unwrap();

    let path = output.output_path.clone().unwrap();
    assert!(path.starts_with("out/20") && path.ends_with("_finance.xlsx"), "{path}");

    let sql: Vec<&str> = output.sheets.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(sql[0], "SELECT * FROM orders WHERE amount >= 500 AND status IN ('OPEN', 'HOLD')");
    assert!(
        sql[1].starts_with("SELECT TOP 10 * FROM orders WHERE status = 'Open' AND created < '20"),
        "{}",
        sql[1]
    );
    assert!(!sql[1].contains("GETDATE"));
    assert_eq!(sql[2], "SELECT * FROM tasks WHERE owner IN (NULL) OR reviewer IN ('^-_')");
    assert_eq!(sql[3], "SELECT * FROM audit_db.audit");

    assert_eq!(output.sheets[0].display_name, "Orders finance");
    assert_eq!(output.sheets[0].record_count, 1);
    assert_eq!(output.sheets[0].connection_key, "erp");
    assert_eq!(output.sheets[2].connection_key, "hr");

    match &output.sheets[3].status {
        SheetStatus::Failed { message } => assert!(message.contains("doesn't exist"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(output.exported_count(), 3);

    // Each sheet reports exactly the statement the database received.
    let executed = connector.executed();
    for sheet in &output.sheets {
        assert!(executed.contains(&sheet.sql), "{} not in {executed:?}", sheet.sql);
    }
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.close_count(), 2);
}

#[tokio::test]
async fn test_connection_failure_fails_sheet_not_run() {
    let connector = Arc::new(
        MockConnector::new().fail_connect(Some("ECONNREFUSED"), "connect ECONNREFUSED 10.0.0.1:1433"),
    );
    let mut manager = ConnectionManager::with_connector(store(), Language::Kr, connector.clone());
    let definition = QueryDefinition::parse(
        "{ excel: { db: 'erp' }, sheets: [ { name: 'A', query: 'SELECT 1' }, { name: 'B', query: 'SELECT 2' } ] }",
        SourceFormat::Json,
    )
    .unwrap();

    let output = Pipeline::new(definition, PipelineOptions::default())
        .with_substitutor(Substitutor::new().with_env(|_| None))
        .run(&mut manager)
        .await
        .unwrap();

    assert_eq!(output.sheets.len(), 2);
    assert!(output.sheets.iter().all(|s| !s.is_exported()));
    assert!(connector.executed().is_empty());
    assert!(manager.open_connections().is_empty());
}
