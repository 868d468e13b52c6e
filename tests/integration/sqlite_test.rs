//! Pipeline tests against a real SQLite database file.

use db_sheets::config::ConnectionStore;
use db_sheets::connection::ConnectionManager;
use db_sheets::db::{Language, Value};
use db_sheets::definition::{QueryDefinition, SourceFormat};
use db_sheets::pipeline::{AggregateEntry, Pipeline, PipelineOptions, SheetStatus};
use db_sheets::vars::Substitutor;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::{tempdir, TempDir};

const SEED: &[&str] = &[
    "CREATE TABLE dept (code TEXT PRIMARY KEY, name TEXT NOT NULL, active INTEGER NOT NULL)",
    "CREATE TABLE staff (id INTEGER PRIMARY KEY, name TEXT, dept TEXT, salary INTEGER)",
    "INSERT INTO dept VALUES ('HR', 'Human Resources', 1), ('IT', 'Technology', 1), ('OLD', 'Archive', 0)",
    "INSERT INTO staff VALUES (1, 'Kim', 'HR', 100), (2, 'Lee', 'IT', 200), (3, 'Park', 'IT', 300), (4, 'O''Neil', 'OLD', 400), (5, 'Choi', 'IT', 250)",
];

/// Writes a connection config file and returns a manager with a seeded database.
async fn seeded_manager() -> (ConnectionManager, TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("company.db");
    let config_path = dir.path().join("dbinfo.json");
    std::fs::write(
        &config_path,
        json!({ "dbs": { "main": { "type": "sqlite", "database": db_path } } }).to_string(),
    )
    .unwrap();

    let store = ConnectionStore::load_from_file(&config_path).unwrap();
    let mut manager = ConnectionManager::new(store, Language::En);
    for statement in SEED {
        manager.run("main", statement).await.unwrap();
    }
    (manager, dir)
}

#[tokio::test]
async fn test_sqlite_pipeline() {
    let (mut manager, _dir) = seeded_manager().await;

    let definition = QueryDefinition::parse(
        r#"{
            vars: { minSalary: '150' },
            dynamicVars: [
                { name: 'activeDepts', query: 'SELECT code FROM dept WHERE active = 1 ORDER BY code' },
                { name: 'deptNames', type: 'key_value_pairs', query: 'SELECT code, name FROM dept ORDER BY code' },
            ],
            excel: { maxRows: 3 },
            sheets: [
                { name: 'Active staff', aggregateColumn: 'dept', exceptColumns: 'salary',
                  query: 'SELECT id, name, dept, salary FROM staff WHERE dept IN (${activeDepts}) ORDER BY id', maxRows: 10 },
                { name: 'Top earners', query: 'SELECT name FROM staff WHERE salary >= ${minSalary} ORDER BY salary DESC' },
                { name: '${deptNames.IT}', query: "SELECT COUNT(*) AS n, GETDATE() AS at FROM staff WHERE dept = 'IT'" },
                { name: 'Typo', query: 'SELECT * FROM staf' },
            ],
        }"#,
        SourceFormat::Json,
    )
    .unwrap();

    let output = Pipeline::new(definition, PipelineOptions::default())
        .with_substitutor(Substitutor::new().with_env(|_| None))
        .run(&mut manager)
        .await
        .unwrap();

    let active = &output.sheets[0];
    assert_eq!(active.status, SheetStatus::Exported);
    assert_eq!(active.record_count, 4);
    assert_eq!(
        active.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["id", "name", "dept"]
    );
    assert_eq!(
        active.aggregate,
        vec![
            AggregateEntry { key: "IT".into(), count: 3 },
            AggregateEntry { key: "HR".into(), count: 1 },
        ]
    );

    let top = &output.sheets[1];
    assert_eq!(top.sql, "SELECT name FROM staff WHERE salary >= 150 ORDER BY salary DESC LIMIT 3");
    assert_eq!(
        top.rows,
        vec![
            vec![Value::from("O'Neil")],
            vec![Value::from("Park")],
            vec![Value::from("Choi")],
        ]
    );

    let it = &output.sheets[2];
    assert_eq!(it.display_name, "'Technology'");
    // SQLite has no GETDATE(); success means the marker was rewritten.
    assert_eq!(it.status, SheetStatus::Exported);
    assert!(it.sql.contains("datetime('now')"), "{}", it.sql);
    assert_eq!(it.record_count, 1);

    assert!(matches!(output.sheets[3].status, SheetStatus::Failed { .. }));
    assert!(manager.open_connections().is_empty());
}

#[tokio::test]
async fn test_sqlite_empty_result_keeps_columns() {
    let (mut manager, _dir) = seeded_manager().await;
    let result = manager
        .run("main", "SELECT id, name FROM staff WHERE 1 = 0")
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.columns.len(), 2);
    manager.close_all().await;
}
