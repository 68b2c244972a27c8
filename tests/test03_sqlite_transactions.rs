#![cfg(feature = "sqlite")]

mod common;

use common::{connected, init_tracing};
use serde_json::json;
use sql_resilient::prelude::*;
use tempfile::TempDir;

async fn ledger_manager(dir: &TempDir) -> ConnectionManager {
    init_tracing();
    let path = dir.path().join("ledger.db");
    let manager = ConnectionManager::new(
        SqliteConnector,
        ConnectionParams::new().database(path.to_string_lossy()),
        DriverOptions::new(),
    );
    manager.on_migrate(|m| async move {
        m.execute_sql(
            "CREATE TABLE IF NOT EXISTS ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                amount INTEGER,
                meta TEXT
            )",
            &[],
        )
        .await
        .map(|_| ())
    });
    manager.connect().unwrap();
    connected(&manager).await;
    manager
}

async fn count(manager: &ConnectionManager) -> i64 {
    let result = manager
        .execute_sql("SELECT COUNT(*) AS n FROM ledger", &[])
        .await
        .unwrap();
    result.rows[0].get("n").and_then(SqlValue::as_int).unwrap()
}

#[tokio::test]
async fn insert_reports_last_insert_id_and_select_returns_rows() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let inserted = manager
        .execute_sql(
            "INSERT INTO ledger (name, amount) VALUES (?, ?)",
            &[SqlValue::from("rent"), SqlValue::Int(1200)],
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);
    assert_eq!(inserted.last_insert_id, Some(1));

    let rows = manager
        .statement("SELECT id, name, amount FROM ledger WHERE name = ?")
        .execute(&[SqlValue::from("rent")])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0].get("amount"), Some(&SqlValue::Int(1200)));
    assert_eq!(
        rows.column_names().map(|names| names.as_slice().to_vec()),
        Some(vec!["id".to_string(), "name".to_string(), "amount".to_string()])
    );
}

#[tokio::test]
async fn transaction_commits_when_body_succeeds() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let total = manager
        .execute_in_transaction(|db| async move {
            db.execute_sql(
                "INSERT INTO ledger (name, amount) VALUES (?, ?)",
                &[SqlValue::from("coffee"), SqlValue::Int(4)],
            )
            .await?;
            db.statement("INSERT INTO ledger (name, amount) VALUES (?, ?)")
                .execute(&[SqlValue::from("bagel"), SqlValue::Int(3)])
                .await?;
            Ok::<_, DriverError>(7)
        })
        .await
        .unwrap();

    assert_eq!(total, 7);
    assert_eq!(count(&manager).await, 2);
}

#[tokio::test]
async fn transaction_rolls_back_and_returns_the_body_error() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let err = manager
        .execute_in_transaction(|db| async move {
            db.execute_sql(
                "INSERT INTO ledger (name, amount) VALUES (?, ?)",
                &[SqlValue::from("refund"), SqlValue::Int(-4)],
            )
            .await?;
            Err::<(), _>(DriverError::Other("insufficient funds".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Other(ref msg) if msg == "insufficient funds"));
    assert_eq!(count(&manager).await, 0);

    // The connection is usable again after the rollback.
    manager
        .execute_in_transaction(|db| async move {
            db.execute_sql("INSERT INTO ledger (name) VALUES ('after')", &[])
                .await
                .map(|_| ())
        })
        .await
        .unwrap();
    assert_eq!(count(&manager).await, 1);
}

#[tokio::test]
async fn transaction_without_connection_is_not_connected() {
    let manager = ConnectionManager::new(
        SqliteConnector,
        ConnectionParams::new().database(":memory:"),
        DriverOptions::new(),
    );
    let err = manager
        .execute_in_transaction(|_| async { Ok::<_, DriverError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::NotConnected));
}

#[tokio::test]
async fn structured_parameters_bind_as_canonical_json() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let insert = manager.statement("INSERT INTO ledger (name, meta) VALUES (?, ?)");
    insert
        .execute(&[
            SqlValue::from("tagged"),
            SqlValue::from(json!({"tags": ["b", "a"], "b": 1, "a": {"z": true, "y": null}})),
        ])
        .await
        .unwrap();

    let rows = manager
        .execute_sql("SELECT meta FROM ledger WHERE name = 'tagged'", &[])
        .await
        .unwrap();
    assert_eq!(
        rows.rows[0].get("meta").and_then(SqlValue::as_text),
        Some(r#"{"a":{"y":null,"z":true},"b":1,"tags":["b","a"]}"#)
    );
}

#[tokio::test]
async fn invalid_sql_surfaces_as_preparation_error() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let err = manager
        .statement("SELECT * FROM no_such_table")
        .execute(&[])
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::PreparationError { .. }), "unexpected error: {err:?}");
    assert!(manager.is_connected());
}

#[tokio::test]
async fn failed_batch_call_does_not_cancel_its_siblings() {
    let dir = TempDir::new().unwrap();
    let manager = ledger_manager(&dir).await;

    let calls = vec![
        StatementCall::new(manager.statement("SELECT * FROM no_such_table"), vec![]),
        StatementCall::new(
            manager.statement("INSERT INTO ledger (name, amount) VALUES (?, ?)"),
            vec![SqlValue::from("sibling"), SqlValue::Int(1)],
        ),
    ];
    let err = manager.execute_statements(&calls).await.unwrap_err();

    assert!(matches!(err, DriverError::PreparationError { ref sql, .. } if sql == "SELECT * FROM no_such_table"));
    assert_eq!(count(&manager).await, 1);
}
