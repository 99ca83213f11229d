//! Node operations against a live backend

use std::time::Duration;

use athena_node::{Context, NodeError, NodeStatus, Statement, Value};
use mysql::prelude::*;

use crate::{count_rows, fresh_table, live_node, skip_if_not_enabled, verify_conn};

#[tokio::test]
async fn test_query_text_result() {
    skip_if_not_enabled!();

    let node = live_node("it-query", 2);
    let (result, warnings) = node
        .query(&Context::background(), "SELECT 1 + 1 AS two, 'x' AS label")
        .await
        .expect("SELECT should succeed");

    assert_eq!(warnings, 0);
    assert_eq!(result.fields.len(), 2);
    assert_eq!(result.fields[0].name, "two");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].as_i64(), Some(2));
    assert_eq!(result.rows[0][1].as_str(), Some("x"));
    assert_eq!(node.in_flight(), 0);
    node.close().await;
}

#[tokio::test]
async fn test_prepared_insert_visible_to_other_sessions() {
    skip_if_not_enabled!();

    let mut verify = verify_conn();
    fresh_table(&mut verify, "it_node_prepared");

    let node = live_node("it-prepared", 2);
    let ctx = Context::background();
    let (result, _) = node
        .execute_sql(
            &ctx,
            "INSERT INTO it_node_prepared (id, name) VALUES (?, ?)",
            &[Value::from(1i64), Value::from("alpha")],
        )
        .await
        .expect("INSERT should succeed");
    assert_eq!(result.affected_rows, 1);

    let stmt = Statement::with_args("INSERT INTO it_node_prepared (id, name) VALUES (?, ?)", [
        Value::from(2i64),
        Value::from("beta"),
    ]);
    node.execute_stmt(&ctx, &stmt).await.expect("INSERT should succeed");

    let (rows, _) = node
        .execute_sql(&ctx, "SELECT name FROM it_node_prepared WHERE id = ?", &[Value::from(2i64)])
        .await
        .expect("SELECT should succeed");
    assert_eq!(rows.rows[0][0].as_str(), Some("beta"));

    assert_eq!(count_rows(&mut verify, "it_node_prepared"), 2);
    node.close().await;
}

#[tokio::test]
async fn test_server_error_keeps_connection() {
    skip_if_not_enabled!();

    let node = live_node("it-error", 1);
    let ctx = Context::background();
    let err = node
        .query(&ctx, "SELECT * FROM it_node_missing_table")
        .await
        .unwrap_err();
    match err {
        NodeError::Backend(e) => assert_eq!(e.server_code(), Some(1146)),
        other => panic!("unexpected error: {:?}", other),
    }

    node.query(&ctx, "SELECT 1").await.expect("connection still usable");
    assert_eq!(node.active(), 1);
    node.close().await;
}

#[tokio::test]
async fn test_use_db_and_field_list() {
    skip_if_not_enabled!();

    let mut verify = verify_conn();
    fresh_table(&mut verify, "it_node_fields");
    let db: String = verify
        .query_first("SELECT DATABASE()")
        .expect("SELECT should succeed")
        .expect("a default database");

    let node = live_node("it-fields", 1);
    let ctx = Context::background();
    node.use_db(&ctx, &db).await.expect("USE should succeed");
    let fields = node
        .execute_field_list(&ctx, "it_node_fields", "")
        .await
        .expect("field list should succeed");
    let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name"]);
    node.close().await;
}

#[tokio::test]
async fn test_monitor_keeps_live_node_healthy() {
    skip_if_not_enabled!();

    let node = live_node("it-health", 1);
    node.check_alive().await.expect("backend should answer ping");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(node.status(), NodeStatus::Healthy);
    node.close().await;
    assert!(node.is_closed());
}
