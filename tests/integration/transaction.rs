//! Transaction handle integration tests

use std::time::Duration;

use athena_node::{Context, Value};

use crate::{count_rows, fresh_table, live_node, skip_if_not_enabled, verify_conn};

#[tokio::test]
async fn test_transaction_commit() {
    skip_if_not_enabled!();

    let mut verify = verify_conn();
    fresh_table(&mut verify, "it_tx_commit");

    let node = live_node("it-tx-commit", 2);
    let ctx = Context::background();
    let (mut tx, _) = node.begin(&ctx).await.expect("BEGIN should succeed");
    tx.execute_sql(
        &ctx,
        "INSERT INTO it_tx_commit (id, name) VALUES (?, ?)",
        &[Value::from(1i64), Value::from("a")],
    )
    .await
    .expect("INSERT should succeed");

    assert_eq!(count_rows(&mut verify, "it_tx_commit"), 0, "Uncommitted row must not be visible");
    tx.commit(&ctx).await.expect("COMMIT should succeed");
    assert_eq!(count_rows(&mut verify, "it_tx_commit"), 1);
    assert_eq!(node.in_use(), 0);
    node.close().await;
}

#[tokio::test]
async fn test_transaction_rollback() {
    skip_if_not_enabled!();

    let mut verify = verify_conn();
    fresh_table(&mut verify, "it_tx_rollback");

    let node = live_node("it-tx-rollback", 2);
    let ctx = Context::background();
    let (mut tx, _) = node.begin(&ctx).await.expect("BEGIN should succeed");
    tx.query(&ctx, "INSERT INTO it_tx_rollback (id, name) VALUES (1, 'a')")
        .await
        .expect("INSERT should succeed");

    // The row is visible inside the transaction
    let (result, _) = tx
        .query(&ctx, "SELECT COUNT(*) FROM it_tx_rollback")
        .await
        .expect("SELECT should succeed");
    assert_eq!(result.rows[0][0].as_i64(), Some(1));
    assert!(result.in_transaction());

    tx.rollback(&ctx).await.expect("ROLLBACK should succeed");
    assert_eq!(count_rows(&mut verify, "it_tx_rollback"), 0, "Data should be rolled back");
    node.close().await;
}

#[tokio::test]
async fn test_dropped_transaction_is_abandoned() {
    skip_if_not_enabled!();

    let mut verify = verify_conn();
    fresh_table(&mut verify, "it_tx_dropped");

    let node = live_node("it-tx-dropped", 1);
    let ctx = Context::background();
    let (mut tx, _) = node.begin(&ctx).await.expect("BEGIN should succeed");
    tx.query(&ctx, "INSERT INTO it_tx_dropped (id, name) VALUES (1, 'a')")
        .await
        .expect("INSERT should succeed");
    drop(tx);

    // The connection was closed rather than pooled
    assert_eq!(node.active(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count_rows(&mut verify, "it_tx_dropped"), 0);
    node.close().await;
}
