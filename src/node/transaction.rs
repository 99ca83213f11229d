use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{info_span, warn, Instrument};

use crate::backend::{QueryResult, Value};
use crate::context::Context;
use crate::pool::Lease;

use super::{truncate_sql, BackendNode, Exec, NodeError, Statement, SPAN_SQL_LEN};

/// A connection moved out of its pool for the length of a transaction
///
/// Created by `BackendNode::begin` or `BackendNode::xa_start`. `commit`
/// and `rollback` close the handle and return the connection; dropping an
/// open handle closes the connection instead, since the backend may still
/// hold the transaction open.
pub struct Transaction {
    lease: Option<Lease>,
    node: Weak<BackendNode>,
    node_name: String,
}

impl Transaction {
    pub(super) fn new(lease: Lease, node: &Arc<BackendNode>) -> Self {
        Self {
            lease: Some(lease),
            node: Arc::downgrade(node),
            node_name: node.name().to_string(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }

    pub async fn query(&mut self, ctx: &Context, sql: &str) -> Result<(QueryResult, u16), NodeError> {
        let span = info_span!("tx.query", db = %self.node_name, sql = %truncate_sql(sql, SPAN_SQL_LEN));
        self.run(ctx, "tx_query", Exec::Query(sql))
            .instrument(span)
            .await
    }

    pub async fn execute_stmt(
        &mut self,
        ctx: &Context,
        stmt: &Statement,
    ) -> Result<(QueryResult, u16), NodeError> {
        let args = stmt.positional_args()?;
        let span = info_span!("tx.exec_stmt", db = %self.node_name, sql = %truncate_sql(stmt.sql(), SPAN_SQL_LEN));
        self.run(ctx, "tx_execute_stmt", Exec::Prepared(stmt.sql(), &args))
            .instrument(span)
            .await
    }

    pub async fn execute_sql(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), NodeError> {
        let span = info_span!("tx.exec_sql", db = %self.node_name, sql = %truncate_sql(sql, SPAN_SQL_LEN));
        self.run(ctx, "tx_execute_sql", Exec::Prepared(sql, args))
            .instrument(span)
            .await
    }

    pub async fn commit(&mut self, ctx: &Context) -> Result<QueryResult, NodeError> {
        let span = info_span!("tx.commit", db = %self.node_name);
        self.finish(ctx, "commit", "COMMIT").instrument(span).await
    }

    pub async fn rollback(&mut self, ctx: &Context) -> Result<QueryResult, NodeError> {
        let span = info_span!("tx.rollback", db = %self.node_name);
        self.finish(ctx, "rollback", "ROLLBACK").instrument(span).await
    }

    async fn run(
        &mut self,
        ctx: &Context,
        op: &'static str,
        exec: Exec<'_>,
    ) -> Result<(QueryResult, u16), NodeError> {
        let node = self
            .node
            .upgrade()
            .ok_or_else(|| NodeError::NodeGone(self.node_name.clone()))?;
        let lease = self.lease.as_mut().ok_or(NodeError::TxClosed)?;
        node.tracked(op, node.run_filtered(ctx, lease.conn(), &exec))
            .await
    }

    /// Send the closing statement and give the connection back either way
    async fn finish(&mut self, ctx: &Context, op: &'static str, sql: &str) -> Result<QueryResult, NodeError> {
        let mut lease = self.lease.take().ok_or(NodeError::TxClosed)?;
        let node = self.node.upgrade();
        let outcome = match &node {
            Some(node) => node.tracked(op, end_transaction(&mut lease, ctx, sql)).await,
            None => end_transaction(&mut lease, ctx, sql).await,
        };
        lease.release();
        outcome
    }
}

async fn end_transaction(lease: &mut Lease, ctx: &Context, sql: &str) -> Result<QueryResult, NodeError> {
    Ok(lease.conn().execute(ctx, sql, false).await?)
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("node_name", &self.node_name)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            warn!(node = %self.node_name, "Transaction dropped while open, closing its connection");
            lease.discard();
        }
    }
}
