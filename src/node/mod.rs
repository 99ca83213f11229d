//! Backend node: one database instance as seen by the gateway
//!
//! A node owns the connection pool for its instance, runs the health
//! monitor, carries the role and routing weights read by the load
//! balancer, and runs the filter chain around every statement.

mod error;
mod inflight;
mod statement;
mod transaction;

use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use error::NodeError;
pub use inflight::{InFlight, InFlightGuard};
pub use statement::Statement;
pub use transaction::Transaction;

use crate::backend::{BackendConnection, ConnectionError, Field, QueryResult, Value};
use crate::context::Context;
use crate::filter::{FilterChain, PostFilter, PreFilter};
use crate::health::{ping_once, HealthMonitor, HealthState, NodeStatus};
use crate::metrics::metrics;
use crate::pool::{ConnectionPool, Lease, PoolError, PoolStats};
use crate::protocol::Command;

/// Longest SQL prefix recorded on spans
const SPAN_SQL_LEN: usize = 256;

/// Truncate SQL for logging, cutting on a character boundary
pub(crate) fn truncate_sql(sql: &str, max_len: usize) -> Cow<'_, str> {
    if sql.len() <= max_len {
        return Cow::Borrowed(sql);
    }
    let mut end = max_len;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", &sql[..end]))
}

/// The statement a node or transaction sends to its connection
pub(crate) enum Exec<'a> {
    Query(&'a str),
    Prepared(&'a str, &'a [Value]),
}

impl Exec<'_> {
    async fn run(
        &self,
        ctx: &Context,
        conn: &mut dyn BackendConnection,
    ) -> Result<(QueryResult, u16), ConnectionError> {
        match self {
            Exec::Query(sql) => conn.execute_with_warning_count(ctx, sql, true).await,
            Exec::Prepared(sql, args) => conn.prepare_and_execute(ctx, sql, args).await,
        }
    }
}

/// Point-in-time view of a node for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    pub status: NodeStatus,
    pub read_weight: u32,
    pub write_weight: u32,
    pub in_flight: i64,
    pub closed: bool,
    pub pool: PoolStats,
}

pub struct BackendNode {
    name: String,
    master_name: Option<String>,
    ping_interval: Duration,
    health: Arc<HealthState>,
    read_weight: AtomicU32,
    write_weight: AtomicU32,
    filters: FilterChain,
    in_flight: InFlight,
    pool: Arc<dyn ConnectionPool>,
    shutdown: CancellationToken,
    closed: OnceCell<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl BackendNode {
    /// Create a node around an already sized pool and start its health monitor
    ///
    /// A node without a master name (or with an empty one) is a master.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        master_name: Option<String>,
        ping_interval: Duration,
        flip_threshold: u32,
        pool: Arc<dyn ConnectionPool>,
    ) -> Arc<Self> {
        let name = name.into();
        let master_name = master_name.filter(|m| !m.is_empty());
        let health = Arc::new(HealthState::new(flip_threshold));
        let shutdown = CancellationToken::new();

        let monitor = HealthMonitor::new(
            name.clone(),
            Arc::clone(&pool),
            Arc::clone(&health),
            ping_interval,
        )
        .spawn(shutdown.clone());
        metrics().set_node_status(&name, health.status());

        info!(
            node = %name,
            master = master_name.as_deref().unwrap_or("-"),
            ping_interval_ms = ping_interval.as_millis() as u64,
            flip_threshold = health.flip_threshold(),
            "Backend node started"
        );

        Arc::new(Self {
            in_flight: InFlight::new(name.clone()),
            name,
            master_name,
            ping_interval,
            health,
            read_weight: AtomicU32::new(0),
            write_weight: AtomicU32::new(0),
            filters: FilterChain::new(),
            pool,
            shutdown,
            closed: OnceCell::new(),
            monitor: Mutex::new(Some(monitor)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> NodeStatus {
        self.health.status()
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }

    // ---- role and weights ----

    pub fn is_master(&self) -> bool {
        self.master_name.is_none()
    }

    /// Empty for masters
    pub fn master_name(&self) -> &str {
        self.master_name.as_deref().unwrap_or("")
    }

    /// Only masters take writes; the call is ignored on replicas
    pub fn set_write_weight(&self, weight: u32) {
        if !self.is_master() {
            debug!(node = %self.name, weight, "Ignoring write weight on replica");
            return;
        }
        self.write_weight.store(weight, Ordering::Relaxed);
    }

    pub fn set_read_weight(&self, weight: u32) {
        self.read_weight.store(weight, Ordering::Relaxed);
    }

    pub fn write_weight(&self) -> u32 {
        self.write_weight.load(Ordering::Relaxed)
    }

    pub fn read_weight(&self) -> u32 {
        self.read_weight.load(Ordering::Relaxed)
    }

    // ---- filters ----

    pub fn set_pre_filters(&self, filters: Vec<Arc<dyn PreFilter>>) {
        self.filters.set_pre_filters(filters);
    }

    pub fn set_post_filters(&self, filters: Vec<Arc<dyn PostFilter>>) {
        self.filters.set_post_filters(filters);
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    // ---- pool delegation ----

    pub fn set_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        self.pool.set_capacity(capacity)
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.pool.set_idle_timeout(timeout);
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    pub fn active(&self) -> usize {
        self.pool.active()
    }

    pub fn in_use(&self) -> usize {
        self.pool.in_use()
    }

    pub fn max_capacity(&self) -> usize {
        self.pool.max_capacity()
    }

    pub fn wait_count(&self) -> u64 {
        self.pool.wait_count()
    }

    pub fn wait_time(&self) -> Duration {
        self.pool.wait_time()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.pool.idle_timeout()
    }

    pub fn idle_closed(&self) -> u64 {
        self.pool.idle_closed()
    }

    pub fn exhausted(&self) -> u64 {
        self.pool.exhausted()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn stats_json(&self) -> String {
        self.pool.stats_json()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            role: if self.is_master() { "master" } else { "replica" },
            master: self.master_name.clone(),
            status: self.status(),
            read_weight: self.read_weight(),
            write_weight: self.write_weight(),
            in_flight: self.in_flight(),
            closed: self.is_closed(),
            pool: self.stats(),
        }
    }

    // ---- liveness ----

    /// Ping a pooled connection now; the result does not affect `status`
    pub async fn check_alive(&self) -> Result<(), NodeError> {
        self.ping(&Context::background()).await
    }

    /// Like `check_alive`, bounded by `ctx`
    pub async fn ping(&self, ctx: &Context) -> Result<(), NodeError> {
        ping_once(&self.pool, ctx)
            .await
            .map_err(|e| NodeError::from_ping(&self.name, e))
    }

    // ---- statements ----

    #[instrument(name = "db.use", skip_all, fields(db = %self.name, schema = %schema))]
    pub async fn use_db(&self, ctx: &Context, schema: &str) -> Result<(), NodeError> {
        self.tracked("use_db", self.select_schema(ctx, schema)).await
    }

    #[instrument(name = "db.exec_field_list", skip_all, fields(db = %self.name, table = %table))]
    pub async fn execute_field_list(
        &self,
        ctx: &Context,
        table: &str,
        wildcard: &str,
    ) -> Result<Vec<Field>, NodeError> {
        self.tracked("field_list", self.field_list(ctx, table, wildcard))
            .await
    }

    #[instrument(name = "db.query", skip_all, fields(db = %self.name, sql = %truncate_sql(sql, SPAN_SQL_LEN)))]
    pub async fn query(&self, ctx: &Context, sql: &str) -> Result<(QueryResult, u16), NodeError> {
        self.execute(ctx, "query", Exec::Query(sql), true).await
    }

    /// Query with a background context, skipping the filter chain
    pub async fn query_directly(&self, sql: &str) -> Result<(QueryResult, u16), NodeError> {
        let ctx = Context::background().with_command(Command::Query);
        self.execute(&ctx, "query_directly", Exec::Query(sql), false)
            .await
    }

    /// Prepare and execute `stmt` with its bind variables
    #[instrument(name = "db.exec_stmt", skip_all, fields(db = %self.name, sql = %truncate_sql(stmt.sql(), SPAN_SQL_LEN)))]
    pub async fn execute_stmt(
        &self,
        ctx: &Context,
        stmt: &Statement,
    ) -> Result<(QueryResult, u16), NodeError> {
        let args = stmt.positional_args()?;
        self.execute(ctx, "execute_stmt", Exec::Prepared(stmt.sql(), &args), true)
            .await
    }

    #[instrument(name = "db.exec_sql", skip_all, fields(db = %self.name, sql = %truncate_sql(sql, SPAN_SQL_LEN)))]
    pub async fn execute_sql(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), NodeError> {
        self.execute(ctx, "execute_sql", Exec::Prepared(sql, args), true)
            .await
    }

    /// Prepared execution with a background context, skipping the filter chain
    pub async fn execute_sql_directly(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), NodeError> {
        let ctx = Context::background().with_command(Command::StmtExecute);
        self.execute(&ctx, "execute_sql_directly", Exec::Prepared(sql, args), false)
            .await
    }

    // ---- transactions ----

    /// Start a local transaction on a connection the returned handle owns
    #[instrument(name = "db.local_transaction_begin", skip_all, fields(db = %self.name))]
    pub async fn begin(self: &Arc<Self>, ctx: &Context) -> Result<(Transaction, QueryResult), NodeError> {
        self.start_transaction(ctx, "begin", "START TRANSACTION")
            .await
    }

    /// Issue an XA START statement and hand its connection to a transaction
    #[instrument(name = "db.xa_start", skip_all, fields(db = %self.name, sql = %truncate_sql(sql, SPAN_SQL_LEN)))]
    pub async fn xa_start(
        self: &Arc<Self>,
        ctx: &Context,
        sql: &str,
    ) -> Result<(Transaction, QueryResult), NodeError> {
        self.start_transaction(ctx, "xa_start", sql).await
    }

    async fn start_transaction(
        self: &Arc<Self>,
        ctx: &Context,
        op: &'static str,
        sql: &str,
    ) -> Result<(Transaction, QueryResult), NodeError> {
        let (lease, result) = self.tracked(op, self.claim_for_transaction(ctx, op, sql)).await?;
        debug!(node = %self.name, op, "Transaction started");
        Ok((Transaction::new(lease, self), result))
    }

    // ---- shutdown ----

    /// Stop the monitor, wait for in-flight requests, then close the pool
    ///
    /// The first call does the work; concurrent and later calls return once
    /// it has finished.
    pub async fn close(&self) {
        self.closed.get_or_init(|| self.shut_down()).await;
    }

    async fn shut_down(&self) {
        self.shutdown.cancel();

        let monitor = self.monitor.lock().take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                warn!(node = %self.name, error = %e, "Health monitor task failed");
            }
        }

        let pending = self.in_flight();
        if pending > 0 {
            info!(node = %self.name, in_flight = pending, "Waiting for in-flight requests");
        }
        self.in_flight.wait_drained().await;
        self.pool.close();
        info!(node = %self.name, "Backend node closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    // ---- internals ----

    async fn lease(&self, ctx: &Context, op: &'static str) -> Result<Lease, NodeError> {
        Lease::acquire(&self.pool, ctx)
            .await
            .map_err(|e| NodeError::acquire(&self.name, op, e))
    }

    /// Count `fut` as in flight and record its outcome
    pub(crate) async fn tracked<T, F>(&self, op: &'static str, fut: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        let _guard = self.in_flight.enter();
        let started = Instant::now();
        let outcome = fut.await;

        metrics().record_operation(&self.name, op, started.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            metrics().record_operation_error(&self.name, op, e.kind());
            debug!(node = %self.name, op, error = %e, "Node operation failed");
        }
        outcome
    }

    async fn execute(
        &self,
        ctx: &Context,
        op: &'static str,
        exec: Exec<'_>,
        filtered: bool,
    ) -> Result<(QueryResult, u16), NodeError> {
        self.tracked(op, self.execute_leased(ctx, op, &exec, filtered))
            .await
    }

    async fn execute_leased(
        &self,
        ctx: &Context,
        op: &'static str,
        exec: &Exec<'_>,
        filtered: bool,
    ) -> Result<(QueryResult, u16), NodeError> {
        let mut lease = self.lease(ctx, op).await?;
        let outcome = if filtered {
            self.run_filtered(ctx, lease.conn(), exec).await
        } else {
            exec.run(ctx, lease.conn()).await.map_err(NodeError::from)
        };
        lease.release();
        outcome
    }

    async fn select_schema(&self, ctx: &Context, schema: &str) -> Result<(), NodeError> {
        let mut lease = self.lease(ctx, "use_db").await?;
        lease.conn().select_schema(ctx, schema).await?;
        lease.release();
        Ok(())
    }

    async fn field_list(
        &self,
        ctx: &Context,
        table: &str,
        wildcard: &str,
    ) -> Result<Vec<Field>, NodeError> {
        let mut lease = self.lease(ctx, "field_list").await?;
        lease.conn().request_field_list(ctx, table, wildcard).await?;
        let fields = lease.conn().read_column_definitions(ctx).await?;
        lease.release();
        Ok(fields)
    }

    /// The lease goes back to the pool if the start statement fails
    async fn claim_for_transaction(
        &self,
        ctx: &Context,
        op: &'static str,
        sql: &str,
    ) -> Result<(Lease, QueryResult), NodeError> {
        let mut lease = self.lease(ctx, op).await?;
        match lease.conn().execute(ctx, sql, false).await {
            Ok(result) => Ok((lease, result)),
            Err(e) => {
                lease.release();
                Err(e.into())
            }
        }
    }

    /// Pre-filters, the statement, then post-filters
    pub(crate) async fn run_filtered(
        &self,
        ctx: &Context,
        conn: &mut dyn BackendConnection,
        exec: &Exec<'_>,
    ) -> Result<(QueryResult, u16), NodeError> {
        self.filters.run_pre(ctx, conn).await?;
        let (result, warnings) = exec.run(ctx, conn).await?;
        self.filters.run_post(ctx, &result, conn).await?;
        Ok((result, warnings))
    }
}

impl Drop for BackendNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for BackendNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendNode")
            .field("name", &self.name)
            .field("master_name", &self.master_name)
            .field("status", &self.status())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
