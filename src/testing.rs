//! Recording test doubles for backend connections and filters

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::backend::{BackendConnection, ConnectionError, ConnectionFactory, Field, QueryResult, Value};
use crate::context::Context;
use crate::filter::{FilterError, PostFilter, PreFilter};
use crate::protocol::{ColumnType, Command};

/// Shared script and call log for every connection a factory opens
pub(crate) struct Script {
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
    pub executions: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// New connections hang until the caller gives up
    pub stall_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    /// Statements containing any of these fragments fail with a server error
    pub fail_statements: Mutex<Vec<String>>,
    /// Every statement text that reached a connection, in order
    pub statements: Mutex<Vec<String>>,
    pub args: Mutex<Vec<Vec<Value>>>,
    pub schemas: Mutex<Vec<String>>,
    /// Command tag carried by each statement's context
    pub commands: Mutex<Vec<Option<Command>>>,
    gate: watch::Sender<bool>,
}

impl Script {
    fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            connects: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            stall_connect: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            fail_statements: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            args: Mutex::new(Vec::new()),
            schemas: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn fail_on(&self, fragment: &str) {
        self.fail_statements.lock().push(fragment.to_string());
    }

    /// Block statement execution until `resume`
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    async fn run(&self, ctx: &Context, sql: &str) -> Result<(QueryResult, u16), ConnectionError> {
        self.commands.lock().push(ctx.command());
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.executions.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().push(sql.to_string());
        if self
            .fail_statements
            .lock()
            .iter()
            .any(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(ConnectionError::Server {
                code: 1064,
                state: "42000".into(),
                message: format!("scripted failure for '{}'", sql),
            });
        }
        let result = QueryResult {
            affected_rows: 1,
            rows: vec![vec![Value::from(sql)]],
            ..Default::default()
        };
        Ok((result, 0))
    }
}

pub(crate) struct ScriptedConnection {
    script: Arc<Script>,
    usable: bool,
}

#[async_trait]
impl BackendConnection for ScriptedConnection {
    async fn ping(&mut self, _ctx: &Context) -> Result<(), ConnectionError> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_ping.load(Ordering::SeqCst) {
            return Err(ConnectionError::Io("scripted ping failure".into()));
        }
        Ok(())
    }

    async fn select_schema(&mut self, _ctx: &Context, schema: &str) -> Result<(), ConnectionError> {
        self.script.schemas.lock().push(schema.to_string());
        Ok(())
    }

    async fn request_field_list(
        &mut self,
        _ctx: &Context,
        table: &str,
        _wildcard: &str,
    ) -> Result<(), ConnectionError> {
        self.script.statements.lock().push(format!("FIELD LIST {}", table));
        Ok(())
    }

    async fn read_column_definitions(&mut self, _ctx: &Context) -> Result<Vec<Field>, ConnectionError> {
        Ok(vec![field("id"), field("name")])
    }

    async fn execute_with_warning_count(
        &mut self,
        ctx: &Context,
        sql: &str,
        _want_fields: bool,
    ) -> Result<(QueryResult, u16), ConnectionError> {
        self.script.run(ctx, sql).await
    }

    async fn prepare_and_execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), ConnectionError> {
        self.script.args.lock().push(args.to_vec());
        self.script.run(ctx, sql).await
    }

    fn is_usable(&self) -> bool {
        self.usable
    }
}

fn field(name: &str) -> Field {
    Field {
        schema: "test".into(),
        table: "t".into(),
        org_table: "t".into(),
        name: name.into(),
        org_name: name.into(),
        charset: 33,
        column_length: 11,
        column_type: ColumnType::Long,
        flags: 0,
        decimals: 0,
        default_value: None,
    }
}

pub(crate) struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new() -> (Arc<Self>, Arc<Script>) {
        let script = Arc::new(Script::new());
        let factory = Arc::new(Self {
            script: Arc::clone(&script),
        });
        (factory, script)
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Connect("scripted connect failure".into()));
        }
        if self.script.stall_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
            usable: true,
        }))
    }
}

/// Filter that records invocations and optionally rejects
pub(crate) struct RecordingFilter {
    pub name: &'static str,
    pub calls: AtomicUsize,
    pub reject: AtomicBool,
    /// Shared across filters to check ordering
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingFilter {
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            log: Arc::clone(log),
        })
    }

    pub fn rejecting(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
        let filter = Self::new(name, log);
        filter.reject.store(true, Ordering::SeqCst);
        filter
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn visit(&self) -> Result<(), FilterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(self.name);
        if self.reject.load(Ordering::SeqCst) {
            return Err(FilterError::new(self.name, "rejected by filter"));
        }
        Ok(())
    }
}

#[async_trait]
impl PreFilter for RecordingFilter {
    fn name(&self) -> &str {
        self.name
    }

    async fn pre_handle(&self, _ctx: &Context, _conn: &mut dyn BackendConnection) -> Result<(), FilterError> {
        self.visit()
    }
}

#[async_trait]
impl PostFilter for RecordingFilter {
    fn name(&self) -> &str {
        self.name
    }

    async fn post_handle(
        &self,
        _ctx: &Context,
        _result: &QueryResult,
        _conn: &mut dyn BackendConnection,
    ) -> Result<(), FilterError> {
        self.visit()
    }
}
