//! Physical backend sessions
//!
//! `BackendConnection` is the capability surface a node drives; the pool
//! only ever sees boxed trait objects produced by a `ConnectionFactory`.

mod connection;
mod result;

use async_trait::async_trait;

pub use connection::{MysqlConnection, MysqlConnector};
#[cfg(test)]
pub(crate) use connection::tests as wire_fixtures;
pub use result::QueryResult;

pub use crate::protocol::{Field, Value};
use crate::context::{Context, ContextError};

/// One physical session to a backend database
#[async_trait]
pub trait BackendConnection: Send {
    /// Round-trip liveness check
    async fn ping(&mut self, ctx: &Context) -> Result<(), ConnectionError>;

    /// Change the session's default schema
    async fn select_schema(&mut self, ctx: &Context, schema: &str) -> Result<(), ConnectionError>;

    /// Send a field-list request; the definitions are read separately
    async fn request_field_list(
        &mut self,
        ctx: &Context,
        table: &str,
        wildcard: &str,
    ) -> Result<(), ConnectionError>;

    /// Read the column definitions answering a field-list request
    async fn read_column_definitions(&mut self, ctx: &Context) -> Result<Vec<Field>, ConnectionError>;

    /// Execute a statement and return its result with the server warning count
    ///
    /// With `want_fields` unset, column definitions are read but not kept.
    async fn execute_with_warning_count(
        &mut self,
        ctx: &Context,
        sql: &str,
        want_fields: bool,
    ) -> Result<(QueryResult, u16), ConnectionError>;

    /// Prepare `sql`, execute it once with positional `args`, then close it
    async fn prepare_and_execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), ConnectionError>;

    /// False once the session saw an I/O or protocol failure
    fn is_usable(&self) -> bool;

    async fn execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        want_fields: bool,
    ) -> Result<QueryResult, ConnectionError> {
        self.execute_with_warning_count(ctx, sql, want_fields)
            .await
            .map(|(result, _)| result)
    }
}

/// Opens new backend sessions for a pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError>;
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Server error {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
    },

    #[error("Connection disconnected")]
    Disconnected,

    #[error("Command interrupted: {0}")]
    Canceled(ContextError),

    #[error("Statement expects {expected} parameters, got {actual}")]
    ParamCount { expected: usize, actual: usize },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ConnectionError {
    /// Whether the session can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::Disconnected
                | ConnectionError::Canceled(_)
        )
    }

    /// MySQL error code for server-reported errors
    pub fn server_code(&self) -> Option<u16> {
        match self {
            ConnectionError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}
