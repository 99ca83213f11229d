use crate::backend::ConnectionError;
use crate::filter::FilterError;
use crate::health::PingError;
use crate::pool::PoolError;

/// Errors surfaced by node and transaction operations
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node {node}: failed to acquire connection for {op}: {source}")]
    Acquire {
        node: String,
        op: &'static str,
        #[source]
        source: PoolError,
    },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Backend(#[from] ConnectionError),

    #[error("missing bind variable {0}")]
    MissingBindVar(String),

    #[error("transaction is already closed")]
    TxClosed,

    #[error("node {0} no longer exists")]
    NodeGone(String),
}

impl NodeError {
    pub(crate) fn acquire(node: &str, op: &'static str, source: PoolError) -> Self {
        NodeError::Acquire {
            node: node.to_string(),
            op,
            source,
        }
    }

    pub(crate) fn from_ping(node: &str, err: PingError) -> Self {
        match err {
            PingError::Acquire(source) => Self::acquire(node, "ping", source),
            PingError::Backend(e) => NodeError::Backend(e),
        }
    }

    /// Failure class used for metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Acquire { .. } => "acquire",
            NodeError::Filter(_) => "filter",
            NodeError::Backend(_) => "backend",
            NodeError::MissingBindVar(_) => "bind",
            NodeError::TxClosed | NodeError::NodeGone(_) => "transaction",
        }
    }

    /// The pool refused because it is closed
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, NodeError::Acquire { source, .. } if source.is_closed())
    }

    /// The caller's context finished while waiting for a connection
    pub fn is_acquire_timeout(&self) -> bool {
        matches!(self, NodeError::Acquire { source, .. } if source.is_context())
    }
}
