//! Backend node abstraction for the Athena database mesh
//!
//! A [`node::BackendNode`] stands for one database instance behind the
//! gateway. It owns a bounded connection pool, watches the instance with a
//! debounced health monitor, runs pre/post filters around statements and
//! hands connections over to transactions.

pub mod backend;
pub mod config;
pub mod context;
pub mod filter;
pub mod group;
pub mod health;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod protocol;

#[cfg(test)]
mod testing;

pub use backend::{BackendConnection, ConnectionError, ConnectionFactory, MysqlConnector, QueryResult, Value};
pub use context::{Context, ContextError};
pub use filter::{FilterError, PostFilter, PreFilter};
pub use group::NodeGroup;
pub use health::NodeStatus;
pub use node::{BackendNode, NodeError, Statement, Transaction};
pub use pool::{ConnectionPool, PoolError, ResourcePool, ResourcePoolConfig};
