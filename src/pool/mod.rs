//! Connection pooling
//!
//! Nodes depend on the `ConnectionPool` capability only; `ResourcePool` is
//! the bounded implementation used in production.

mod lease;
mod resource;
mod stats;

use std::time::Duration;

use async_trait::async_trait;

pub use lease::Lease;
pub use resource::{ResourcePool, ResourcePoolConfig};
pub use stats::PoolStats;

use crate::backend::{BackendConnection, ConnectionError};
use crate::context::{Context, ContextError};

/// A bounded set of backend connections
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    /// Claim a connection, waiting until one frees up or `ctx` finishes
    async fn acquire(&self, ctx: &Context) -> Result<Box<dyn BackendConnection>, PoolError>;

    /// Return a claimed connection for reuse
    fn release(&self, conn: Box<dyn BackendConnection>);

    /// Return a claimed connection's slot and close the connection
    fn discard(&self, conn: Box<dyn BackendConnection>);

    fn set_capacity(&self, capacity: usize) -> Result<(), PoolError>;
    fn set_idle_timeout(&self, timeout: Duration);

    /// Close idle connections and fail every current and future acquire
    fn close(&self);
    fn is_closed(&self) -> bool;

    fn capacity(&self) -> usize;
    /// Slots not claimed by a caller
    fn available(&self) -> usize;
    /// Open connections, idle or claimed
    fn active(&self) -> usize;
    fn in_use(&self) -> usize;
    fn max_capacity(&self) -> usize;
    /// Acquires that had to wait for a slot
    fn wait_count(&self) -> u64;
    fn wait_time(&self) -> Duration;
    fn idle_timeout(&self) -> Duration;
    fn idle_closed(&self) -> u64;
    /// Acquires that left no slot available
    fn exhausted(&self) -> u64;

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
            active: self.active(),
            in_use: self.in_use(),
            max_capacity: self.max_capacity(),
            wait_count: self.wait_count(),
            wait_time: self.wait_time(),
            idle_timeout: self.idle_timeout(),
            idle_closed: self.idle_closed(),
            exhausted: self.exhausted(),
        }
    }

    fn stats_json(&self) -> String {
        self.stats().to_json()
    }
}

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection pool is closed")]
    Closed,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Capacity {requested} is out of range (1..={max})")]
    CapacityOutOfRange { requested: usize, max: usize },

    #[error("Failed to open backend connection: {0}")]
    Connect(#[from] ConnectionError),
}

impl PoolError {
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }

    /// Whether the caller gave up waiting (canceled or deadline)
    pub fn is_context(&self) -> bool {
        matches!(self, PoolError::Context(_))
    }
}
