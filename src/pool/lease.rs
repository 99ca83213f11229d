use std::sync::Arc;

use crate::backend::BackendConnection;
use crate::context::Context;

use super::{ConnectionPool, PoolError};

/// Exclusive claim on a pooled connection
///
/// The connection goes back to its pool exactly once: on `release`,
/// `discard`, or drop (which releases).
pub struct Lease {
    conn: Option<Box<dyn BackendConnection>>,
    pool: Arc<dyn ConnectionPool>,
}

impl Lease {
    pub async fn acquire(pool: &Arc<dyn ConnectionPool>, ctx: &Context) -> Result<Self, PoolError> {
        let conn = pool.acquire(ctx).await?;
        Ok(Self {
            conn: Some(conn),
            pool: Arc::clone(pool),
        })
    }

    pub fn conn(&mut self) -> &mut dyn BackendConnection {
        self.conn
            .as_deref_mut()
            .expect("lease holds its connection until consumed")
    }

    /// Return the connection for reuse
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }

    /// Close the connection and free its slot
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
