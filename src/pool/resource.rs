use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{BackendConnection, ConnectionFactory};
use crate::context::Context;

use super::{ConnectionPool, PoolError};

/// Configuration for a resource pool
#[derive(Debug, Clone)]
pub struct ResourcePoolConfig {
    /// Maximum open connections
    pub capacity: usize,
    /// Upper bound for `set_capacity`
    pub max_capacity: usize,
    /// Idle connections older than this are closed on the next acquire (zero disables)
    pub idle_timeout: Duration,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            max_capacity: 20,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

struct IdleConn {
    conn: Box<dyn BackendConnection>,
    since: Instant,
}

struct PoolState {
    /// Most recently returned last
    idle: Vec<IdleConn>,
    capacity: usize,
    in_use: usize,
    /// Open connections, idle or claimed
    active: usize,
    /// Permits still owed back to a shrink
    retire: usize,
    idle_timeout: Duration,
}

/// Semaphore-bounded pool of lazily opened connections
///
/// A permit stands for one slot a caller may claim. Claimed slots forget
/// their permit and hand it back on release, so the semaphore's count is
/// always `capacity - in_use` once pending shrinks are settled.
pub struct ResourcePool {
    factory: Arc<dyn ConnectionFactory>,
    slots: Semaphore,
    state: Mutex<PoolState>,
    max_capacity: usize,
    closed: AtomicBool,
    wait_count: AtomicU64,
    wait_time_nanos: AtomicU64,
    idle_closed: AtomicU64,
    exhausted: AtomicU64,
}

impl ResourcePool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: ResourcePoolConfig) -> Result<Self, PoolError> {
        if config.capacity == 0 || config.capacity > config.max_capacity {
            return Err(PoolError::CapacityOutOfRange {
                requested: config.capacity,
                max: config.max_capacity,
            });
        }
        Ok(Self {
            factory,
            slots: Semaphore::new(config.capacity),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.capacity),
                capacity: config.capacity,
                in_use: 0,
                active: 0,
                retire: 0,
                idle_timeout: config.idle_timeout,
            }),
            max_capacity: config.max_capacity,
            closed: AtomicBool::new(false),
            wait_count: AtomicU64::new(0),
            wait_time_nanos: AtomicU64::new(0),
            idle_closed: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        })
    }

    async fn claim_slot(&self, ctx: &Context) -> Result<(), PoolError> {
        if let Ok(permit) = self.slots.try_acquire() {
            permit.forget();
            return Ok(());
        }
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if let Some(e) = ctx.err() {
            return Err(e.into());
        }

        let started = Instant::now();
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        let outcome = tokio::select! {
            permit = self.slots.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(PoolError::Closed),
            },
            e = ctx.done() => Err(e.into()),
        };
        let waited = started.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.wait_time_nanos.fetch_add(waited, Ordering::Relaxed);
        outcome
    }

    /// Give back a claimed slot, settling any pending shrink first
    fn return_slot(&self, state: &mut PoolState) {
        state.in_use = state.in_use.saturating_sub(1);
        if state.retire > 0 {
            state.retire -= 1;
        } else if !self.is_closed() {
            self.slots.add_permits(1);
        }
    }

    /// Pop the freshest idle connection, closing any that sat too long
    fn take_idle(&self) -> Option<Box<dyn BackendConnection>> {
        let mut state = self.state.lock();
        let timeout = state.idle_timeout;
        while let Some(idle) = state.idle.pop() {
            if !timeout.is_zero() && idle.since.elapsed() > timeout {
                state.active -= 1;
                self.idle_closed.fetch_add(1, Ordering::Relaxed);
                debug!("Closing idle connection past timeout");
                continue;
            }
            return Some(idle.conn);
        }
        None
    }
}

/// Gives a claimed slot back unless `acquire` hands out a connection
struct ClaimedSlot<'a> {
    pool: &'a ResourcePool,
    armed: bool,
}

impl Drop for ClaimedSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state.lock();
            self.pool.return_slot(&mut state);
        }
    }
}

#[async_trait]
impl ConnectionPool for ResourcePool {
    async fn acquire(&self, ctx: &Context) -> Result<Box<dyn BackendConnection>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        self.claim_slot(ctx).await?;

        {
            let mut state = self.state.lock();
            state.in_use += 1;
            if state.capacity.saturating_sub(state.in_use) == 0 {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut slot = ClaimedSlot {
            pool: self,
            armed: true,
        };
        if let Some(conn) = self.take_idle() {
            slot.armed = false;
            return Ok(conn);
        }

        let connected = tokio::select! {
            r = self.factory.connect() => r,
            e = ctx.done() => {
                debug!(error = %e, "Gave up opening backend connection");
                return Err(e.into());
            }
        };
        match connected {
            Ok(conn) => {
                slot.armed = false;
                self.state.lock().active += 1;
                Ok(conn)
            }
            Err(e) => {
                warn!(error = %e, "Failed to open backend connection");
                Err(e.into())
            }
        }
    }

    fn release(&self, conn: Box<dyn BackendConnection>) {
        if !conn.is_usable() {
            debug!("Connection not usable, discarding");
            self.discard(conn);
            return;
        }

        let mut state = self.state.lock();
        if self.is_closed() || state.active > state.capacity {
            state.active -= 1;
            self.return_slot(&mut state);
            drop(state);
            drop(conn);
            return;
        }
        state.idle.push(IdleConn {
            conn,
            since: Instant::now(),
        });
        self.return_slot(&mut state);
    }

    fn discard(&self, conn: Box<dyn BackendConnection>) {
        let mut state = self.state.lock();
        state.active -= 1;
        self.return_slot(&mut state);
        drop(state);
        drop(conn);
    }

    fn set_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        if capacity == 0 || capacity > self.max_capacity {
            return Err(PoolError::CapacityOutOfRange {
                requested: capacity,
                max: self.max_capacity,
            });
        }
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let mut stale = Vec::new();
        {
            let mut state = self.state.lock();
            let old = state.capacity;
            if capacity > old {
                let grow = capacity - old;
                let settled = grow.min(state.retire);
                state.retire -= settled;
                self.slots.add_permits(grow - settled);
            } else if capacity < old {
                let shrink = old - capacity;
                let forgotten = self.slots.forget_permits(shrink);
                state.retire += shrink - forgotten;
                while state.active > capacity {
                    match state.idle.pop() {
                        Some(idle) => {
                            state.active -= 1;
                            stale.push(idle.conn);
                        }
                        None => break,
                    }
                }
            }
            state.capacity = capacity;
            debug!(old = old, new = capacity, "Pool capacity changed");
        }
        drop(stale);
        Ok(())
    }

    fn set_idle_timeout(&self, timeout: Duration) {
        self.state.lock().idle_timeout = timeout;
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.slots.close();
        let idle = {
            let mut state = self.state.lock();
            let idle = std::mem::take(&mut state.idle);
            state.active -= idle.len();
            idle
        };
        debug!(closed = idle.len(), "Connection pool closed");
        drop(idle);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    fn available(&self) -> usize {
        let state = self.state.lock();
        state.capacity.saturating_sub(state.in_use)
    }

    fn active(&self) -> usize {
        self.state.lock().active
    }

    fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    fn wait_count(&self) -> u64 {
        self.wait_count.load(Ordering::Relaxed)
    }

    fn wait_time(&self) -> Duration {
        Duration::from_nanos(self.wait_time_nanos.load(Ordering::Relaxed))
    }

    fn idle_timeout(&self) -> Duration {
        self.state.lock().idle_timeout
    }

    fn idle_closed(&self) -> u64 {
        self.idle_closed.load(Ordering::Relaxed)
    }

    fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextError;
    use crate::testing::ScriptedFactory;
    use std::sync::atomic::Ordering;

    fn pool(capacity: usize, max_capacity: usize) -> (Arc<ResourcePool>, Arc<crate::testing::Script>) {
        let (factory, script) = ScriptedFactory::new();
        let pool = ResourcePool::new(
            factory,
            ResourcePoolConfig {
                capacity,
                max_capacity,
                idle_timeout: Duration::from_secs(60),
            },
        )
        .unwrap();
        (Arc::new(pool), script)
    }

    #[tokio::test]
    async fn test_reuses_idle_connections() {
        let (pool, script) = pool(2, 4);
        let ctx = Context::background();

        let conn = pool.acquire(&ctx).await.unwrap();
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.available(), 1);
        pool.release(conn);

        let conn = pool.acquire(&ctx).await.unwrap();
        pool.release(conn);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool(1, 1);
        let held = pool.acquire(&Context::background()).await.unwrap();
        assert_eq!(pool.exhausted(), 1);

        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let err = pool.acquire(&ctx).await.err().unwrap();
        assert!(matches!(err, PoolError::Context(ContextError::DeadlineExceeded)));
        assert_eq!(pool.wait_count(), 1);
        assert!(pool.wait_time() >= Duration::from_millis(100));

        pool.release(held);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let (pool, _) = pool(1, 1);
        let held = pool.acquire(&Context::background()).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&Context::background()).await.is_ok() })
        };
        tokio::task::yield_now().await;
        pool.release(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let (pool, _) = pool(1, 1);
        let held = pool.acquire(&Context::background()).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&Context::background()).await.err() })
        };
        tokio::task::yield_now().await;
        pool.close();
        assert!(matches!(waiter.await.unwrap(), Some(PoolError::Closed)));
        assert!(pool.is_closed());

        pool.release(held);
        assert_eq!(pool.active(), 0);
        assert!(matches!(
            pool.acquire(&Context::background()).await.err(),
            Some(PoolError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_stale_connections() {
        let (pool, script) = pool(2, 2);
        pool.set_idle_timeout(Duration::from_secs(1));
        let conn = pool.acquire(&Context::background()).await.unwrap();
        pool.release(conn);

        tokio::time::advance(Duration::from_secs(2)).await;
        let conn = pool.acquire(&Context::background()).await.unwrap();
        pool.release(conn);

        assert_eq!(pool.idle_closed(), 1);
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test]
    async fn test_set_capacity_bounds_and_shrink() {
        let (pool, _) = pool(3, 4);
        assert!(matches!(
            pool.set_capacity(5),
            Err(PoolError::CapacityOutOfRange { requested: 5, max: 4 })
        ));
        assert!(pool.set_capacity(0).is_err());

        let ctx = Context::background();
        let a = pool.acquire(&ctx).await.unwrap();
        let b = pool.acquire(&ctx).await.unwrap();
        pool.set_capacity(1).unwrap();
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.available(), 0);

        // Both returns settle the shrink; only one slot remains afterwards
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.active(), 1);

        let c = pool.acquire(&ctx).await.unwrap();
        let timed = Context::background().with_timeout(Duration::from_millis(20));
        assert!(pool.acquire(&timed).await.is_err());
        pool.release(c);

        pool.set_capacity(4).unwrap();
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_slot() {
        let (pool, script) = pool(1, 1);
        script.fail_connect.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.acquire(&Context::background()).await.err(),
            Some(PoolError::Connect(_))
        ));
        assert_eq!(pool.in_use(), 0);

        script.fail_connect.store(false, Ordering::SeqCst);
        let conn = pool.acquire(&Context::background()).await.unwrap();
        pool.discard(conn);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_stalled_connect() {
        let (pool, script) = pool(1, 1);
        script.stall_connect.store(true, Ordering::SeqCst);

        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let err = pool.acquire(&ctx).await.err().unwrap();
        assert!(matches!(err, PoolError::Context(ContextError::DeadlineExceeded)));
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.available(), 1);

        script.stall_connect.store(false, Ordering::SeqCst);
        let conn = pool.acquire(&Context::background()).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test]
    async fn test_stats_json() {
        let (pool, _) = pool(2, 4);
        let json: serde_json::Value = serde_json::from_str(&pool.stats_json()).unwrap();
        assert_eq!(json["Capacity"], 2);
        assert_eq!(json["MaxCapacity"], 4);
        assert_eq!(json["IdleTimeout"], 60_000_000_000u64);
    }
}
