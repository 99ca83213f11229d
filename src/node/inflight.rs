use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Notify;

use crate::metrics::metrics;

/// Count of requests currently executing against a node
#[derive(Debug)]
pub struct InFlight {
    node: String,
    count: AtomicI64,
    drained: Notify,
}

impl InFlight {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            count: AtomicI64::new(0),
            drained: Notify::new(),
        }
    }

    /// Count one request until the guard drops
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics().set_in_flight(&self.node, now);
        InFlightGuard { inflight: self }
    }

    pub fn get(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolve once no request is in flight
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent exit cannot be missed
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct InFlightGuard<'a> {
    inflight: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let now = self.inflight.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics().set_in_flight(&self.inflight.node, now);
        if now == 0 {
            self.inflight.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_guard_restores_count() {
        let inflight = InFlight::new("inflight-test");
        {
            let _a = inflight.enter();
            let _b = inflight.enter();
            assert_eq!(inflight.get(), 2);
        }
        assert_eq!(inflight.get(), 0);
    }

    #[tokio::test]
    async fn test_wait_drained_returns_immediately_when_idle() {
        let inflight = InFlight::new("inflight-idle");
        tokio::time::timeout(Duration::from_secs(1), inflight.wait_drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained_wakes_on_last_exit() {
        let inflight = Arc::new(InFlight::new("inflight-drain"));
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel::<()>();

        let worker = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                let _guard = inflight.enter();
                entered_tx.send(()).unwrap();
                exit_rx.await.unwrap();
            })
        };
        entered_rx.await.unwrap();

        let waiter = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move { inflight.wait_drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        exit_tx.send(()).unwrap();
        worker.await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
