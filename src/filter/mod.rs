//! Pre/post execution hooks run around node statements
//!
//! Filters run in registration order and the first failure short-circuits
//! the rest. A failing pre-filter means the backend is never touched; a
//! failing post-filter replaces the already-computed result with its error.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::{BackendConnection, QueryResult};
use crate::context::Context;

/// Rejection raised by a filter
#[derive(Debug, Clone, thiserror::Error)]
#[error("filter {filter} rejected the request: {reason}")]
pub struct FilterError {
    pub filter: String,
    pub reason: String,
}

impl FilterError {
    pub fn new(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait PreFilter: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn pre_handle(&self, ctx: &Context, conn: &mut dyn BackendConnection) -> Result<(), FilterError>;
}

#[async_trait]
pub trait PostFilter: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn post_handle(
        &self,
        ctx: &Context,
        result: &QueryResult,
        conn: &mut dyn BackendConnection,
    ) -> Result<(), FilterError>;
}

/// Registered filters, swapped atomically as whole lists
///
/// Runs iterate over a snapshot, so registration never blocks on (or
/// disturbs) statements already in progress.
pub struct FilterChain {
    pre: RwLock<Arc<[Arc<dyn PreFilter>]>>,
    post: RwLock<Arc<[Arc<dyn PostFilter>]>>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self {
            pre: RwLock::new(Arc::from(Vec::new())),
            post: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pre_filters(&self, filters: Vec<Arc<dyn PreFilter>>) {
        *self.pre.write() = filters.into();
    }

    pub fn set_post_filters(&self, filters: Vec<Arc<dyn PostFilter>>) {
        *self.post.write() = filters.into();
    }

    pub fn pre_filter_names(&self) -> Vec<String> {
        self.pre.read().iter().map(|f| f.name().to_string()).collect()
    }

    pub fn post_filter_names(&self) -> Vec<String> {
        self.post.read().iter().map(|f| f.name().to_string()).collect()
    }

    pub async fn run_pre(&self, ctx: &Context, conn: &mut dyn BackendConnection) -> Result<(), FilterError> {
        let filters = Arc::clone(&*self.pre.read());
        for filter in filters.iter() {
            filter.pre_handle(ctx, conn).await?;
        }
        Ok(())
    }

    pub async fn run_post(
        &self,
        ctx: &Context,
        result: &QueryResult,
        conn: &mut dyn BackendConnection,
    ) -> Result<(), FilterError> {
        let filters = Arc::clone(&*self.post.read());
        for filter in filters.iter() {
            filter.post_handle(ctx, result, conn).await?;
        }
        Ok(())
    }
}
