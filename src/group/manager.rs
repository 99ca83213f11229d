//! Node group implementation

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};

use crate::backend::MysqlConnector;
use crate::config::{Config, NodeConfig};
use crate::node::{BackendNode, NodeSnapshot};
use crate::pool::{ConnectionPool, PoolError, ResourcePool, ResourcePoolConfig};

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}': {source}")]
    Pool {
        node: String,
        #[source]
        source: PoolError,
    },
}

/// All backend nodes known to this gateway, by name
///
/// Provides:
/// - Node lookup by name
/// - Master/replica topology queries for the load balancer
/// - Status snapshots and coordinated shutdown
#[derive(Default)]
pub struct NodeGroup {
    nodes: DashMap<String, Arc<BackendNode>>,
}

impl NodeGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and start every configured node
    ///
    /// Connections are opened lazily, so this does not touch the backends.
    pub fn from_config(config: &Config) -> Result<Self, GroupError> {
        let group = Self::new();
        for node_config in &config.nodes {
            let node = Self::build_node(config, node_config)?;
            group.insert(node)?;
        }
        info!(nodes = group.len(), "Node group ready");
        Ok(group)
    }

    /// Create one node with its own pool, weights applied
    pub fn build_node(config: &Config, node_config: &NodeConfig) -> Result<Arc<BackendNode>, GroupError> {
        let pool_config = ResourcePoolConfig {
            capacity: node_config.capacity.unwrap_or(config.pool.capacity),
            max_capacity: config.pool.max_capacity,
            idle_timeout: config.pool.idle_timeout(),
        };
        let connector = Arc::new(
            MysqlConnector::new(node_config.to_backend_config())
                .with_connect_timeout(config.pool.connect_timeout()),
        );
        let pool: Arc<dyn ConnectionPool> = Arc::new(
            ResourcePool::new(connector, pool_config).map_err(|source| GroupError::Pool {
                node: node_config.name.clone(),
                source,
            })?,
        );

        let node = BackendNode::new(
            node_config.name.clone(),
            node_config.master.clone(),
            config.health.ping_interval(),
            config.health.flip_threshold(),
            pool,
        );
        node.set_read_weight(node_config.read_weight);
        if node_config.write_weight > 0 && !node.is_master() {
            warn!(
                node = %node_config.name,
                write_weight = node_config.write_weight,
                "write_weight has no effect on a replica"
            );
        }
        node.set_write_weight(node_config.write_weight);
        Ok(node)
    }

    pub fn insert(&self, node: Arc<BackendNode>) -> Result<(), GroupError> {
        match self.nodes.entry(node.name().to_string()) {
            Entry::Occupied(entry) => Err(GroupError::DuplicateNode(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(node);
                Ok(())
            }
        }
    }

    /// Detach a node; the caller is responsible for closing it
    pub fn remove(&self, name: &str) -> Option<Arc<BackendNode>> {
        self.nodes.remove(name).map(|(_, node)| node)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendNode>> {
        self.nodes.get(name).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn masters(&self) -> Vec<Arc<BackendNode>> {
        self.collect(|node| node.is_master())
    }

    pub fn replicas_of(&self, master: &str) -> Vec<Arc<BackendNode>> {
        self.collect(|node| !node.is_master() && node.master_name() == master)
    }

    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.collect(|_| true)
            .iter()
            .map(|node| node.snapshot())
            .collect()
    }

    /// Close every node, each draining its own in-flight requests
    pub async fn close_all(&self) {
        let nodes = self.collect(|_| true);
        join_all(nodes.iter().map(|node| node.close())).await;
        info!(nodes = nodes.len(), "Node group closed");
    }

    /// Matching nodes sorted by name
    fn collect(&self, pred: impl Fn(&BackendNode) -> bool) -> Vec<Arc<BackendNode>> {
        let mut nodes: Vec<Arc<BackendNode>> = self
            .nodes
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| r.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes
    }
}
