//! Backend nodes built from configuration
//!
//! A gateway fronts several database instances: masters and the replicas
//! that follow them. The group owns one `BackendNode` per instance.

mod manager;

pub use manager::{GroupError, NodeGroup};
