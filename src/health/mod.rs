//! Node liveness monitoring
//!
//! - `HealthState`: status plus the debounced confidence counter
//! - `HealthMonitor`: per-node task pinging through the node's pool

mod monitor;
mod state;

pub use monitor::{ping_once, HealthMonitor, PingError};
pub use state::{CheckResult, HealthState, NodeStatus};
