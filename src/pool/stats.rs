use std::time::Duration;

use serde::{Serialize, Serializer};

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub active: usize,
    pub in_use: usize,
    pub max_capacity: usize,
    pub wait_count: u64,
    #[serde(serialize_with = "as_nanos")]
    pub wait_time: Duration,
    #[serde(serialize_with = "as_nanos")]
    pub idle_timeout: Duration,
    pub idle_closed: u64,
    pub exhausted: u64,
}

impl PoolStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn as_nanos<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_nanos().min(u64::MAX as u128) as u64)
}
