//! Debounced node status
//!
//! Each check result is a vote: a result contradicting the current status
//! adds one to the confidence counter, a result agreeing with it subtracts
//! one. Whenever the counter lands on a multiple of the flip threshold it
//! is reset to zero, and the status flips if the counter was positive.
//! A node therefore needs `threshold` more contradicting results than
//! agreeing ones before it changes status.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::Serialize;

/// Status of a backend node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NodeStatus {
    Healthy = 0,
    Unhealthy = 1,
}

impl NodeStatus {
    fn from_u8(value: u8) -> Self {
        if value == NodeStatus::Unhealthy as u8 {
            NodeStatus::Unhealthy
        } else {
            NodeStatus::Healthy
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            NodeStatus::Healthy => NodeStatus::Unhealthy,
            NodeStatus::Unhealthy => NodeStatus::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Healthy => "healthy",
            NodeStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Success,
    Failure,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Success => "success",
            CheckResult::Failure => "failure",
        }
    }
}

/// Status plus confidence counter, shared between a node and its monitor
///
/// Only the monitor calls `record`; readers may observe the status from
/// any thread.
#[derive(Debug)]
pub struct HealthState {
    status: AtomicU8,
    confidence: AtomicI64,
    flip_threshold: i64,
}

impl HealthState {
    /// Start Healthy with a zero counter; the threshold is clamped to at least one
    pub fn new(flip_threshold: u32) -> Self {
        Self {
            status: AtomicU8::new(NodeStatus::Healthy as u8),
            confidence: AtomicI64::new(0),
            flip_threshold: i64::from(flip_threshold.max(1)),
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn confidence(&self) -> i64 {
        self.confidence.load(Ordering::Acquire)
    }

    pub fn flip_threshold(&self) -> u32 {
        self.flip_threshold as u32
    }

    /// Fold one check result in; returns the new status if it flipped
    pub fn record(&self, result: CheckResult) -> Option<NodeStatus> {
        let status = self.status();
        let vote = match (status, result) {
            (NodeStatus::Healthy, CheckResult::Failure)
            | (NodeStatus::Unhealthy, CheckResult::Success) => 1,
            _ => -1,
        };

        let current = self.confidence.fetch_add(vote, Ordering::AcqRel) + vote;
        if current % self.flip_threshold != 0 {
            return None;
        }

        // A lost race means someone else already reset this multiple
        if self
            .confidence
            .compare_exchange(current, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        if current > 0 {
            let next = status.toggled();
            self.status.store(next as u8, Ordering::Release);
            return Some(next);
        }
        None
    }
}
