//! Router status snapshot types.
//!
//! Served by the router's `/status` endpoint and consumed by experiment
//! tooling that samples the partition over time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskClass;

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Current role split.
    pub partition: Partition,
    /// Waiting requests per class.
    pub queues: QueueDepths,
    /// Per-backend state, in fixed handle order.
    pub handles: Vec<HandleStatus>,
    /// Seconds since the last role transition (or since startup).
    pub secs_since_rebalance: f64,
    /// Recent arrival statistics, if a monitor is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<TrafficStats>,
}

/// Number of handles serving each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub long: usize,
    pub short: usize,
}

impl Partition {
    /// Total number of handles.
    pub fn total(&self) -> usize {
        self.long + self.short
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.long, self.short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub short: usize,
    pub long: usize,
}

/// State of one backend handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleStatus {
    pub id: usize,
    pub url: String,
    pub role: TaskClass,
    pub accepted: usize,
    pub concurrency_limit: usize,
    /// Seconds since the handle last went idle; zero while it has work.
    pub idle_secs: f64,
}

/// Sliding-window arrival statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub window_secs: f64,
    pub requests: usize,
    pub qps: f64,
    pub avg_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display() {
        let partition = Partition { long: 3, short: 1 };
        assert_eq!(partition.to_string(), "3:1");
        assert_eq!(partition.total(), 4);
    }

    #[test]
    fn test_status_omits_missing_traffic() {
        let status = RouterStatus {
            generated_at: Utc::now(),
            partition: Partition { long: 2, short: 2 },
            queues: QueueDepths { short: 0, long: 4 },
            handles: vec![HandleStatus {
                id: 1,
                url: "http://localhost:8001/v1/chat/completions".to_string(),
                role: TaskClass::Long,
                accepted: 1,
                concurrency_limit: 8,
                idle_secs: 0.0,
            }],
            secs_since_rebalance: 1.5,
            traffic: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("traffic").is_none());
        assert_eq!(json["handles"][0]["role"], "long");
        assert_eq!(json["queues"]["long"], 4);
    }
}
