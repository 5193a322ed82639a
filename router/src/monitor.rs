//! Sliding-window traffic monitor.
//!
//! Records the estimated cost of each arriving request and summarizes the
//! recent window. Observes only; nothing in the scheduler reads it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use adasplit_common::TrafficStats;

use crate::config::MonitorConfig;

/// QPS below which the reporter stays quiet.
const REPORT_MIN_QPS: f64 = 0.1;

pub struct TrafficMonitor {
    window: Duration,
    history: Mutex<VecDeque<(Instant, usize)>>,
}

impl TrafficMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(Duration::from_secs(config.window_secs.max(1)))
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<(Instant, usize)>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict(history: &mut VecDeque<(Instant, usize)>, window: Duration, now: Instant) {
        while let Some((at, _)) = history.front() {
            if now.saturating_duration_since(*at) > window {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&self, cost: usize) {
        self.record_at(cost, Instant::now());
    }

    pub fn record_at(&self, cost: usize, now: Instant) {
        let mut history = self.history();
        history.push_back((now, cost));
        Self::evict(&mut history, self.window, now);
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats_at(Instant::now())
    }

    /// QPS is the count over the full window length, not elapsed time.
    pub fn stats_at(&self, now: Instant) -> TrafficStats {
        let mut history = self.history();
        Self::evict(&mut history, self.window, now);

        let requests = history.len();
        let window_secs = self.window.as_secs_f64();
        let avg_cost = if requests == 0 {
            0.0
        } else {
            history.iter().map(|(_, cost)| *cost as f64).sum::<f64>() / requests as f64
        };

        TrafficStats {
            window_secs,
            requests,
            qps: requests as f64 / window_secs,
            avg_cost,
        }
    }

    /// Log a summary every `interval` while there is meaningful traffic.
    pub async fn run_reporter(self: Arc<Self>, interval: Duration, threshold: usize) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = self.stats();
            if stats.qps > REPORT_MIN_QPS {
                tracing::info!(
                    "Traffic: {:.1} qps, avg cost {:.0}, {}",
                    stats.qps,
                    stats.avg_cost,
                    traffic_label(&stats, threshold)
                );
            }
        }
    }

    pub fn spawn_reporter(self: &Arc<Self>, interval: Duration, threshold: usize) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_reporter(interval, threshold))
    }
}

pub fn traffic_label(stats: &TrafficStats, threshold: usize) -> &'static str {
    if stats.avg_cost > threshold as f64 {
        "long-heavy"
    } else {
        "short-heavy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let monitor = TrafficMonitor::new(Duration::from_secs(10));
        let stats = monitor.stats_at(Instant::now());
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.qps, 0.0);
        assert_eq!(stats.avg_cost, 0.0);
    }

    #[test]
    fn test_stats_over_window() {
        let start = Instant::now();
        let monitor = TrafficMonitor::new(Duration::from_secs(10));
        monitor.record_at(1000, start);
        monitor.record_at(5000, start + Duration::from_secs(1));

        let stats = monitor.stats_at(start + Duration::from_secs(2));
        assert_eq!(stats.requests, 2);
        assert!((stats.qps - 0.2).abs() < 1e-9);
        assert_eq!(stats.avg_cost, 3000.0);
    }

    #[test]
    fn test_old_entries_expire() {
        let start = Instant::now();
        let monitor = TrafficMonitor::new(Duration::from_secs(10));
        monitor.record_at(100, start);
        monitor.record_at(200, start + Duration::from_secs(8));

        // exactly at the window edge the first entry still counts
        assert_eq!(monitor.stats_at(start + Duration::from_secs(10)).requests, 2);
        let stats = monitor.stats_at(start + Duration::from_secs(11));
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.avg_cost, 200.0);
    }

    #[test]
    fn test_traffic_label() {
        let mut stats = TrafficStats {
            window_secs: 10.0,
            requests: 5,
            qps: 0.5,
            avg_cost: 3000.0,
        };
        assert_eq!(traffic_label(&stats, 3000), "short-heavy");
        stats.avg_cost = 3001.0;
        assert_eq!(traffic_label(&stats, 3000), "long-heavy");
    }
}
