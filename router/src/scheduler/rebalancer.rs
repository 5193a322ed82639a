//! Partition rebalancing.
//!
//! Moves the fleet one handle at a time between the baseline split and a
//! LONG-heavy split, driven by LONG backlog and gated by a cooldown. It never
//! goes past baseline toward SHORT-heavy and never leaves SHORT empty.

use std::time::Duration;

use tokio::time::Instant;

use adasplit_common::{Partition, TaskClass};

use super::handle::BackendHandle;

/// A single role transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub handle_id: usize,
    pub to: TaskClass,
    pub long_backlog: usize,
    pub partition: Partition,
}

#[derive(Debug, Clone)]
pub struct Rebalancer {
    cooldown: Duration,
    high_watermark: usize,
    low_watermark: usize,
    baseline_long: usize,
    enabled: bool,
    last_rebalance_at: Instant,
}

pub fn partition_of(handles: &[BackendHandle]) -> Partition {
    let long = handles.iter().filter(|h| h.role() == TaskClass::Long).count();
    Partition {
        long,
        short: handles.len() - long,
    }
}

impl Rebalancer {
    pub fn new(
        cooldown: Duration,
        high_watermark: usize,
        low_watermark: usize,
        baseline_long: usize,
        enabled: bool,
        now: Instant,
    ) -> Self {
        Self {
            cooldown,
            high_watermark,
            low_watermark,
            baseline_long,
            enabled,
            last_rebalance_at: now,
        }
    }

    pub fn since_last_rebalance(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_rebalance_at)
    }

    /// One control-loop tick. Applies at most one role change.
    pub fn tick(
        &mut self,
        handles: &mut [BackendHandle],
        long_backlog: usize,
        now: Instant,
    ) -> Option<RoleChange> {
        if !self.enabled || self.since_last_rebalance(now) < self.cooldown {
            return None;
        }

        let partition = partition_of(handles);
        let target = if long_backlog > self.high_watermark && partition.short > 1 {
            handles
                .iter_mut()
                .find(|h| h.role() == TaskClass::Short)
                .map(|h| (h, TaskClass::Long))
        } else if long_backlog < self.low_watermark && partition.long > self.baseline_long {
            // most recently converted first
            handles
                .iter_mut()
                .rev()
                .find(|h| h.role() == TaskClass::Long)
                .map(|h| (h, TaskClass::Short))
        } else {
            None
        };

        let (handle, to) = target?;
        handle.set_role(to);
        let handle_id = handle.id();
        self.last_rebalance_at = now;

        Some(RoleChange {
            handle_id,
            to,
            long_backlog,
            partition: partition_of(handles),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(5);

    fn fleet(n_long: usize, n: usize, start: Instant) -> Vec<BackendHandle> {
        (0..n)
            .map(|i| {
                let role = if i < n_long { TaskClass::Long } else { TaskClass::Short };
                BackendHandle::new(i + 1, format!("http://w{}", i + 1), role, 1, start)
            })
            .collect()
    }

    fn rebalancer(start: Instant) -> Rebalancer {
        Rebalancer::new(COOLDOWN, 10, 2, 2, true, start)
    }

    fn secs(start: Instant, s: u64) -> Instant {
        start + Duration::from_secs(s)
    }

    #[test]
    fn test_scale_up_converts_first_short_handle() {
        let start = Instant::now();
        let mut handles = fleet(2, 4, start);
        let mut rb = rebalancer(start);

        let change = rb.tick(&mut handles, 11, secs(start, 6)).unwrap();
        assert_eq!(change.handle_id, 3);
        assert_eq!(change.to, TaskClass::Long);
        assert_eq!(change.partition, Partition { long: 3, short: 1 });
        assert_eq!(handles[2].role(), TaskClass::Long);
    }

    #[test]
    fn test_backlog_at_high_watermark_does_not_scale() {
        let start = Instant::now();
        let mut handles = fleet(2, 4, start);
        let mut rb = rebalancer(start);
        assert!(rb.tick(&mut handles, 10, secs(start, 6)).is_none());
    }

    #[test]
    fn test_cooldown_allows_one_transition_per_window() {
        let start = Instant::now();
        let mut handles = fleet(2, 6, start);
        let mut rb = rebalancer(start);

        // still within the startup cooldown
        assert!(rb.tick(&mut handles, 50, secs(start, 4)).is_none());
        assert!(rb.tick(&mut handles, 50, secs(start, 5)).is_some());
        assert!(rb.tick(&mut handles, 50, secs(start, 6)).is_none());
        assert!(rb.tick(&mut handles, 50, secs(start, 9)).is_none());
        assert!(rb.tick(&mut handles, 50, secs(start, 10)).is_some());
        assert_eq!(partition_of(&handles), Partition { long: 4, short: 2 });
    }

    #[test]
    fn test_never_takes_last_short_handle() {
        let start = Instant::now();
        let mut handles = fleet(3, 4, start);
        let mut rb = rebalancer(start);

        assert!(rb.tick(&mut handles, 1000, secs(start, 60)).is_none());
        assert_eq!(partition_of(&handles), Partition { long: 3, short: 1 });
    }

    #[test]
    fn test_scale_down_prefers_highest_long_handle() {
        let start = Instant::now();
        let mut handles = fleet(2, 4, start);
        handles[3].set_role(TaskClass::Long);
        let mut rb = rebalancer(start);

        let change = rb.tick(&mut handles, 1, secs(start, 6)).unwrap();
        assert_eq!(change.handle_id, 4);
        assert_eq!(change.to, TaskClass::Short);
        assert_eq!(change.partition, Partition { long: 2, short: 2 });
    }

    #[test]
    fn test_scale_down_stops_at_baseline() {
        let start = Instant::now();
        let mut handles = fleet(2, 4, start);
        let mut rb = rebalancer(start);

        assert!(rb.tick(&mut handles, 0, secs(start, 60)).is_none());
        assert_eq!(partition_of(&handles), Partition { long: 2, short: 2 });
    }

    #[test]
    fn test_mid_band_backlog_holds_partition() {
        let start = Instant::now();
        let mut handles = fleet(3, 4, start);
        let mut rb = rebalancer(start);

        for backlog in 2..=10 {
            assert!(rb.tick(&mut handles, backlog, secs(start, 60)).is_none());
        }
    }

    #[test]
    fn test_disabled_never_transitions() {
        let start = Instant::now();
        let mut handles = fleet(2, 4, start);
        let mut rb = Rebalancer::new(COOLDOWN, 10, 2, 2, false, start);
        assert!(rb.tick(&mut handles, 100, secs(start, 60)).is_none());
    }
}
