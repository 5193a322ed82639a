//! Backend handles: one per inference backend under router control.

use std::time::Duration;

use tokio::time::Instant;

use adasplit_common::{HandleStatus, TaskClass};

use crate::forward::BackendTarget;

/// Identity, role and load of one backend.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    id: usize,
    url: String,
    role: TaskClass,
    accepted: usize,
    concurrency_limit: usize,
    last_idle_at: Instant,
}

impl BackendHandle {
    pub fn new(id: usize, url: String, role: TaskClass, concurrency_limit: usize, now: Instant) -> Self {
        Self {
            id,
            url,
            role,
            accepted: 0,
            concurrency_limit,
            last_idle_at: now,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn role(&self) -> TaskClass {
        self.role
    }

    /// Only the rebalancer changes roles.
    pub(super) fn set_role(&mut self, role: TaskClass) {
        self.role = role;
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            id: self.id,
            url: self.url.clone(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.accepted < self.concurrency_limit
    }

    /// Take one slot. Callers must have checked [`has_capacity`](Self::has_capacity).
    pub fn accept(&mut self) {
        debug_assert!(self.has_capacity(), "accept() on a full handle");
        self.accepted += 1;
    }

    /// Give one slot back. Going idle stamps `last_idle_at`.
    pub fn release(&mut self, now: Instant) {
        match self.accepted {
            0 => tracing::warn!("release() on idle backend {}", self.id),
            1 => {
                self.accepted = 0;
                self.last_idle_at = now;
            }
            _ => self.accepted -= 1,
        }
    }

    /// Zero while the handle has accepted work.
    pub fn idle_duration(&self, now: Instant) -> Duration {
        if self.accepted > 0 {
            Duration::ZERO
        } else {
            now.saturating_duration_since(self.last_idle_at)
        }
    }

    pub fn status(&self, now: Instant) -> HandleStatus {
        HandleStatus {
            id: self.id,
            url: self.url.clone(),
            role: self.role,
            accepted: self.accepted,
            concurrency_limit: self.concurrency_limit,
            idle_secs: self.idle_duration(now).as_secs_f64(),
        }
    }
}
