//! Admission policy: picks a backend for a request, or reports none available.
//!
//! Home placement is least-loaded within the matching role. When LONG has no
//! home capacity it may steal an idle SHORT backend, but never the other way
//! round: a SHORT request parked behind a long prefill loses far more latency
//! than the extra capacity is worth.

use std::time::Duration;

use tokio::time::Instant;

use adasplit_common::TaskClass;

use super::handle::BackendHandle;

/// Where a request was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// On a backend whose role matches the request class.
    Home(usize),
    /// A LONG request on an idle SHORT backend.
    Stolen(usize),
}

impl Placement {
    /// Index into the fixed handle ordering.
    pub fn index(&self) -> usize {
        match *self {
            Placement::Home(i) | Placement::Stolen(i) => i,
        }
    }

    pub fn is_stolen(&self) -> bool {
        matches!(self, Placement::Stolen(_))
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    steal_idle_cooldown: Duration,
    stealing_enabled: bool,
}

impl AdmissionPolicy {
    pub fn new(steal_idle_cooldown: Duration, stealing_enabled: bool) -> Self {
        Self {
            steal_idle_cooldown,
            stealing_enabled,
        }
    }

    /// Pure decision over the current handle set. Never fails; `None` means
    /// the caller should queue.
    pub fn try_place(
        &self,
        class: TaskClass,
        handles: &[BackendHandle],
        short_queue_empty: bool,
        now: Instant,
    ) -> Option<Placement> {
        // min_by_key keeps the first minimum, so ties go to the lowest index
        let home = handles
            .iter()
            .enumerate()
            .filter(|(_, h)| h.role() == class && h.has_capacity())
            .min_by_key(|(_, h)| h.accepted())
            .map(|(i, _)| Placement::Home(i));
        if home.is_some() {
            return home;
        }

        if class != TaskClass::Long || !self.stealing_enabled || !short_queue_empty {
            return None;
        }

        handles
            .iter()
            .position(|h| {
                h.role() == TaskClass::Short
                    && h.has_capacity()
                    && h.idle_duration(now) > self.steal_idle_cooldown
            })
            .map(Placement::Stolen)
    }
}
