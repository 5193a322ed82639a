//! Scheduler state machine.
//!
//! Every operation here is synchronous and takes `now` explicitly. The async
//! [`Scheduler`](super::Scheduler) wraps this in a mutex and never awaits while
//! holding it.

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use adasplit_common::{ChatCompletionRequest, Partition, RouterStatus, TaskClass};

use crate::config::SchedulerConfig;
use crate::error::RouterError;
use crate::forward::BackendTarget;

use super::admission::{AdmissionPolicy, Placement};
use super::handle::BackendHandle;
use super::queue::{Completion, PendingRequest, WaitQueues};
use super::rebalancer::{partition_of, Rebalancer, RoleChange};

/// Result of admitting a new request.
pub enum Admission {
    /// Capacity was accepted on `target`; forward right away.
    Placed {
        placement: Placement,
        target: BackendTarget,
        request: ChatCompletionRequest,
    },
    /// No backend available; await `receiver`.
    Queued {
        id: Uuid,
        depth: usize,
        receiver: oneshot::Receiver<Completion>,
    },
}

/// A queued request taken off its queue with capacity already accepted.
pub struct Dispatch {
    pub placement: Placement,
    pub target: BackendTarget,
    pub class: TaskClass,
    pub pending: PendingRequest,
}

pub struct SchedulerState {
    handles: Vec<BackendHandle>,
    queues: WaitQueues,
    policy: AdmissionPolicy,
    rebalancer: Rebalancer,
}

impl SchedulerState {
    /// Build the fixed handle set: the first `baseline_long` backends start
    /// as LONG, the rest as SHORT.
    pub fn new(config: &SchedulerConfig, now: Instant) -> Self {
        let handles = config
            .backends
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let role = if i < config.baseline_long {
                    TaskClass::Long
                } else {
                    TaskClass::Short
                };
                BackendHandle::new(i + 1, url.clone(), role, config.concurrency_limit, now)
            })
            .collect();

        Self {
            handles,
            queues: WaitQueues::new(config.max_queue_len),
            policy: AdmissionPolicy::new(config.steal_idle_cooldown(), config.enable_stealing),
            rebalancer: Rebalancer::new(
                config.rebalance_cooldown(),
                config.high_watermark,
                config.low_watermark,
                config.baseline_long,
                config.enable_rebalancing,
                now,
            ),
        }
    }

    pub fn handles(&self) -> &[BackendHandle] {
        &self.handles
    }

    pub fn queue_len(&self, class: TaskClass) -> usize {
        self.queues.len(class)
    }

    pub fn partition(&self) -> Partition {
        partition_of(&self.handles)
    }

    pub fn try_place(&self, class: TaskClass, now: Instant) -> Option<Placement> {
        self.policy.try_place(
            class,
            &self.handles,
            self.queues.is_empty(TaskClass::Short),
            now,
        )
    }

    /// Place the request immediately or queue it.
    ///
    /// A request never jumps ahead of its own class queue: with requests of
    /// the same class already waiting it is queued behind them, and the
    /// caller's next `drain` serves the head first.
    pub fn admit(
        &mut self,
        class: TaskClass,
        request: ChatCompletionRequest,
        now: Instant,
    ) -> Result<Admission, RouterError> {
        let placement = if self.queues.is_empty(class) {
            self.try_place(class, now)
        } else {
            None
        };
        if let Some(placement) = placement {
            let handle = &mut self.handles[placement.index()];
            handle.accept();
            if placement.is_stolen() {
                tracing::info!(
                    "Backend {} (short) stolen for a long request (load: {})",
                    handle.id(),
                    handle.accepted()
                );
            }
            return Ok(Admission::Placed {
                placement,
                target: handle.target(),
                request,
            });
        }

        let (pending, receiver) = PendingRequest::new(request, now);
        let id = pending.id;
        let depth = self.queues.enqueue(class, pending).map_err(|e| {
            tracing::warn!("Rejecting {} request: {}", class, e);
            e
        })?;
        if class == TaskClass::Long && depth % 5 == 0 {
            tracing::info!("Long request queued, depth: {}", depth);
        }

        Ok(Admission::Queued {
            id,
            depth,
            receiver,
        })
    }

    pub fn release(&mut self, index: usize, now: Instant) {
        if let Some(handle) = self.handles.get_mut(index) {
            handle.release(now);
        }
    }

    /// Remove a queued request whose caller went away.
    pub fn cancel(&mut self, class: TaskClass, id: Uuid) -> bool {
        self.queues.remove(class, id).is_some()
    }

    /// Drain SHORT to exhaustion (or placement failure), then LONG.
    ///
    /// Returned dispatches already hold accepted capacity; the caller must
    /// forward each one and release its handle exactly once.
    pub fn drain(&mut self, now: Instant) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();

        for class in TaskClass::PRIORITY {
            while let Some(front) = self.queues.front(class) {
                if front.is_abandoned() {
                    if let Some(pending) = self.queues.pop(class) {
                        tracing::debug!("Discarding abandoned {} request {}", class, pending.id);
                    }
                    continue;
                }

                let Some(placement) = self.try_place(class, now) else {
                    break;
                };
                let Some(pending) = self.queues.pop(class) else {
                    break;
                };

                let handle = &mut self.handles[placement.index()];
                handle.accept();
                if placement.is_stolen() {
                    tracing::info!(
                        "Backend {} (short) stolen for a queued long request (load: {})",
                        handle.id(),
                        handle.accepted()
                    );
                }
                dispatches.push(Dispatch {
                    placement,
                    target: handle.target(),
                    class,
                    pending,
                });
            }
        }

        dispatches
    }

    /// One rebalancer tick against the current LONG backlog.
    pub fn rebalance(&mut self, now: Instant) -> Option<RoleChange> {
        let long_backlog = self.queues.len(TaskClass::Long);
        self.rebalancer.tick(&mut self.handles, long_backlog, now)
    }

    pub fn status(&self, now: Instant) -> RouterStatus {
        RouterStatus {
            generated_at: Utc::now(),
            partition: self.partition(),
            queues: self.queues.depths(),
            handles: self.handles.iter().map(|h| h.status(now)).collect(),
            secs_since_rebalance: self.rebalancer.since_last_rebalance(now).as_secs_f64(),
            traffic: None,
        }
    }
}
