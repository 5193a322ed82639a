//! Adaptive LONG/SHORT scheduler.
//!
//! Admission, wait queues and rebalancing live in [`SchedulerState`], a plain
//! state machine behind a mutex. The lock is only ever held across
//! non-suspending sections; forwarding happens after it is dropped.

mod admission;
mod handle;
mod queue;
mod rebalancer;
mod state;

pub use admission::{AdmissionPolicy, Placement};
pub use handle::BackendHandle;
pub use queue::{Completion, PendingRequest, WaitQueues};
pub use rebalancer::{partition_of, Rebalancer, RoleChange};
pub use state::{Admission, Dispatch, SchedulerState};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use adasplit_common::{ChatCompletionRequest, Partition, RouterStatus, TaskClass};

use crate::config::{ConfigError, ReleaseMode, SchedulerConfig};
use crate::error::RouterError;
use crate::forward::{BackendTarget, ForwardedResponse, Forwarder};

/// Cloneable handle to the shared scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<SchedulerState>,
    forwarder: Arc<dyn Forwarder>,
    release_mode: ReleaseMode,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, forwarder: Arc<dyn Forwarder>) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = SchedulerState::new(config, Instant::now());
        tracing::info!(
            "Scheduler started with {} backends (partition {}, limit {}, release {:?})",
            config.backends.len(),
            state.partition(),
            config.concurrency_limit,
            config.release_mode
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                forwarder,
                release_mode: config.release_mode,
                tick_interval: config.tick_interval(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // state is only mutated in non-panicking sections; a poisoned lock still holds
        // consistent counters
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place or queue a classified request and wait for the backend response.
    ///
    /// Dropping the returned future while queued removes the request from its
    /// queue.
    pub async fn submit(
        &self,
        class: TaskClass,
        request: ChatCompletionRequest,
    ) -> Result<ForwardedResponse, RouterError> {
        let admission = self.lock().admit(class, request, Instant::now())?;

        match admission {
            Admission::Placed {
                placement,
                target,
                request,
            } => {
                let permit = CapacityPermit::new(self.clone(), placement.index());
                self.execute(target, request, permit).await
            }
            Admission::Queued { id, receiver, .. } => {
                let mut guard = QueueGuard::new(self.clone(), class, id);
                // capacity may already be free for the queue head
                self.drain();
                let completion = receiver.await;
                guard.disarm();
                completion.unwrap_or(Err(RouterError::Cancelled))
            }
        }
    }

    /// Forward on capacity that has already been accepted.
    async fn execute(
        &self,
        target: BackendTarget,
        request: ChatCompletionRequest,
        permit: CapacityPermit,
    ) -> Result<ForwardedResponse, RouterError> {
        match self.inner.forwarder.forward(&target, &request).await {
            Ok(response) => match self.inner.release_mode {
                ReleaseMode::OnStart => {
                    drop(permit);
                    Ok(response)
                }
                ReleaseMode::OnComplete => Ok(response.hold_until_complete(permit)),
            },
            Err(source) => {
                drop(permit);
                tracing::warn!("Forwarding to backend {} failed: {}", target.id, source);
                Err(RouterError::Forward {
                    backend: target.id,
                    source,
                })
            }
        }
    }

    /// Give back one slot on `index` and dispatch whatever that unblocks.
    fn release(&self, index: usize) {
        let dispatches = {
            let mut state = self.lock();
            let now = Instant::now();
            state.release(index, now);
            state.drain(now)
        };
        self.dispatch(dispatches);
    }

    /// Drain both queues to a fixed point and start forwarding what was placed.
    pub fn drain(&self) {
        let dispatches = self.lock().drain(Instant::now());
        self.dispatch(dispatches);
    }

    fn dispatch(&self, dispatches: Vec<Dispatch>) {
        if dispatches.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Cannot dispatch {} queued requests: {}", dispatches.len(), e);
                // callers see Cancelled; the accepted slots go back
                for dispatch in dispatches {
                    drop(CapacityPermit::new(self.clone(), dispatch.placement.index()));
                }
                return;
            }
        };

        for dispatch in dispatches {
            let permit = CapacityPermit::new(self.clone(), dispatch.placement.index());
            let scheduler = self.clone();
            runtime.spawn(async move {
                let Dispatch {
                    target,
                    class,
                    pending,
                    ..
                } = dispatch;
                tracing::debug!(
                    "Dispatching queued {} request {} to backend {} after {:?}",
                    class,
                    pending.id,
                    target.id,
                    pending.enqueued_at.elapsed()
                );

                let result = scheduler.execute(target, pending.request, permit).await;
                if pending.response_tx.send(result).is_err() {
                    tracing::debug!("Caller for {} request {} went away", class, pending.id);
                }
            });
        }
    }

    /// One rebalancer tick, followed by a drain.
    ///
    /// The drain runs on every tick, not only after a role change, so that
    /// LONG requests queued before a SHORT backend crossed its idle cooldown
    /// get a chance to steal it.
    pub fn rebalance(&self) -> Option<RoleChange> {
        let (change, dispatches) = {
            let mut state = self.lock();
            let now = Instant::now();
            let change = state.rebalance(now);
            (change, state.drain(now))
        };

        if let Some(change) = &change {
            match change.to {
                TaskClass::Long => tracing::warn!(
                    "Scaling up LONG: backend {} now LONG (long backlog {}, partition {})",
                    change.handle_id,
                    change.long_backlog,
                    change.partition
                ),
                TaskClass::Short => tracing::info!(
                    "Scaling down LONG: backend {} back to SHORT (long backlog {}, partition {})",
                    change.handle_id,
                    change.long_backlog,
                    change.partition
                ),
            }
        }

        self.dispatch(dispatches);
        change
    }

    /// Tick forever at the configured interval.
    pub async fn run_rebalancer(self) {
        let mut interval = tokio::time::interval(self.inner.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            self.rebalance();
        }
    }

    pub fn spawn_rebalancer(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_rebalancer())
    }

    pub fn status(&self) -> RouterStatus {
        self.lock().status(Instant::now())
    }

    pub fn partition(&self) -> Partition {
        self.lock().partition()
    }
}

/// One accepted slot on a backend. Dropping it releases the slot exactly once.
pub struct CapacityPermit {
    scheduler: Scheduler,
    index: usize,
}

impl CapacityPermit {
    fn new(scheduler: Scheduler, index: usize) -> Self {
        Self { scheduler, index }
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.scheduler.release(self.index);
    }
}

/// Removes a queued request if its caller stops waiting.
struct QueueGuard {
    scheduler: Scheduler,
    class: TaskClass,
    id: Uuid,
    armed: bool,
}

impl QueueGuard {
    fn new(scheduler: Scheduler, class: TaskClass, id: Uuid) -> Self {
        Self {
            scheduler,
            class,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        if self.armed && self.scheduler.lock().cancel(self.class, self.id) {
            tracing::debug!("Removed abandoned {} request {} from queue", self.class, self.id);
        }
    }
}
