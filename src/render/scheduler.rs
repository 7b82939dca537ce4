//! Render job scheduler
//!
//! Owns the pending request queue and the single active job. All methods
//! run on the owning context; the only thing that crosses to the worker
//! thread is the [`RenderJob`] sent over the request channel.
//!
//! ```text
//!            submit (delay > 0)          deadline passed
//!   Idle ─────────────────────▶ Debouncing ──────────────▶ dequeue
//!    ▲  submit (delay = 0) ─────────────────────────────▶    │
//!    │                                                       ▼
//!    └──── finish / cancel ◀──────────── Busy ◀──── job sent to worker
//! ```

use std::time::{Duration, Instant};

use flume::Sender;
use log::{debug, warn};

use super::cancel::CancelToken;
use super::job::RenderJob;
use super::queue::{Enqueued, RequestQueue};
use super::request::{JobId, RenderRequest, WorkerRequest};
use super::types::RequesterId;

/// Observable scheduler state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// No active job and no dequeue armed
    Idle,
    /// Dequeue armed; waiting for the debounce deadline
    Debouncing,
    /// A job is running on the worker
    Busy,
}

/// What [`Scheduler::submit`] did with a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Identical to the running job; nothing scheduled
    DuplicateOfActive,
    /// Page was already queued; its scale was updated
    Coalesced,
    /// Added to the back of the queue
    Enqueued,
}

/// The job currently running on the worker
#[derive(Debug)]
pub struct ActiveJob {
    pub id: JobId,
    pub request: RenderRequest,
    cancel: CancelToken,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Debouncing { deadline: Instant },
    Busy(ActiveJob),
}

/// Enforces at most one render job at a time
#[derive(Debug)]
pub struct Scheduler {
    queue: RequestQueue,
    phase: Phase,
    dequeue_delay: Duration,
    pixel_ratio: f64,
    next_job_id: u64,
    request_tx: Sender<WorkerRequest>,
}

impl Scheduler {
    pub(crate) fn new(
        request_tx: Sender<WorkerRequest>,
        dequeue_delay: Duration,
        pixel_ratio: f64,
    ) -> Self {
        Self {
            queue: RequestQueue::new(),
            phase: Phase::Idle,
            dequeue_delay,
            pixel_ratio,
            next_job_id: 1,
            request_tx,
        }
    }

    /// Accept a request that missed the cache.
    ///
    /// A running job for the same page at another scale is cancelled. A
    /// new queue entry arms a dequeue when no job is running.
    pub fn submit(
        &mut self,
        request: RenderRequest,
        now: Instant,
        is_relevant: impl FnMut(RequesterId) -> bool,
    ) -> Submission {
        let (duplicate, same_page) = self.active().map_or((false, false), |active| {
            (
                active.request.same_target(request.page, request.scale),
                active.request.page == request.page,
            )
        });

        if duplicate {
            debug!(
                "Already rendering page {} at scale {}",
                request.page, request.scale
            );
            return Submission::DuplicateOfActive;
        }
        if same_page {
            self.cancel_active();
        }

        if let Enqueued::Coalesced { previous } = self.queue.enqueue(request) {
            debug!(
                "Coalesced page {}: scale {} -> {}",
                request.page, previous, request.scale
            );
            return Submission::Coalesced;
        }

        if !self.is_busy() {
            self.schedule_dequeue(now, is_relevant);
        }
        Submission::Enqueued
    }

    /// Fire the debounce timer if its deadline has passed
    pub fn poll_timer(
        &mut self,
        now: Instant,
        is_relevant: impl FnMut(RequesterId) -> bool,
    ) -> Option<JobId> {
        match self.phase {
            Phase::Debouncing { deadline } if now >= deadline => {
                self.phase = Phase::Idle;
                self.dequeue(is_relevant)
            }
            _ => None,
        }
    }

    /// Prune the stale prefix and start a job for the front request.
    /// Does nothing while a job is running.
    pub fn dequeue(&mut self, is_relevant: impl FnMut(RequesterId) -> bool) -> Option<JobId> {
        if self.is_busy() {
            return None;
        }
        self.phase = Phase::Idle;

        let erased = self.queue.prune_stale(is_relevant);
        if erased > 0 {
            debug!("Erased {erased} stale requests");
        }

        let request = self.queue.dequeue_front()?;
        self.start(request)
    }

    /// Take the active job if `job` is it. A `None` means the result
    /// belongs to a job that was cancelled or superseded.
    pub fn finish(&mut self, job: JobId) -> Option<ActiveJob> {
        if !self.active().is_some_and(|active| active.id == job) {
            return None;
        }
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Busy(active) => Some(active),
            _ => None,
        }
    }

    /// Flag the running job as cancelled and free the slot without
    /// waiting for the worker to acknowledge
    pub fn cancel_active(&mut self) -> Option<RenderRequest> {
        if !self.is_busy() {
            return None;
        }
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Busy(active) => {
                active.cancel.cancel();
                debug!(
                    "Cancelled render of page {} at scale {}",
                    active.request.page, active.request.scale
                );
                Some(active.request)
            }
            _ => None,
        }
    }

    /// Re-check relevance after the viewport moved: cancel an irrelevant
    /// running job, prune the stale prefix, and arm a dequeue if there is
    /// work left. Returns whether the running job was cancelled.
    pub fn revalidate(
        &mut self,
        now: Instant,
        mut is_relevant: impl FnMut(RequesterId) -> bool,
    ) -> bool {
        let stale_active = self
            .active()
            .is_some_and(|active| !is_relevant(active.request.requester));
        let cancelled = stale_active && self.cancel_active().is_some();

        let erased = self.queue.prune_stale(&mut is_relevant);
        if erased > 0 {
            debug!("Erased {erased} stale requests");
        }

        if matches!(self.phase, Phase::Idle) && !self.queue.is_empty() {
            self.schedule_dequeue(now, is_relevant);
        }
        cancelled
    }

    /// Point at a freshly spawned worker. Any running job is cancelled
    /// first; its request is dropped like a failed render.
    pub(crate) fn reconnect(
        &mut self,
        request_tx: Sender<WorkerRequest>,
    ) -> Option<RenderRequest> {
        let lost = self.cancel_active();
        self.request_tx = request_tx;
        lost
    }

    /// Cancel everything and stop the worker
    pub fn shutdown(&mut self) {
        self.cancel_active();
        self.queue.clear();
        let _ = self.request_tx.send(WorkerRequest::Shutdown);
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        match self.phase {
            Phase::Idle => SchedulerState::Idle,
            Phase::Debouncing { .. } => SchedulerState::Debouncing,
            Phase::Busy(_) => SchedulerState::Busy,
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Busy(_))
    }

    #[must_use]
    pub fn active(&self) -> Option<&ActiveJob> {
        match &self.phase {
            Phase::Busy(active) => Some(active),
            _ => None,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// When the armed dequeue fires, if one is armed
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    #[must_use]
    pub fn dequeue_delay(&self) -> Duration {
        self.dequeue_delay
    }

    /// Takes effect the next time a dequeue is armed
    pub fn set_dequeue_delay(&mut self, delay: Duration) {
        self.dequeue_delay = delay;
    }

    #[must_use]
    pub fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    pub fn set_pixel_ratio(&mut self, ratio: f64) {
        self.pixel_ratio = ratio;
    }

    fn schedule_dequeue(&mut self, now: Instant, is_relevant: impl FnMut(RequesterId) -> bool) {
        if self.dequeue_delay.is_zero() {
            self.dequeue(is_relevant);
        } else {
            self.phase = Phase::Debouncing {
                deadline: now + self.dequeue_delay,
            };
        }
    }

    fn start(&mut self, request: RenderRequest) -> Option<JobId> {
        let id = JobId::new(self.next_job_id);
        self.next_job_id += 1;

        let cancel = CancelToken::new();
        let job = RenderJob {
            id,
            page: request.page,
            scale: request.scale,
            pixel_ratio: self.pixel_ratio,
            cancel: cancel.clone(),
        };

        if self.request_tx.send(WorkerRequest::Render(job)).is_err() {
            warn!(
                "Render worker is gone; dropping request for page {}",
                request.page
            );
            return None;
        }

        debug!(
            "Dispatched job {} for page {} at scale {}",
            id.0, request.page, request.scale
        );
        self.phase = Phase::Busy(ActiveJob {
            id,
            request,
            cancel,
        });
        Some(id)
    }
}
