//! Page provider - the entry point used by the page-drawing layer
//!
//! Answers every request synchronously with the best image already
//! cached, and schedules the exact render in the background. Completed
//! renders are picked up by [`PageProvider::poll`] (or `wait`) on the
//! owning thread, inserted into the cache, and announced to the requester.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, info, warn};

use super::cache::{CacheStats, RenderCache};
use super::document::PageSource;
use super::request::{RenderRequest, RequestError, WorkerResponse};
use super::scheduler::{Scheduler, SchedulerState, Submission};
use super::types::{PageNumber, PointSize, RenderedImage, RequesterId, Scale};
use super::worker::spawn_render_worker;
use crate::settings::RenderSettings;

/// Callbacks into the layer that owns the requesters
pub trait RequesterHost {
    /// Whether the requester still needs its page (e.g. is on screen)
    fn is_relevant(&self, requester: RequesterId) -> bool;

    /// A better image for the requester's page is now cached
    fn notify(&mut self, requester: RequesterId, page: PageNumber, scale: Scale);
}

/// What a request can be answered with right away
#[derive(Clone, Debug)]
pub enum ImmediateImage {
    /// Cached at the requested scale
    Exact(Arc<RenderedImage>),
    /// Cached at the closest other scale; the exact one is on its way
    Nearest(Arc<RenderedImage>),
    /// Nothing cached for this page yet
    Nothing,
}

impl ImmediateImage {
    #[must_use]
    pub fn image(&self) -> Option<&Arc<RenderedImage>> {
        match self {
            Self::Exact(image) | Self::Nearest(image) => Some(image),
            Self::Nothing => None,
        }
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

/// Snapshot of provider activity
#[derive(Clone, Copy, Debug)]
pub struct ProviderStats {
    pub cache: CacheStats,
    pub cached_images: usize,
    pub cache_bytes: usize,
    pub queued: usize,
    pub state: SchedulerState,
}

/// Render cache + scheduler + background worker for one document
pub struct PageProvider<H: RequesterHost> {
    source: Arc<dyn PageSource>,
    host: H,
    cache: RenderCache,
    scheduler: Scheduler,
    response_rx: Receiver<WorkerResponse>,
}

impl<H: RequesterHost> PageProvider<H> {
    /// Create a provider with default settings
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>, host: H) -> Self {
        Self::with_settings(source, host, &RenderSettings::default())
    }

    #[must_use]
    pub fn with_settings(source: Arc<dyn PageSource>, host: H, settings: &RenderSettings) -> Self {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        spawn_render_worker(Arc::clone(&source), request_rx, response_tx);

        info!(
            "Page provider ready: {} pages, cache limit {} bytes, dequeue delay {}ms",
            source.page_count(),
            settings.cache_limit_bytes,
            settings.dequeue_delay_ms
        );

        Self {
            source,
            host,
            cache: RenderCache::with_policy(settings.cache_limit_bytes, settings.eviction),
            scheduler: Scheduler::new(request_tx, settings.dequeue_delay(), settings.pixel_ratio),
            response_rx,
        }
    }

    /// Ask for `page` at `scale`.
    ///
    /// Returns the exact cached image, or the nearest cached scale of the
    /// page, or nothing. Unless it was an exact hit, the exact image is
    /// scheduled and the host is notified once it lands in the cache.
    pub fn request(
        &mut self,
        requester: RequesterId,
        page: PageNumber,
        scale: f64,
    ) -> Result<ImmediateImage, RequestError> {
        let page_count = self.source.page_count();
        if page >= page_count {
            return Err(RequestError::PageOutOfRange { page, page_count });
        }
        let scale = Scale::new(scale).ok_or(RequestError::InvalidScale(scale))?;

        if let Some(image) = self.cache.lookup(page, scale) {
            debug!("Cache hit: page = {page} scale = {scale}");
            return Ok(ImmediateImage::Exact(image));
        }

        let fallback = self
            .cache
            .lookup_nearest(page, scale)
            .map_or(ImmediateImage::Nothing, ImmediateImage::Nearest);

        let host = &self.host;
        let outcome = self.scheduler.submit(
            RenderRequest::new(page, scale, requester),
            Instant::now(),
            |id| host.is_relevant(id),
        );
        if outcome != Submission::Enqueued {
            debug!("Request for page {page} at scale {scale}: {outcome:?}");
        }

        Ok(fallback)
    }

    /// Handle finished jobs and an expired dequeue delay without blocking.
    /// Returns the number of worker responses processed.
    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// [`poll`](Self::poll) with an explicit notion of "now" for the
    /// dequeue delay
    pub fn poll_at(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        loop {
            match self.response_rx.try_recv() {
                Ok(response) => {
                    self.handle_response(response);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.restart_worker();
                    break;
                }
            }
        }

        let host = &self.host;
        self.scheduler.poll_timer(now, |id| host.is_relevant(id));
        handled
    }

    /// Block until a job finishes, the dequeue delay expires, or `timeout`
    /// passes, then poll
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let mut until = Instant::now() + timeout;
        if let Some(deadline) = self.scheduler.next_deadline() {
            until = until.min(deadline);
        }

        let mut handled = 0;
        match self.response_rx.recv_deadline(until) {
            Ok(response) => {
                self.handle_response(response);
                handled += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.restart_worker(),
        }
        handled + self.poll()
    }

    /// Keep waiting until no job is running and nothing is queued.
    /// Returns `false` if `timeout` passed first.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait(deadline - now);
        }
    }

    /// The visible region moved: drop work for requesters that are no
    /// longer relevant, including the running job. Returns whether the
    /// running job was cancelled.
    pub fn viewport_changed(&mut self) -> bool {
        let host = &self.host;
        self.scheduler
            .revalidate(Instant::now(), |id| host.is_relevant(id))
    }

    /// Change the cache byte budget; shrinking evicts right away
    pub fn set_cache_limit(&mut self, bytes: usize) {
        info!("Cache limit set to {bytes} bytes");
        self.cache.set_budget(bytes);
    }

    /// Delay between an idle request and the start of its render
    pub fn set_dequeue_delay(&mut self, delay: Duration) {
        self.scheduler.set_dequeue_delay(delay);
    }

    /// Device pixels per point. A different ratio invalidates the cache
    /// and restarts the running job.
    pub fn set_pixel_ratio(&mut self, ratio: f64) {
        if !(ratio.is_finite() && ratio > 0.0) {
            warn!("Ignoring invalid pixel ratio {ratio}");
            return;
        }
        if (self.scheduler.pixel_ratio() - ratio).abs() <= f64::EPSILON {
            return;
        }

        info!("Pixel ratio changed to {ratio}; invalidating render cache");
        self.scheduler.set_pixel_ratio(ratio);
        self.cache.clear();

        if let Some(interrupted) = self.scheduler.cancel_active() {
            let host = &self.host;
            self.scheduler
                .submit(interrupted, Instant::now(), |id| host.is_relevant(id));
        }
    }

    /// No running job and nothing queued
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.scheduler.is_busy() && self.scheduler.queue().is_empty()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.source.page_count()
    }

    #[must_use]
    pub fn page_point_size(&self, page: PageNumber) -> Option<PointSize> {
        self.source.page_point_size(page)
    }

    #[must_use]
    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            cache: self.cache.stats(),
            cached_images: self.cache.len(),
            cache_bytes: self.cache.total_cost(),
            queued: self.scheduler.queue().len(),
            state: self.scheduler.state(),
        }
    }

    /// The worker thread is gone. Start a new one so queued requests
    /// still get rendered; the job it was running is given up.
    fn restart_worker(&mut self) {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        spawn_render_worker(Arc::clone(&self.source), request_rx, response_tx);
        self.response_rx = response_rx;

        match self.scheduler.reconnect(request_tx) {
            Some(lost) => warn!(
                "Render worker channel disconnected; restarted worker, dropped page {} at scale {}",
                lost.page, lost.scale
            ),
            None => warn!("Render worker channel disconnected; restarted worker"),
        }

        let host = &self.host;
        self.scheduler.dequeue(|id| host.is_relevant(id));
    }

    fn handle_response(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::Rendered { job, image } => {
                let Some(active) = self.scheduler.finish(job) else {
                    debug!(
                        "Discarding superseded result: page = {} scale = {}",
                        image.page(),
                        image.scale()
                    );
                    return;
                };

                let page = image.page();
                let scale = image.scale();
                if self.cache.insert(image) {
                    self.host.notify(active.request.requester, page, scale);
                } else {
                    warn!("Rendered page {page} at scale {scale} does not fit the cache");
                }
            }
            WorkerResponse::Cancelled(job) => {
                if self.scheduler.finish(job).is_none() {
                    return;
                }
                debug!("Active job {} cancelled itself", job.0);
            }
            WorkerResponse::Failed { job, error } => {
                let Some(active) = self.scheduler.finish(job) else {
                    return;
                };
                warn!(
                    "No image for page {} at scale {}: {error}",
                    active.request.page, active.request.scale
                );
            }
        }

        let host = &self.host;
        self.scheduler.dequeue(|id| host.is_relevant(id));
    }
}

impl<H: RequesterHost> Drop for PageProvider<H> {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
