//! Pending render requests in arrival order

use std::collections::VecDeque;

use super::request::RenderRequest;
use super::types::{PageNumber, RequesterId, Scale};

/// Outcome of [`RequestQueue::enqueue`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Enqueued {
    /// New entry at the back of the queue
    Appended,
    /// Page was already pending; its scale was replaced in place
    Coalesced { previous: Scale },
}

/// FIFO of pending requests holding at most one entry per page
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: VecDeque<RenderRequest>,
}

impl RequestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, or update the scale of the page's pending entry
    /// without moving it
    pub fn enqueue(&mut self, request: RenderRequest) -> Enqueued {
        if let Some(pending) = self.requests.iter_mut().find(|r| r.page == request.page) {
            let previous = pending.scale;
            pending.scale = request.scale;
            return Enqueued::Coalesced { previous };
        }

        self.requests.push_back(request);
        Enqueued::Appended
    }

    /// Remove and return the oldest pending request
    pub fn dequeue_front(&mut self) -> Option<RenderRequest> {
        self.requests.pop_front()
    }

    /// Drop the leading run of requests whose requester is no longer
    /// relevant, stopping at the first relevant one. Returns how many
    /// were removed.
    pub fn prune_stale(&mut self, mut is_relevant: impl FnMut(RequesterId) -> bool) -> usize {
        let stale = self
            .requests
            .iter()
            .position(|r| is_relevant(r.requester))
            .unwrap_or(self.requests.len());

        self.requests.drain(..stale);
        stale
    }

    /// Pending entry for a page, if any
    #[must_use]
    pub fn get(&self, page: PageNumber) -> Option<&RenderRequest> {
        self.requests.iter().find(|r| r.page == page)
    }

    #[must_use]
    pub fn contains_page(&self, page: PageNumber) -> bool {
        self.get(page).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderRequest> {
        self.requests.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
