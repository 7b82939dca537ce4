//! Render request, worker message and error types

use super::job::RenderJob;
use super::types::{PageNumber, RenderedImage, RequesterId, Scale};

/// Unique identifier of a dispatched render job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl JobId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// A pending request for one page at one scale
#[derive(Clone, Copy, Debug)]
pub struct RenderRequest {
    pub page: PageNumber,
    pub scale: Scale,
    pub requester: RequesterId,
}

impl RenderRequest {
    #[must_use]
    pub fn new(page: PageNumber, scale: Scale, requester: RequesterId) -> Self {
        Self {
            page,
            scale,
            requester,
        }
    }

    /// Same page and same scale within tolerance
    #[must_use]
    pub fn same_target(&self, page: PageNumber, scale: Scale) -> bool {
        self.page == page && self.scale.approx_eq(scale)
    }
}

/// Message sent to the render worker
#[derive(Debug)]
pub(crate) enum WorkerRequest {
    /// Rasterize one page
    Render(RenderJob),

    /// Stop the worker
    Shutdown,
}

/// Message sent back from the render worker
#[derive(Debug)]
pub(crate) enum WorkerResponse {
    /// Job produced an image
    Rendered { job: JobId, image: RenderedImage },

    /// Job observed its cancellation flag and stopped
    Cancelled(JobId),

    /// Job failed to produce an image
    Failed { job: JobId, error: WorkerFault },
}

/// Errors rejected at the provider boundary, before any work is scheduled
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RequestError {
    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange {
        page: PageNumber,
        page_count: usize,
    },

    #[error("invalid scale {0}")]
    InvalidScale(f64),
}

/// Errors from render jobs and document backends
#[derive(Debug, thiserror::Error)]
pub enum WorkerFault {
    #[error("render cancelled")]
    Cancelled,

    #[error("page {0} does not exist")]
    MissingPage(PageNumber),

    #[error("render target {width}x{height} is outside supported bounds")]
    TooLarge { width: u64, height: u64 },

    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("render failed: {detail}")]
    RenderFailed { detail: String },
}

impl WorkerFault {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::RenderFailed { detail: msg.into() }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
