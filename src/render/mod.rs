//! Page rendering infrastructure
//!
//! A [`PageProvider`] answers "page N at scale S" with whatever image is
//! cached right now and renders the exact image on a background worker,
//! one job at a time.

use std::time::Duration;

mod cache;
mod cancel;
mod document;
mod job;
mod layout;
#[cfg(feature = "pdf")]
mod mupdf_source;
mod provider;
mod queue;
mod request;
mod scheduler;
mod types;
mod worker;

pub use cache::{CacheKey, CacheStats, EvictionPolicy, RenderCache};
pub use cancel::CancelToken;
pub use document::{PageSource, SyntheticDocument};
pub use job::RenderJob;
pub use layout::{PAGE_MARGIN, PageLayout, SceneRect, Viewport, ViewportHost};
#[cfg(feature = "pdf")]
pub use mupdf_source::MuPdfDocument;
pub use provider::{ImmediateImage, PageProvider, ProviderStats, RequesterHost};
pub use queue::{Enqueued, RequestQueue};
pub use request::{JobId, RenderRequest, RequestError, WorkerFault};
pub use scheduler::{ActiveJob, Scheduler, SchedulerState, Submission};
pub use types::*;

/// Render cache budget: 1 GiB
pub const DEFAULT_CACHE_LIMIT_BYTES: usize = 1024 * 1024 * 1024;

/// Debounce between an idle request and the start of its render
pub const DEFAULT_DEQUEUE_DELAY: Duration = Duration::from_millis(50);

/// Device pixels per point
pub const DEFAULT_PIXEL_RATIO: f64 = 1.0;

/// Largest width or height, in pixels, a single page render may have
pub const MAX_RENDER_DIMENSION: u32 = 16_384;
