//! Document backends that rasterize pages

use std::time::{Duration, Instant};

use image::RgbaImage;
use rayon::prelude::*;

use super::cancel::CancelToken;
use super::request::WorkerFault;
use super::types::{PageNumber, PixelSize, PointSize};

/// A paginated document that can rasterize its pages.
///
/// Shared between the owning context (page geometry queries) and the
/// render worker, so implementations must be safe for concurrent reads.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Natural page size in points, `None` for a page that does not exist
    fn page_point_size(&self, page: PageNumber) -> Option<PointSize>;

    /// Rasterize `page` into exactly `size` pixels.
    ///
    /// Implementations should return [`WorkerFault::Cancelled`] as soon
    /// as they notice `cancel` has been set.
    fn render(
        &self,
        page: PageNumber,
        size: PixelSize,
        cancel: &CancelToken,
    ) -> Result<RgbaImage, WorkerFault>;
}

/// Rows filled between cancellation checks
const ROW_BAND: usize = 64;

/// Granularity of the simulated render delay
const DELAY_SLICE: Duration = Duration::from_millis(2);

/// In-memory document that paints recognisable placeholder pages.
///
/// Used by the CLI when no PDF is given and by tests. An optional render
/// delay simulates an expensive backend while still honouring
/// cancellation.
#[derive(Clone, Debug)]
pub struct SyntheticDocument {
    pages: Vec<PointSize>,
    render_delay: Duration,
}

impl SyntheticDocument {
    /// `count` pages of identical size
    #[must_use]
    pub fn uniform(count: usize, size: PointSize) -> Self {
        Self::with_pages(vec![size; count])
    }

    #[must_use]
    pub fn with_pages(pages: Vec<PointSize>) -> Self {
        Self {
            pages,
            render_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    fn simulate_work(&self, cancel: &CancelToken) -> Result<(), WorkerFault> {
        let deadline = Instant::now() + self.render_delay;
        loop {
            if cancel.is_cancelled() {
                return Err(WorkerFault::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(DELAY_SLICE.min(deadline - now));
        }
    }
}

impl PageSource for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_point_size(&self, page: PageNumber) -> Option<PointSize> {
        self.pages.get(page).copied()
    }

    fn render(
        &self,
        page: PageNumber,
        size: PixelSize,
        cancel: &CancelToken,
    ) -> Result<RgbaImage, WorkerFault> {
        if page >= self.pages.len() {
            return Err(WorkerFault::MissingPage(page));
        }
        if size.width == 0 || size.height == 0 {
            return Err(WorkerFault::TooLarge {
                width: u64::from(size.width),
                height: u64::from(size.height),
            });
        }

        self.simulate_work(cancel)?;

        let width = size.width as usize;
        let height = size.height as usize;
        let row_bytes = width * 4;
        let accent = page_accent(page);
        let band = (height / 8).max(1);
        let border = (width.min(height) / 50).max(1);

        let mut pixels = vec![0u8; size.rgba_bytes()];
        pixels
            .par_chunks_mut(row_bytes * ROW_BAND)
            .enumerate()
            .try_for_each(|(chunk_idx, chunk)| {
                if cancel.is_cancelled() {
                    return Err(WorkerFault::Cancelled);
                }
                for (row_idx, row) in chunk.chunks_exact_mut(row_bytes).enumerate() {
                    let y = chunk_idx * ROW_BAND + row_idx;
                    let in_header = y < band;
                    let on_edge_row = y < border || y + border >= height;
                    for (x, px) in row.chunks_exact_mut(4).enumerate() {
                        let on_edge = on_edge_row || x < border || x + border >= width;
                        let rgb = if on_edge {
                            [0x40, 0x40, 0x40]
                        } else if in_header {
                            accent
                        } else {
                            [0xFF, 0xFF, 0xFF]
                        };
                        px[..3].copy_from_slice(&rgb);
                        px[3] = 0xFF;
                    }
                }
                Ok(())
            })?;

        RgbaImage::from_raw(size.width, size.height, pixels)
            .ok_or_else(|| WorkerFault::failed("pixel buffer size mismatch"))
    }
}

/// Stable per-page header colour so pages are told apart in dumps
fn page_accent(page: PageNumber) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 6] = [
        [0x66, 0x99, 0xCC],
        [0xCC, 0x66, 0x66],
        [0x66, 0xCC, 0x99],
        [0xCC, 0xAA, 0x55],
        [0x99, 0x66, 0xCC],
        [0x55, 0xAA, 0xCC],
    ];
    PALETTE[page % PALETTE.len()]
}
