//! A single background rasterization of one page at one scale

use std::time::Instant;

use log::debug;

use super::MAX_RENDER_DIMENSION;
use super::cancel::CancelToken;
use super::document::PageSource;
use super::request::{JobId, WorkerFault};
use super::types::{PageNumber, PixelSize, PointSize, RenderedImage, Scale};

/// Everything the worker needs to render one page
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub id: JobId,
    pub page: PageNumber,
    pub scale: Scale,
    pub pixel_ratio: f64,
    pub cancel: CancelToken,
}

impl RenderJob {
    /// Output size: page geometry x scale x device pixel ratio
    pub fn target_size(&self, point_size: PointSize) -> Result<PixelSize, WorkerFault> {
        let factor = self.scale.get() * self.pixel_ratio;
        let width = (point_size.width * factor).round();
        let height = (point_size.height * factor).round();

        let max = f64::from(MAX_RENDER_DIMENSION);
        if !(width >= 1.0 && height >= 1.0 && width <= max && height <= max) {
            return Err(WorkerFault::TooLarge {
                width: width.max(0.0) as u64,
                height: height.max(0.0) as u64,
            });
        }

        Ok(PixelSize::new(width as u32, height as u32))
    }

    /// Rasterize the page. Checks the cancellation flag before touching
    /// the backend and again before handing the result back.
    pub fn run(&self, source: &dyn PageSource) -> Result<RenderedImage, WorkerFault> {
        if self.cancel.is_cancelled() {
            return Err(WorkerFault::Cancelled);
        }

        let point_size = source
            .page_point_size(self.page)
            .ok_or(WorkerFault::MissingPage(self.page))?;
        let size = self.target_size(point_size)?;

        let started = Instant::now();
        let image = source.render(self.page, size, &self.cancel)?;

        if self.cancel.is_cancelled() {
            return Err(WorkerFault::Cancelled);
        }
        if image.dimensions() != (size.width, size.height) {
            return Err(WorkerFault::failed(format!(
                "backend produced {}x{} for a {}x{} target",
                image.width(),
                image.height(),
                size.width,
                size.height
            )));
        }

        debug!(
            "Render finished: page = {} scale = {} size = {}x{} time = {}ms",
            self.page,
            self.scale,
            size.width,
            size.height,
            started.elapsed().as_millis()
        );

        Ok(RenderedImage::new(self.page, self.scale, image))
    }
}
