//! MuPDF-backed document source

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use log::info;
use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::cancel::CancelToken;
use super::document::PageSource;
use super::request::WorkerFault;
use super::types::{PageNumber, PixelSize, PointSize};

thread_local! {
    // MuPDF documents are not `Send`; each thread opens its own handle.
    static OPEN_DOCUMENT: RefCell<Option<(PathBuf, Document)>> = const { RefCell::new(None) };
}

/// A PDF on disk, rendered with MuPDF.
///
/// Page geometry is read once at open time so the owning thread never
/// needs a MuPDF handle of its own.
#[derive(Debug)]
pub struct MuPdfDocument {
    path: PathBuf,
    pages: Vec<PointSize>,
}

impl MuPdfDocument {
    pub fn open(path: &Path) -> Result<Self, WorkerFault> {
        let doc = Document::open(path.to_string_lossy().as_ref())?;
        let page_count = doc.page_count()? as usize;

        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let bounds = doc.load_page(index as i32)?.bounds()?;
            pages.push(PointSize::new(
                f64::from(bounds.x1 - bounds.x0),
                f64::from(bounds.y1 - bounds.y0),
            ));
        }

        info!("Opened {} ({page_count} pages)", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pages,
        })
    }

    fn with_document<T>(
        &self,
        f: impl FnOnce(&Document) -> Result<T, WorkerFault>,
    ) -> Result<T, WorkerFault> {
        OPEN_DOCUMENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let stale = !matches!(&*slot, Some((path, _)) if *path == self.path);
            if stale {
                let doc = Document::open(self.path.to_string_lossy().as_ref())?;
                *slot = Some((self.path.clone(), doc));
            }
            match &*slot {
                Some((_, doc)) => f(doc),
                None => Err(WorkerFault::failed("document handle unavailable")),
            }
        })
    }
}

impl PageSource for MuPdfDocument {
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
        let point_size = self
            .page_point_size(page)
            .ok_or(WorkerFault::MissingPage(page))?;

        self.with_document(|doc| {
            let page = doc.load_page(page as i32)?;
            let transform = Matrix::new_scale(
                (f64::from(size.width) / point_size.width) as f32,
                (f64::from(size.height) / point_size.height) as f32,
            );

            if cancel.is_cancelled() {
                return Err(WorkerFault::Cancelled);
            }

            let rgb = Colorspace::device_rgb();
            let pixmap = page.to_pixmap(&transform, &rgb, false, false)?;
            pixmap_to_rgba(&pixmap, size)
        })
    }
}

/// Copy MuPDF samples into an RGBA buffer of exactly `size`, padding
/// with white where rounding left the pixmap a pixel short
fn pixmap_to_rgba(pixmap: &Pixmap, size: PixelSize) -> Result<RgbaImage, WorkerFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(WorkerFault::failed(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let src_width = pixmap.width() as usize;
    let src_height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < stride.saturating_mul(src_height) || src_width * n > stride {
        return Err(WorkerFault::failed("Pixmap buffer size mismatch"));
    }

    let mut image = RgbaImage::from_pixel(size.width, size.height, image::Rgba([0xFF; 4]));
    let copy_width = src_width.min(size.width as usize);
    let copy_height = src_height.min(size.height as usize);

    for (y, row) in image
        .chunks_exact_mut(size.width as usize * 4)
        .take(copy_height)
        .enumerate()
    {
        let src = &samples[y * stride..y * stride + copy_width * n];
        for (dst, px) in row.chunks_exact_mut(4).zip(src.chunks_exact(n)) {
            dst[..3].copy_from_slice(&px[..3]);
        }
    }

    Ok(image)
}
