//! Core types for page rendering

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use image::RgbaImage;

/// Zero-based page index
pub type PageNumber = usize;

/// Relative tolerance used when comparing two scales for equality
pub const SCALE_TOLERANCE: f64 = 1e-6;

/// Zoom factor applied to a page's natural point size.
///
/// Scales arrive from continuous zoom gestures, so [`Scale::approx_eq`]
/// is what callers use to decide whether two scales are "the same".
/// The `Eq`/`Ord`/`Hash` impls are exact (bitwise) and exist so a scale
/// can live in ordered sets and hash maps.
#[derive(Clone, Copy, Debug)]
pub struct Scale(f64);

impl Scale {
    /// Create a scale; rejects zero, negative and non-finite values
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// Tolerance-based equality
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        let diff = (self.0 - other.0).abs();
        diff <= SCALE_TOLERANCE * self.0.max(other.0)
    }

    /// Absolute distance between two scales
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.0 - other.0).abs()
    }
}

impl PartialEq for Scale {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Scale {}

impl PartialOrd for Scale {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scale {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Scale {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Page geometry in PDF points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSize {
    pub width: f64,
    pub height: f64,
}

impl PointSize {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Target raster size in device pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of an RGBA8 buffer with these dimensions
    #[must_use]
    pub fn rgba_bytes(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Opaque identity of whoever asked for a page.
///
/// Only compared and handed back to the requester host; never
/// interpreted by the cache or the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequesterId(pub u64);

impl RequesterId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// A page rasterized at one scale.
///
/// `scale` is the scale the pixels were actually produced for.
#[derive(Clone)]
pub struct RenderedImage {
    page: PageNumber,
    scale: Scale,
    image: RgbaImage,
}

impl RenderedImage {
    #[must_use]
    pub fn new(page: PageNumber, scale: Scale, image: RgbaImage) -> Self {
        Self { page, scale, image }
    }

    #[must_use]
    pub fn page(&self) -> PageNumber {
        self.page
    }

    #[must_use]
    pub fn scale(&self) -> Scale {
        self.scale
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn pixel_size(&self) -> PixelSize {
        PixelSize::new(self.image.width(), self.image.height())
    }

    /// Eviction cost in the render cache
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }
}

impl std::fmt::Debug for RenderedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedImage")
            .field("page", &self.page)
            .field("scale", &self.scale)
            .field("width_px", &self.image.width())
            .field("height_px", &self.image.height())
            .finish_non_exhaustive()
    }
}
