//! Continuous-scroll page layout and viewport relevance
//!
//! Pages are stacked top to bottom in scene coordinates (PDF points) with
//! a fixed margin around each. The viewport is a window onto that scene
//! at some zoom factor; a page is relevant while its rectangle intersects
//! the window.

use std::collections::BTreeSet;

use super::document::PageSource;
use super::provider::RequesterHost;
use super::types::{PageNumber, PointSize, RequesterId, Scale};

/// Gap between pages and around the document, in points
pub const PAGE_MARGIN: f64 = 6.0;

/// Axis-aligned rectangle in scene points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SceneRect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Overlap with non-zero area
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Vertical stack of page rectangles
#[derive(Clone, Debug)]
pub struct PageLayout {
    rects: Vec<SceneRect>,
    width: f64,
    height: f64,
}

impl PageLayout {
    /// Stack pages of the given sizes
    #[must_use]
    pub fn stack(sizes: impl IntoIterator<Item = PointSize>) -> Self {
        let mut rects = Vec::new();
        let mut cursor = PAGE_MARGIN;
        let mut max_width: f64 = 0.0;

        for size in sizes {
            rects.push(SceneRect::new(PAGE_MARGIN, cursor, size.width, size.height));
            cursor += size.height + PAGE_MARGIN;
            max_width = max_width.max(size.width);
        }

        Self {
            rects,
            width: max_width + 2.0 * PAGE_MARGIN,
            height: cursor,
        }
    }

    /// Layout for every page of a document; pages without geometry get
    /// zero height
    #[must_use]
    pub fn from_source(source: &dyn PageSource) -> Self {
        Self::stack((0..source.page_count()).map(|page| {
            source
                .page_point_size(page)
                .unwrap_or(PointSize::new(0.0, 0.0))
        }))
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.rects.len()
    }

    #[must_use]
    pub fn page_rect(&self, page: PageNumber) -> Option<SceneRect> {
        self.rects.get(page).copied()
    }

    /// Whole document extent including margins
    #[must_use]
    pub fn document_size(&self) -> PointSize {
        PointSize::new(self.width, self.height)
    }

    /// Pages intersecting `region`, in order
    #[must_use]
    pub fn pages_in(&self, region: &SceneRect) -> Vec<PageNumber> {
        let first = self.rects.partition_point(|r| r.bottom() <= region.y);
        self.rects[first..]
            .iter()
            .take_while(|r| r.y < region.bottom())
            .enumerate()
            .filter(|(_, r)| r.intersects(region))
            .map(|(offset, _)| first + offset)
            .collect()
    }
}

/// Window onto the scene
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// Scroll offset of the top edge, in scene points
    pub top: f64,
    /// Widget size in device-independent pixels
    pub width: f64,
    pub height: f64,
    /// Scene-to-widget zoom factor
    pub zoom: f64,
}

impl Viewport {
    /// Minimum allowed zoom factor
    pub const MIN_ZOOM: f64 = 0.1;
    /// Maximum allowed zoom factor
    pub const MAX_ZOOM: f64 = 10.0;

    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            top: 0.0,
            width,
            height,
            zoom: 1.0,
        }
    }

    /// Visible part of the scene
    #[must_use]
    pub fn scene_rect(&self) -> SceneRect {
        SceneRect::new(0.0, self.top, self.width / self.zoom, self.height / self.zoom)
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
    }
}

/// Requester host for a continuous-scroll page view.
///
/// Each page is its own requester: `RequesterId(page)`. Notifications
/// mark pages as needing a repaint until [`take_dirty`](Self::take_dirty).
#[derive(Debug)]
pub struct ViewportHost {
    layout: PageLayout,
    viewport: Viewport,
    dirty: BTreeSet<PageNumber>,
}

impl ViewportHost {
    #[must_use]
    pub fn new(layout: PageLayout, viewport: Viewport) -> Self {
        Self {
            layout,
            viewport,
            dirty: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn requester_for(page: PageNumber) -> RequesterId {
        RequesterId::new(page as u64)
    }

    #[must_use]
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Scroll so the viewport's top edge sits at `top`, clamped to the
    /// document
    pub fn scroll_to(&mut self, top: f64) {
        let visible = self.viewport.scene_rect().height;
        let max_top = (self.layout.document_size().height - visible).max(0.0);
        self.viewport.top = top.clamp(0.0, max_top);
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.viewport.set_zoom(zoom);
    }

    #[must_use]
    pub fn visible_pages(&self) -> Vec<PageNumber> {
        self.layout.pages_in(&self.viewport.scene_rect())
    }

    /// Pages announced since the last call
    pub fn take_dirty(&mut self) -> Vec<PageNumber> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }
}

impl RequesterHost for ViewportHost {
    fn is_relevant(&self, requester: RequesterId) -> bool {
        let region = self.viewport.scene_rect();
        usize::try_from(requester.0)
            .ok()
            .and_then(|page| self.layout.page_rect(page))
            .is_some_and(|rect| rect.intersects(&region))
    }

    fn notify(&mut self, requester: RequesterId, page: PageNumber, _scale: Scale) {
        debug_assert_eq!(requester, Self::requester_for(page));
        self.dirty.insert(page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PageLayout {
        PageLayout::stack(vec![PointSize::new(600.0, 800.0); 5])
    }

    #[test]
    fn pages_stack_with_margins() {
        let layout = layout();

        assert_eq!(
            layout.page_rect(0),
            Some(SceneRect::new(6.0, 6.0, 600.0, 800.0))
        );
        assert_eq!(layout.page_rect(1).unwrap().y, 812.0);
        assert_eq!(layout.document_size(), PointSize::new(612.0, 6.0 + 5.0 * 806.0));
        assert!(layout.page_rect(5).is_none());
    }

    #[test]
    fn pages_in_returns_intersecting_range() {
        let layout = layout();

        assert_eq!(layout.pages_in(&SceneRect::new(0.0, 0.0, 600.0, 400.0)), vec![0]);
        assert_eq!(
            layout.pages_in(&SceneRect::new(0.0, 700.0, 600.0, 900.0)),
            vec![0, 1]
        );
        // Margin strip between pages 0 and 1
        assert!(layout.pages_in(&SceneRect::new(0.0, 806.5, 600.0, 5.0)).is_empty());
    }

    #[test]
    fn zooming_out_shows_more_pages() {
        let mut host = ViewportHost::new(layout(), Viewport::new(600.0, 800.0));
        assert_eq!(host.visible_pages(), vec![0]);

        host.set_zoom(0.25);
        assert_eq!(host.visible_pages(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut viewport = Viewport::new(100.0, 100.0);

        viewport.set_zoom(0.01);
        assert_eq!(viewport.zoom, Viewport::MIN_ZOOM);
        viewport.set_zoom(50.0);
        assert_eq!(viewport.zoom, Viewport::MAX_ZOOM);
    }

    #[test]
    fn relevance_follows_scrolling() {
        let mut host = ViewportHost::new(layout(), Viewport::new(600.0, 400.0));
        let first = ViewportHost::requester_for(0);
        let third = ViewportHost::requester_for(2);

        assert!(host.is_relevant(first));
        assert!(!host.is_relevant(third));

        host.scroll_to(1700.0);

        assert!(!host.is_relevant(first));
        assert!(host.is_relevant(third));
        assert!(!host.is_relevant(RequesterId::new(99)));
    }

    #[test]
    fn scroll_is_clamped_to_document() {
        let mut host = ViewportHost::new(layout(), Viewport::new(600.0, 400.0));

        host.scroll_to(1.0e9);
        assert_eq!(host.visible_pages(), vec![4]);

        host.scroll_to(-50.0);
        assert_eq!(host.viewport().top, 0.0);
    }

    #[test]
    fn notifications_mark_pages_dirty_once() {
        let mut host = ViewportHost::new(layout(), Viewport::new(600.0, 400.0));
        let scale = Scale::new(1.0).unwrap();

        host.notify(ViewportHost::requester_for(1), 1, scale);
        host.notify(ViewportHost::requester_for(0), 0, scale);
        host.notify(ViewportHost::requester_for(1), 1, scale);

        assert_eq!(host.take_dirty(), vec![0, 1]);
        assert!(host.take_dirty().is_empty());
    }
}
