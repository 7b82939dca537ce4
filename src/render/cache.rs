//! Byte-budgeted cache of rendered pages
//!
//! Entries are keyed by (page, scale). A per-page ordered index of cached
//! scales answers "closest scale we already have" queries so the caller
//! can show an approximate image while the exact one renders.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::types::{PageNumber, RenderedImage, Scale};

/// Cache key for rendered pages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Page number
    pub page: PageNumber,
    /// Scale the image was rendered at (exact value)
    pub scale: Scale,
}

impl CacheKey {
    #[must_use]
    pub const fn new(page: PageNumber, scale: Scale) -> Self {
        Self { page, scale }
    }
}

/// Which entry goes first when the budget is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Lookups refresh an entry's position
    #[default]
    LeastRecentlyUsed,
    /// Lookups leave the order alone; oldest insertion goes first
    LeastRecentlyInserted,
}

/// Counters describing cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Images refused because they alone exceed the budget
    pub rejections: u64,
}

/// Byte-budgeted render cache
pub struct RenderCache {
    entries: LruCache<CacheKey, Arc<RenderedImage>>,
    scales: HashMap<PageNumber, BTreeSet<Scale>>,
    total_cost: usize,
    budget: usize,
    policy: EvictionPolicy,
    stats: CacheStats,
}

impl RenderCache {
    /// Create a cache holding at most `budget` bytes of pixels
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self::with_policy(budget, EvictionPolicy::default())
    }

    #[must_use]
    pub fn with_policy(budget: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: LruCache::unbounded(),
            scales: HashMap::new(),
            total_cost: 0,
            budget,
            policy,
            stats: CacheStats::default(),
        }
    }

    /// Exact lookup: an entry for `page` whose scale matches within tolerance
    pub fn lookup(&mut self, page: PageNumber, scale: Scale) -> Option<Arc<RenderedImage>> {
        let found = self
            .resolve_exact(page, scale)
            .and_then(|stored| self.touch(CacheKey::new(page, stored)));

        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        found
    }

    /// Closest cached scale for `page`; ties go to the lower scale
    pub fn lookup_nearest(
        &mut self,
        page: PageNumber,
        scale: Scale,
    ) -> Option<Arc<RenderedImage>> {
        let nearest = self.nearest_scale(page, scale)?;
        self.touch(CacheKey::new(page, nearest))
    }

    /// Check for an exact entry without affecting eviction order
    #[must_use]
    pub fn contains(&self, page: PageNumber, scale: Scale) -> bool {
        self.resolve_exact(page, scale).is_some()
    }

    /// Insert a rendered image under its own (page, scale).
    ///
    /// Returns `false` when the image is larger than the whole budget;
    /// nothing else is evicted in that case.
    pub fn insert(&mut self, image: RenderedImage) -> bool {
        let page = image.page();
        let scale = image.scale();
        let cost = image.byte_size();

        if let Some(stored) = self.resolve_exact(page, scale) {
            self.remove(CacheKey::new(page, stored));
        }

        if cost > self.budget {
            debug!(
                "Rejecting page {page} at scale {scale}: {cost} bytes exceeds budget {}",
                self.budget
            );
            self.stats.rejections += 1;
            return false;
        }

        while self.total_cost + cost > self.budget {
            if !self.evict_one() {
                break;
            }
        }

        self.entries.put(CacheKey::new(page, scale), Arc::new(image));
        self.scales.entry(page).or_default().insert(scale);
        self.total_cost += cost;
        self.stats.insertions += 1;
        true
    }

    /// Change the byte budget, evicting immediately if it shrank
    pub fn set_budget(&mut self, bytes: usize) {
        self.budget = bytes;
        while self.total_cost > self.budget {
            if !self.evict_one() {
                break;
            }
        }
    }

    /// Drop every cached scale of one page
    pub fn invalidate_page(&mut self, page: PageNumber) {
        let Some(scales) = self.scales.remove(&page) else {
            return;
        };
        for scale in scales {
            if let Some(image) = self.entries.pop(&CacheKey::new(page, scale)) {
                self.total_cost -= image.byte_size();
            }
        }
    }

    /// Clear all cached pages
    pub fn clear(&mut self) {
        self.entries.clear();
        self.scales.clear();
        self.total_cost = 0;
    }

    /// Scales cached for a page, ascending
    #[must_use]
    pub fn cached_scales(&self, page: PageNumber) -> Vec<Scale> {
        self.scales
            .get(&page)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of cached images
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held
    #[must_use]
    pub fn total_cost(&self) -> usize {
        self.total_cost
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// All cached images, most recently used first
    pub fn images(&self) -> impl Iterator<Item = &Arc<RenderedImage>> {
        self.entries.iter().map(|(_, image)| image)
    }

    fn touch(&mut self, key: CacheKey) -> Option<Arc<RenderedImage>> {
        match self.policy {
            EvictionPolicy::LeastRecentlyUsed => self.entries.get(&key).cloned(),
            EvictionPolicy::LeastRecentlyInserted => self.entries.peek(&key).cloned(),
        }
    }

    /// Stored scale for `page` that equals `scale` within tolerance
    fn resolve_exact(&self, page: PageNumber, scale: Scale) -> Option<Scale> {
        self.nearest_scale(page, scale)
            .filter(|stored| stored.approx_eq(scale))
    }

    fn nearest_scale(&self, page: PageNumber, target: Scale) -> Option<Scale> {
        let set = self.scales.get(&page)?;
        let above = set.range(target..).next().copied();
        let below = set.range(..target).next_back().copied();

        match (below, above) {
            (Some(lo), Some(hi)) => {
                if target.distance(lo) <= target.distance(hi) {
                    Some(lo)
                } else {
                    Some(hi)
                }
            }
            (lo, hi) => lo.or(hi),
        }
    }

    fn remove(&mut self, key: CacheKey) {
        if let Some(image) = self.entries.pop(&key) {
            self.total_cost -= image.byte_size();
        }
        self.unindex(key);
    }

    fn evict_one(&mut self) -> bool {
        let Some((key, image)) = self.entries.pop_lru() else {
            return false;
        };
        self.total_cost -= image.byte_size();
        self.unindex(key);
        self.stats.evictions += 1;
        debug!("Evicted page {} at scale {}", key.page, key.scale);
        true
    }

    fn unindex(&mut self, key: CacheKey) {
        if let Some(set) = self.scales.get_mut(&key.page) {
            set.remove(&key.scale);
            if set.is_empty() {
                self.scales.remove(&key.page);
            }
        }
    }
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("len", &self.entries.len())
            .field("total_cost", &self.total_cost)
            .field("budget", &self.budget)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;

    fn scale(value: f64) -> Scale {
        Scale::new(value).unwrap()
    }

    /// 100 bytes per image
    fn page_image(page: PageNumber, s: f64) -> RenderedImage {
        RenderedImage::new(page, scale(s), RgbaImage::new(5, 5))
    }

    #[test]
    fn cache_insert_and_lookup() {
        let mut cache = RenderCache::new(1_000);

        assert!(cache.insert(page_image(0, 1.0)));

        assert!(cache.contains(0, scale(1.0)));
        assert!(cache.lookup(0, scale(1.0)).is_some());
        assert!(cache.lookup(0, scale(1.5)).is_none());
        assert!(cache.lookup(1, scale(1.0)).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 100);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn exact_lookup_tolerates_float_noise() {
        let mut cache = RenderCache::new(1_000);
        cache.insert(page_image(2, 1.1));

        let image = cache.lookup(2, scale(1.0 + 0.1)).unwrap();
        assert_eq!(image.scale().get(), 1.1);
    }

    #[test]
    fn nearest_prefers_closest_and_lower_on_tie() {
        let mut cache = RenderCache::new(1_000);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(0, 2.0));

        let nearest = |cache: &mut RenderCache, s: f64| {
            cache.lookup_nearest(0, scale(s)).map(|image| image.scale().get())
        };

        assert_eq!(nearest(&mut cache, 1.4), Some(1.0));
        assert_eq!(nearest(&mut cache, 1.6), Some(2.0));
        assert_eq!(nearest(&mut cache, 1.5), Some(1.0));
        assert_eq!(nearest(&mut cache, 0.1), Some(1.0));
        assert_eq!(nearest(&mut cache, 9.0), Some(2.0));
        assert!(cache.lookup_nearest(1, scale(1.0)).is_none());
    }

    #[test]
    fn insert_evicts_until_within_budget() {
        let mut cache = RenderCache::new(250);

        for page in 0..5 {
            assert!(cache.insert(page_image(page, 1.0)));
            assert!(cache.total_cost() <= cache.budget());
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(3, scale(1.0)));
        assert!(cache.contains(4, scale(1.0)));
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn eviction_keeps_scale_index_consistent() {
        let mut cache = RenderCache::new(200);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(0, 2.0));
        cache.insert(page_image(1, 1.0));

        assert_eq!(cache.cached_scales(0), vec![scale(2.0)]);
        let nearest = cache.lookup_nearest(0, scale(1.0)).unwrap();
        assert_eq!(nearest.scale().get(), 2.0);
    }

    #[test]
    fn lru_policy_protects_recently_read_entries() {
        let mut cache = RenderCache::with_policy(200, EvictionPolicy::LeastRecentlyUsed);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(1, 1.0));

        assert!(cache.lookup(0, scale(1.0)).is_some());
        cache.insert(page_image(2, 1.0));

        assert!(cache.contains(0, scale(1.0)));
        assert!(!cache.contains(1, scale(1.0)));
    }

    #[test]
    fn insertion_policy_ignores_reads() {
        let mut cache = RenderCache::with_policy(200, EvictionPolicy::LeastRecentlyInserted);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(1, 1.0));

        assert!(cache.lookup(0, scale(1.0)).is_some());
        cache.insert(page_image(2, 1.0));

        assert!(!cache.contains(0, scale(1.0)));
        assert!(cache.contains(1, scale(1.0)));
    }

    #[test]
    fn oversized_image_is_rejected_without_evicting() {
        let mut cache = RenderCache::new(150);
        cache.insert(page_image(0, 1.0));

        let huge = RenderedImage::new(1, scale(1.0), RgbaImage::new(10, 10));
        assert!(!cache.insert(huge));

        assert!(cache.contains(0, scale(1.0)));
        assert_eq!(cache.stats().rejections, 1);
    }

    #[test]
    fn reinsert_replaces_existing_entry() {
        let mut cache = RenderCache::new(1_000);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(0, 1.0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 100);
        assert_eq!(cache.cached_scales(0).len(), 1);
    }

    #[test]
    fn shrinking_budget_evicts_immediately() {
        let mut cache = RenderCache::new(1_000);
        for page in 0..4 {
            cache.insert(page_image(page, 1.0));
        }

        cache.set_budget(250);

        assert_eq!(cache.len(), 2);
        assert!(cache.total_cost() <= 250);
    }

    #[test]
    fn invalidate_page_removes_all_scales() {
        let mut cache = RenderCache::new(1_000);
        cache.insert(page_image(0, 1.0));
        cache.insert(page_image(0, 2.0));
        cache.insert(page_image(1, 1.0));

        cache.invalidate_page(0);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 100);
        assert!(cache.cached_scales(0).is_empty());
        assert!(cache.lookup_nearest(0, scale(1.0)).is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = RenderCache::new(1_000);
        for page in 0..3 {
            cache.insert(page_image(page, 1.0));
        }

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
        assert!(cache.cached_scales(1).is_empty());
    }
}
