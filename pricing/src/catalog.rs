//! Read interface over the currency and segment catalog.
//!
//! The catalog is administered elsewhere; the core only reads it. An
//! in-memory implementation backs tests and the simulator, and
//! [`CachedCatalog`] puts a short TTL cache in front of discount lookups.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fxdesk_common::{Currency, CurrencyDefinition, Discount, Segment, SegmentId, SharedClock};
use tracing::debug;

use crate::cache::{TtlCache, TtlCacheConfig};

/// Catalog reads needed by the core.
pub trait Catalog: Send + Sync {
    /// Look up a currency, active or not.
    fn currency(&self, code: &Currency) -> Option<CurrencyDefinition>;

    /// All active currencies.
    fn active_currencies(&self) -> Vec<CurrencyDefinition>;

    /// Look up a segment, active or not.
    fn segment(&self, id: &SegmentId) -> Option<Segment>;

    /// All active segments.
    fn active_segments(&self) -> Vec<Segment>;

    /// Current discount of a segment. `None` means 0%.
    fn discount(&self, segment: &SegmentId) -> Option<Discount>;

    /// Look up an active currency.
    fn active_currency(&self, code: &Currency) -> Option<CurrencyDefinition> {
        self.currency(code).filter(|c| c.active)
    }

    /// Look up an active segment.
    fn active_segment(&self, id: &SegmentId) -> Option<Segment> {
        self.segment(id).filter(|s| s.active)
    }
}

/// Catalog held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    currencies: DashMap<Currency, CurrencyDefinition>,
    segments: DashMap<SegmentId, Segment>,
    discounts: DashMap<SegmentId, Discount>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a currency.
    pub fn put_currency(&self, currency: CurrencyDefinition) {
        self.currencies.insert(currency.code.clone(), currency);
    }

    /// Flip a currency's active flag. Returns false if it is unknown.
    pub fn set_currency_active(&self, code: &Currency, active: bool) -> bool {
        match self.currencies.get_mut(code) {
            Some(mut currency) => {
                currency.active = active;
                true
            }
            None => false,
        }
    }

    /// Insert or replace a segment.
    pub fn put_segment(&self, segment: Segment) {
        self.segments.insert(segment.id.clone(), segment);
    }

    /// Create an active segment from its name.
    pub fn add_segment(&self, name: impl Into<String>, at: DateTime<Utc>) -> Segment {
        let segment = Segment::new(name, at);
        self.put_segment(segment.clone());
        segment
    }

    /// Flip a segment's active flag. Returns false if it is unknown.
    pub fn set_segment_active(&self, id: &SegmentId, active: bool) -> bool {
        match self.segments.get_mut(id) {
            Some(mut segment) => {
                segment.active = active;
                true
            }
            None => false,
        }
    }

    /// Insert or replace a segment's discount.
    pub fn put_discount(&self, discount: Discount) {
        self.discounts.insert(discount.segment.clone(), discount);
    }

    pub fn remove_discount(&self, segment: &SegmentId) {
        self.discounts.remove(segment);
    }
}

impl Catalog for InMemoryCatalog {
    fn currency(&self, code: &Currency) -> Option<CurrencyDefinition> {
        self.currencies.get(code).map(|c| c.clone())
    }

    fn active_currencies(&self) -> Vec<CurrencyDefinition> {
        let mut active: Vec<_> = self
            .currencies
            .iter()
            .filter(|c| c.active)
            .map(|c| c.clone())
            .collect();
        active.sort_by(|a, b| a.code.cmp(&b.code));
        active
    }

    fn segment(&self, id: &SegmentId) -> Option<Segment> {
        self.segments.get(id).map(|s| s.clone())
    }

    fn active_segments(&self) -> Vec<Segment> {
        let mut active: Vec<_> = self
            .segments
            .iter()
            .filter(|s| s.active)
            .map(|s| s.clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    fn discount(&self, segment: &SegmentId) -> Option<Discount> {
        self.discounts.get(segment).map(|d| d.clone())
    }
}

/// Catalog decorator caching discount lookups.
pub struct CachedCatalog {
    inner: Arc<dyn Catalog>,
    discounts: TtlCache<SegmentId, Option<Discount>>,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn Catalog>, config: TtlCacheConfig, clock: SharedClock) -> Self {
        Self {
            inner,
            discounts: TtlCache::with_clock(config, clock),
        }
    }

    /// Forget the cached discount of one segment.
    pub fn invalidate_discount(&self, segment: &SegmentId) {
        self.discounts.invalidate(segment);
    }

    /// Forget every cached discount.
    pub fn invalidate_discounts(&self) {
        debug!("Discount cache cleared");
        self.discounts.clear();
    }

    pub fn inner(&self) -> &Arc<dyn Catalog> {
        &self.inner
    }
}

impl Catalog for CachedCatalog {
    fn currency(&self, code: &Currency) -> Option<CurrencyDefinition> {
        self.inner.currency(code)
    }

    fn active_currencies(&self) -> Vec<CurrencyDefinition> {
        self.inner.active_currencies()
    }

    fn segment(&self, id: &SegmentId) -> Option<Segment> {
        self.inner.segment(id)
    }

    fn active_segments(&self) -> Vec<Segment> {
        self.inner.active_segments()
    }

    fn discount(&self, segment: &SegmentId) -> Option<Discount> {
        self.discounts
            .get_or_insert_with(segment, || self.inner.discount(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fxdesk_common::{Actor, ManualClock};
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn discount(segment: &str, pct: rust_decimal::Decimal) -> Discount {
        Discount::new(SegmentId::new(segment), pct, Actor::user("admin"), start()).unwrap()
    }

    #[test]
    fn test_active_filters() {
        let catalog = InMemoryCatalog::new();
        catalog.put_currency(CurrencyDefinition::new(Currency::usd(), "US Dollar", 2));
        catalog.put_currency(CurrencyDefinition::new(Currency::eur(), "Euro", 2));
        catalog.set_currency_active(&Currency::eur(), false);
        catalog.add_segment("Retail", start());

        let active: Vec<_> = catalog.active_currencies().into_iter().map(|c| c.code).collect();
        assert_eq!(active, vec![Currency::usd()]);
        assert!(catalog.currency(&Currency::eur()).is_some());
        assert!(catalog.active_currency(&Currency::eur()).is_none());
        assert!(catalog.active_segment(&SegmentId::new("retail")).is_some());
    }

    #[test]
    fn test_cached_discount_until_invalidated() {
        let inner = Arc::new(InMemoryCatalog::new());
        inner.put_discount(discount("retail", dec!(10)));
        let clock = ManualClock::new(start());
        let cached = CachedCatalog::new(
            inner.clone(),
            TtlCacheConfig {
                default_ttl: Duration::seconds(2),
                ..Default::default()
            },
            Arc::new(clock.clone()),
        );
        let retail = SegmentId::new("retail");

        assert_eq!(cached.discount(&retail).map(|d| d.percentage), Some(dec!(10)));

        inner.put_discount(discount("retail", dec!(25)));
        assert_eq!(cached.discount(&retail).map(|d| d.percentage), Some(dec!(10)));

        cached.invalidate_discount(&retail);
        assert_eq!(cached.discount(&retail).map(|d| d.percentage), Some(dec!(25)));
    }

    #[test]
    fn test_cached_absence_expires() {
        let inner = Arc::new(InMemoryCatalog::new());
        let clock = ManualClock::new(start());
        let cached = CachedCatalog::new(inner.clone(), TtlCacheConfig::default(), Arc::new(clock.clone()));
        let vip = SegmentId::new("vip");

        assert!(cached.discount(&vip).is_none());
        inner.put_discount(discount("vip", dec!(50)));
        assert!(cached.discount(&vip).is_none());

        clock.advance(Duration::seconds(3));
        assert_eq!(cached.discount(&vip).map(|d| d.percentage), Some(dec!(50)));
    }
}
