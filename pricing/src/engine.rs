//! Per-segment quote generation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fxdesk_common::{
    Actor, Currency, DeskEvent, Discount, Quote, QuoteId, QuoteMatch, QuoteSnapshot,
    QuoteTrigger, RateId, RateObservation, SegmentId, SharedClock, UnitOfWork,
};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CachedCatalog, Catalog};
use crate::error::{PricingError, PricingResult};
use crate::quotes::QuoteBook;
use crate::rates::{NewRate, RateStore};

/// Turns rate observations into one quote per active segment.
///
/// All writes go through a caller-owned [`UnitOfWork`]; nothing becomes
/// visible until the caller commits, and the `QuotesGenerated` events are
/// released by that commit.
pub struct SegmentPricingEngine {
    catalog: Arc<CachedCatalog>,
    rates: RateStore,
    quotes: QuoteBook,
    clock: SharedClock,
}

impl SegmentPricingEngine {
    pub fn new(catalog: Arc<CachedCatalog>, clock: SharedClock) -> Self {
        Self {
            catalog,
            rates: RateStore::new(),
            quotes: QuoteBook::new(),
            clock,
        }
    }

    pub fn catalog(&self) -> &Arc<CachedCatalog> {
        &self.catalog
    }

    pub fn rates(&self) -> &RateStore {
        &self.rates
    }

    pub fn quotes(&self) -> &QuoteBook {
        &self.quotes
    }

    /// Stage a new rate observation for an active currency.
    #[instrument(skip(self, unit), fields(currency = %rate.currency, date = %rate.effective_date))]
    pub fn record_rate(
        &self,
        unit: &mut UnitOfWork,
        rate: NewRate,
    ) -> PricingResult<RateObservation> {
        if self.catalog.active_currency(&rate.currency).is_none() {
            return Err(PricingError::UnknownCurrency(rate.currency));
        }

        let observation = self.rates.stage(unit, rate, self.clock.now())?;
        info!(
            rate_id = %observation.id,
            buy = %observation.buy_price,
            sell = %observation.sell_price,
            "Rate observation staged"
        );
        Ok(observation)
    }

    /// Generate one quote per active segment from a committed observation.
    ///
    /// An observation that is no longer the latest for its currency yields no
    /// quotes, so a late fan-out cannot overwrite a newer one.
    #[instrument(skip(self, unit, observation), fields(currency = %observation.currency, rate_id = %observation.id))]
    pub fn generate_quotes(
        &self,
        unit: &mut UnitOfWork,
        observation: &RateObservation,
        actor: &Actor,
    ) -> PricingResult<Vec<Quote>> {
        if !self.rates.is_latest(observation) {
            debug!("Observation superseded, skipping fan-out");
            return Ok(Vec::new());
        }

        let mut priced = Vec::new();
        for segment in self.catalog.active_segments() {
            let snapshot = self.price_segment(observation, &segment.id)?;
            priced.push((observation, segment.id, snapshot));
        }

        let quotes = self.assemble(priced, QuoteTrigger::RateChange, actor);
        self.stage_quotes(unit, &quotes, QuoteTrigger::RateChange);

        info!(quotes = quotes.len(), "Quotes generated");
        Ok(quotes)
    }

    /// Price a newly created segment against the latest rate of every active
    /// currency. A segment with no rate history to inherit yields no quotes.
    #[instrument(skip(self, unit))]
    pub fn backfill_segment(
        &self,
        unit: &mut UnitOfWork,
        segment: &SegmentId,
        actor: &Actor,
    ) -> PricingResult<Vec<Quote>> {
        self.fan_out_segment(unit, segment, QuoteTrigger::SegmentBackfill, actor)
    }

    /// Re-price one segment after its discount was created or changed.
    #[instrument(skip(self, unit))]
    pub fn regenerate_for_segment(
        &self,
        unit: &mut UnitOfWork,
        segment: &SegmentId,
        actor: &Actor,
    ) -> PricingResult<Vec<Quote>> {
        self.fan_out_segment(unit, segment, QuoteTrigger::DiscountChange, actor)
    }

    /// Most recent quote for the pair created at or before `as_of`.
    ///
    /// When the segment has no quote at all, the latest quote of any segment
    /// is returned as a [`QuoteMatch::Fallback`]; that quote does not carry
    /// the segment's discount and the substitution is logged.
    pub fn latest_quote(
        &self,
        currency: &Currency,
        segment: &SegmentId,
        as_of: DateTime<Utc>,
    ) -> Option<QuoteMatch> {
        let found = self.quotes.lookup(currency, segment, as_of)?;
        if let QuoteMatch::Fallback(quote) = &found {
            warn!(
                currency = %currency,
                segment = %segment,
                fallback_segment = %quote.segment,
                quote_id = %quote.id,
                "No quote for segment, pricing from another segment's quote"
            );
        }
        Some(found)
    }

    /// Latest quote as of now, or `QuoteNotAvailable`.
    pub fn current_quote(&self, currency: &Currency, segment: &SegmentId) -> PricingResult<QuoteMatch> {
        self.latest_quote(currency, segment, self.clock.now())
            .ok_or_else(|| PricingError::QuoteNotAvailable(currency.clone()))
    }

    fn fan_out_segment(
        &self,
        unit: &mut UnitOfWork,
        segment: &SegmentId,
        trigger: QuoteTrigger,
        actor: &Actor,
    ) -> PricingResult<Vec<Quote>> {
        if self.catalog.active_segment(segment).is_none() {
            return Err(PricingError::UnknownSegment(segment.clone()));
        }

        let observations: Vec<RateObservation> = self
            .catalog
            .active_currencies()
            .iter()
            .filter_map(|currency| self.rates.latest(&currency.code))
            .collect();

        let mut priced = Vec::with_capacity(observations.len());
        for observation in &observations {
            let snapshot = self.price_segment(observation, segment)?;
            priced.push((observation, segment.clone(), snapshot));
        }

        let quotes = self.assemble(priced, trigger, actor);
        self.stage_quotes(unit, &quotes, trigger);

        info!(segment = %segment, trigger = %trigger, quotes = quotes.len(), "Segment re-priced");
        Ok(quotes)
    }

    /// Compute the snapshot for one (observation, segment) pair.
    fn price_segment(
        &self,
        observation: &RateObservation,
        segment: &SegmentId,
    ) -> PricingResult<QuoteSnapshot> {
        let partial = |reason: String| PricingError::PartialFanout {
            currency: observation.currency.clone(),
            segment: segment.clone(),
            reason,
        };

        let discount = self
            .catalog
            .discount(segment)
            .map(|d| d.percentage)
            .unwrap_or(Decimal::ZERO);
        if !Discount::is_valid_percentage(discount) {
            return Err(partial(format!("discount {} outside [0, 100]", discount)));
        }

        let snapshot = QuoteSnapshot::compute(observation.pricing_inputs(), discount);
        if snapshot.sell_unit < snapshot.buy_unit {
            return Err(partial(format!(
                "sell {} below buy {}",
                snapshot.sell_unit, snapshot.buy_unit
            )));
        }
        Ok(snapshot)
    }

    fn assemble(
        &self,
        priced: Vec<(&RateObservation, SegmentId, QuoteSnapshot)>,
        trigger: QuoteTrigger,
        actor: &Actor,
    ) -> Vec<Quote> {
        if priced.is_empty() {
            return Vec::new();
        }

        let created_at = self.clock.now();
        let first = self.quotes.reserve_sequences(priced.len());
        priced
            .into_iter()
            .enumerate()
            .map(|(offset, (observation, segment, snapshot))| Quote {
                id: QuoteId::new(),
                currency: observation.currency.clone(),
                segment,
                rate_id: observation.id,
                snapshot,
                trigger,
                generated_by: actor.clone(),
                created_at,
                sequence: first + offset as u64,
            })
            .collect()
    }

    /// Stage the batch and one `QuotesGenerated` event per currency.
    fn stage_quotes(&self, unit: &mut UnitOfWork, quotes: &[Quote], trigger: QuoteTrigger) {
        let mut groups: Vec<(Currency, RateId, Vec<SegmentId>, Vec<QuoteId>)> = Vec::new();
        for quote in quotes {
            match groups.iter_mut().find(|g| g.0 == quote.currency) {
                Some(group) => {
                    group.2.push(quote.segment.clone());
                    group.3.push(quote.id);
                }
                None => groups.push((
                    quote.currency.clone(),
                    quote.rate_id,
                    vec![quote.segment.clone()],
                    vec![quote.id],
                )),
            }
        }

        self.quotes.stage_batch(unit, quotes.to_vec());
        for (currency, rate_id, segments, quote_ids) in groups {
            unit.emit(DeskEvent::QuotesGenerated {
                currency,
                rate_id,
                trigger,
                segments,
                quote_ids,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCacheConfig;
    use crate::catalog::InMemoryCatalog;
    use chrono::{NaiveDate, TimeZone};
    use fxdesk_common::{CurrencyDefinition, ManualClock};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        engine: SegmentPricingEngine,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn fixture(segments: &[(&str, Decimal)]) -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.put_currency(CurrencyDefinition::new(Currency::pen(), "Sol", 2));
        catalog.put_currency(CurrencyDefinition::new(Currency::usd(), "US Dollar", 2));
        catalog.put_currency(CurrencyDefinition::new(Currency::eur(), "Euro", 2));
        for (name, pct) in segments {
            let segment = catalog.add_segment(*name, start());
            catalog.put_discount(
                Discount::new(segment.id, *pct, Actor::user("admin"), start()).unwrap(),
            );
        }

        let clock: SharedClock = Arc::new(ManualClock::new(start()));
        let cached = Arc::new(CachedCatalog::new(
            catalog.clone(),
            TtlCacheConfig::default(),
            clock.clone(),
        ));
        Fixture {
            catalog,
            engine: SegmentPricingEngine::new(cached, clock),
        }
    }

    fn commit_rate(engine: &SegmentPricingEngine, currency: Currency, day: u32) -> RateObservation {
        let mut unit = UnitOfWork::new();
        let rate = NewRate::new(
            currency,
            NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            dec!(3.70),
            dec!(3.80),
        );
        let observation = assert_ok!(engine.record_rate(&mut unit, rate));
        unit.commit();
        observation
    }

    #[test]
    fn test_one_quote_per_active_segment() {
        let f = fixture(&[("retail", dec!(0)), ("vip", dec!(50))]);
        f.catalog.add_segment("dormant", start());
        f.catalog.set_segment_active(&SegmentId::new("dormant"), false);
        let observation = commit_rate(&f.engine, Currency::usd(), 16);

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.generate_quotes(&mut unit, &observation, &Actor::System));
        assert_eq!(quotes.len(), 2);
        assert!(f.engine.quotes().is_empty());

        let events = unit.commit();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DeskEvent::QuotesGenerated { currency, segments, trigger, .. } => {
                assert_eq!(currency, &Currency::usd());
                assert_eq!(segments.len(), 2);
                assert_eq!(*trigger, QuoteTrigger::RateChange);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let vip = f
            .engine
            .quotes()
            .latest(&Currency::usd(), &SegmentId::new("vip"))
            .unwrap();
        assert_eq!(vip.buy_unit(), dec!(3.725));
        assert_eq!(vip.sell_unit(), dec!(3.775));
        assert_eq!(vip.snapshot.discount_percentage, dec!(50));

        let retail = f
            .engine
            .quotes()
            .latest(&Currency::usd(), &SegmentId::new("retail"))
            .unwrap();
        assert_eq!(retail.buy_unit(), dec!(3.70));
        assert_eq!(retail.sell_unit(), dec!(3.80));
    }

    #[test]
    fn test_missing_discount_means_zero() {
        let f = fixture(&[]);
        f.catalog.add_segment("walk-in", start());
        let observation = commit_rate(&f.engine, Currency::usd(), 16);

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.generate_quotes(&mut unit, &observation, &Actor::System));
        assert_eq!(quotes[0].snapshot.discount_percentage, Decimal::ZERO);
    }

    #[test]
    fn test_bad_discount_aborts_whole_fanout() {
        let f = fixture(&[("retail", dec!(0)), ("vip", dec!(10))]);
        f.catalog.put_discount(Discount {
            segment: SegmentId::new("vip"),
            percentage: dec!(120),
            modified_by: Actor::user("admin"),
            modified_at: start(),
        });
        let observation = commit_rate(&f.engine, Currency::usd(), 16);

        let mut unit = UnitOfWork::new();
        let err = assert_err!(f.engine.generate_quotes(&mut unit, &observation, &Actor::System));
        assert!(matches!(err, PricingError::PartialFanout { ref segment, .. } if segment.as_str() == "vip"));
        assert_eq!(unit.staged_writes(), 0);
        assert!(unit.commit().is_empty());
        assert!(f.engine.quotes().is_empty());
    }

    #[test]
    fn test_superseded_observation_yields_nothing() {
        let f = fixture(&[("retail", dec!(0))]);
        let older = commit_rate(&f.engine, Currency::usd(), 15);
        commit_rate(&f.engine, Currency::usd(), 16);

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.generate_quotes(&mut unit, &older, &Actor::System));
        assert!(quotes.is_empty());
        assert!(unit.commit().is_empty());
    }

    #[test]
    fn test_unknown_currency_rejected() {
        let f = fixture(&[]);
        let mut unit = UnitOfWork::new();
        let rate = NewRate::new(
            Currency::new("GBP"),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            dec!(4.5),
            dec!(4.7),
        );
        let err = assert_err!(f.engine.record_rate(&mut unit, rate));
        assert_eq!(err, PricingError::UnknownCurrency(Currency::new("GBP")));
    }

    #[test]
    fn test_backfill_with_rate_history() {
        let f = fixture(&[("retail", dec!(0))]);
        commit_rate(&f.engine, Currency::usd(), 16);
        let corporate = f.catalog.add_segment("corporate", start());

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.backfill_segment(&mut unit, &corporate.id, &Actor::System));
        unit.commit();

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].currency, Currency::usd());
        assert_eq!(quotes[0].trigger, QuoteTrigger::SegmentBackfill);
        assert_eq!(f.engine.quotes().history(&Currency::usd(), &corporate.id).len(), 1);
    }

    #[test]
    fn test_backfill_without_rates_is_empty() {
        let f = fixture(&[]);
        let corporate = f.catalog.add_segment("corporate", start());

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.backfill_segment(&mut unit, &corporate.id, &Actor::System));
        assert!(quotes.is_empty());
        assert!(unit.commit().is_empty());
    }

    #[test]
    fn test_backfill_unknown_segment() {
        let f = fixture(&[]);
        let mut unit = UnitOfWork::new();
        let err = assert_err!(f.engine.backfill_segment(&mut unit, &SegmentId::new("ghost"), &Actor::System));
        assert!(matches!(err, PricingError::UnknownSegment(_)));
    }

    #[test]
    fn test_discount_change_reprices_segment_only() {
        let f = fixture(&[("retail", dec!(0)), ("vip", dec!(10))]);
        let usd = commit_rate(&f.engine, Currency::usd(), 16);
        let eur = commit_rate(&f.engine, Currency::eur(), 16);
        for observation in [&usd, &eur] {
            let mut unit = UnitOfWork::new();
            assert_ok!(f.engine.generate_quotes(&mut unit, observation, &Actor::System));
            unit.commit();
        }

        f.catalog.put_discount(
            Discount::new(SegmentId::new("vip"), dec!(40), Actor::user("admin"), start()).unwrap(),
        );
        f.engine.catalog().invalidate_discount(&SegmentId::new("vip"));

        let mut unit = UnitOfWork::new();
        let quotes = assert_ok!(f.engine.regenerate_for_segment(
            &mut unit,
            &SegmentId::new("vip"),
            &Actor::user("admin")
        ));
        let events = unit.commit();

        assert_eq!(quotes.len(), 2);
        assert_eq!(events.len(), 2);
        assert!(quotes.iter().all(|q| q.snapshot.discount_percentage == dec!(40)));
        assert_eq!(f.engine.quotes().history(&Currency::usd(), &SegmentId::new("retail")).len(), 1);
        assert_eq!(f.engine.quotes().history(&Currency::usd(), &SegmentId::new("vip")).len(), 2);
    }

    #[test]
    fn test_latest_quote_fallback() {
        let f = fixture(&[("retail", dec!(0))]);
        let observation = commit_rate(&f.engine, Currency::usd(), 16);
        let mut unit = UnitOfWork::new();
        assert_ok!(f.engine.generate_quotes(&mut unit, &observation, &Actor::System));
        unit.commit();

        let found = f.engine.current_quote(&Currency::usd(), &SegmentId::new("vip")).unwrap();
        assert!(found.is_fallback());
        assert_eq!(found.quote().segment.as_str(), "retail");

        let missing = f.engine.current_quote(&Currency::eur(), &SegmentId::new("retail"));
        assert_eq!(missing.unwrap_err(), PricingError::QuoteNotAvailable(Currency::eur()));
    }

    fn snapshot(buy_cents: i64, spread_cents: i64, discount_bp: i64) -> QuoteSnapshot {
        let buy = Decimal::new(buy_cents, 2);
        let sell = Decimal::new(buy_cents + spread_cents, 2);
        let observation = RateObservation {
            id: RateId::new(),
            currency: Currency::usd(),
            effective_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            buy_price: buy,
            sell_price: sell,
            created_at: start(),
            sequence: 1,
        };
        QuoteSnapshot::compute(observation.pricing_inputs(), Decimal::new(discount_bp, 2))
    }

    proptest! {
        #[test]
        fn prop_sell_never_below_buy(
            buy in 1i64..1_000_000,
            spread in 0i64..50_000,
            discount in 0i64..=10_000,
        ) {
            let s = snapshot(buy, spread, discount);
            prop_assert!(s.sell_unit >= s.buy_unit);
        }

        #[test]
        fn prop_larger_discount_never_widens_spread(
            buy in 1i64..1_000_000,
            spread in 0i64..50_000,
            low in 0i64..=10_000,
            extra in 0i64..=10_000,
        ) {
            let high = (low + extra).min(10_000);
            let base = snapshot(buy, spread, 0);
            let lower = snapshot(buy, spread, low);
            let higher = snapshot(buy, spread, high);
            prop_assert!(higher.spread() <= lower.spread());
            prop_assert!(lower.spread() <= base.spread());
            if spread > 0 && high > low {
                prop_assert!(higher.spread() < lower.spread());
            }
        }
    }
}
