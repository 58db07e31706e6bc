//! Daily and monthly volume ceilings.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use fxdesk_common::{
    Actor, ClientId, DeskError, Limit, LimitDecision, LimitPeriod, PeriodKey, Result,
    SharedClock, TransactionId,
};
use fxdesk_ledger::{TransactionLedger, VolumeQuery};
use fxdesk_pricing::{TtlCache, TtlCacheConfig};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

/// Configured limits, one per period key.
#[derive(Default)]
pub struct LimitBook {
    limits: DashMap<PeriodKey, Limit>,
}

impl LimitBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a limit, replacing the one for the same period.
    pub fn upsert(&self, limit: Limit) -> Option<Limit> {
        self.limits.insert(limit.key, limit)
    }

    pub fn get(&self, key: &PeriodKey) -> Option<Limit> {
        self.limits.get(key).map(|l| l.clone())
    }

    /// All limits, earliest period first.
    pub fn all(&self) -> Vec<Limit> {
        let mut limits: Vec<Limit> = self.limits.iter().map(|l| l.clone()).collect();
        limits.sort_by_key(|l| (l.key.start, l.key.period == LimitPeriod::Monthly));
        limits
    }
}

/// A limit to configure.
#[derive(Debug, Clone)]
pub struct LimitRequest {
    pub period: LimitPeriod,
    /// Any date inside the target day or month.
    pub date: NaiveDate,
    pub amount: Decimal,
    /// Defaults to now.
    pub effective_from: Option<DateTime<Utc>>,
}

impl LimitRequest {
    pub fn daily(date: NaiveDate, amount: Decimal) -> Self {
        Self {
            period: LimitPeriod::Daily,
            date,
            amount,
            effective_from: None,
        }
    }

    pub fn monthly(date: NaiveDate, amount: Decimal) -> Self {
        Self {
            period: LimitPeriod::Monthly,
            date,
            amount,
            effective_from: None,
        }
    }

    pub fn effective_from(mut self, at: DateTime<Utc>) -> Self {
        self.effective_from = Some(at);
        self
    }

    fn key(&self) -> PeriodKey {
        match self.period {
            LimitPeriod::Daily => PeriodKey::day(self.date),
            LimitPeriod::Monthly => PeriodKey::month(self.date),
        }
    }
}

/// Decides whether a client's candidate volume fits under the ceilings in
/// force now.
pub struct LimitEnforcer {
    book: LimitBook,
    cache: TtlCache<PeriodKey, Option<Limit>>,
    ledger: Arc<TransactionLedger>,
    clock: SharedClock,
}

impl LimitEnforcer {
    pub fn new(ledger: Arc<TransactionLedger>, clock: SharedClock, cache_ttl: Duration) -> Self {
        let config = TtlCacheConfig {
            default_ttl: cache_ttl,
            ..Default::default()
        };
        Self {
            book: LimitBook::new(),
            cache: TtlCache::with_clock(config, clock.clone()),
            ledger,
            clock,
        }
    }

    /// Configure a limit, replacing any limit for the same period.
    #[instrument(skip(self, actor), fields(actor = %actor))]
    pub fn configure(&self, request: LimitRequest, actor: &Actor) -> Result<Limit> {
        let now = self.clock.now();
        let key = request.key();
        let effective_from = request.effective_from.unwrap_or(now);
        let (_, period_end) = key.bounds();

        if request.amount < Decimal::ZERO {
            return Err(DeskError::validation("limit amount cannot be negative", "amount"));
        }
        if effective_from < now {
            return Err(DeskError::validation(
                "effective_from cannot be in the past",
                "effective_from",
            ));
        }
        if period_end <= now {
            return Err(DeskError::validation(
                format!("period {} is already over", key),
                "date",
            ));
        }
        if effective_from >= period_end {
            return Err(DeskError::validation(
                format!("effective_from is after period {} ends", key),
                "effective_from",
            ));
        }

        let limit = Limit {
            key,
            amount: request.amount,
            effective_from,
            configured_by: actor.clone(),
            configured_at: now,
        };
        let previous = self.book.upsert(limit.clone());
        self.cache.invalidate(&key);

        info!(
            period = %key,
            amount = %limit.amount,
            effective_from = %limit.effective_from,
            replaced = previous.is_some(),
            "Limit configured"
        );
        Ok(limit)
    }

    /// The limit of `period` in force at `at`, if any.
    pub fn resolve(&self, period: LimitPeriod, at: DateTime<Utc>) -> Option<Limit> {
        let key = PeriodKey::containing(period, at);
        self.cache
            .get_or_insert_with(&key, || self.book.get(&key))
            .filter(|limit| limit.is_effective_at(at))
    }

    /// Check a candidate amount against the daily then the monthly ceiling.
    ///
    /// Volume counts the client's live transactions created since each
    /// limit's window start, leaving out `exclude`.
    pub fn check(
        &self,
        client: &ClientId,
        candidate: Decimal,
        exclude: Option<TransactionId>,
    ) -> Result<LimitDecision> {
        if candidate <= Decimal::ZERO {
            return Err(DeskError::validation("amount must be positive", "amount"));
        }

        let now = self.clock.now();
        for period in [LimitPeriod::Daily, LimitPeriod::Monthly] {
            let Some(limit) = self.resolve(period, now) else {
                continue;
            };

            let query = VolumeQuery::new(client.clone(), limit.window_start(), now).excluding(exclude);
            let aggregate = self.ledger.client_volume(&query).total;
            debug!(
                client = %client,
                period = %period,
                ceiling = %limit.amount,
                aggregate = %aggregate,
                candidate = %candidate,
                "Evaluating limit"
            );

            if aggregate + candidate > limit.amount {
                return Ok(LimitDecision::Rejected {
                    period,
                    ceiling: limit.amount,
                    aggregate,
                    requested: candidate,
                });
            }
        }

        Ok(LimitDecision::Approved)
    }

    pub fn limits(&self) -> Vec<Limit> {
        self.book.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fxdesk_common::{
        Currency, ManualClock, Money, QuoteId, RateId, SegmentId, TradeDirection,
        TransactionState,
    };
    use fxdesk_ledger::TransactionDraft;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        clock: ManualClock,
        ledger: Arc<TransactionLedger>,
        enforcer: LimitEnforcer,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        start().date_naive()
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(start());
        let shared: SharedClock = Arc::new(clock.clone());
        let ledger = Arc::new(TransactionLedger::with_clock(shared.clone()));
        let enforcer = LimitEnforcer::new(ledger.clone(), shared, Duration::seconds(1));
        Fixture {
            clock,
            ledger,
            enforcer,
        }
    }

    fn book(ledger: &TransactionLedger, client: &str, amount: Decimal) -> TransactionId {
        ledger
            .create(
                TransactionDraft {
                    client: ClientId::new(client),
                    segment: SegmentId::new("retail"),
                    direction: TradeDirection::Sell,
                    origin: Money::new(amount, Currency::usd()),
                    destination: Money::new(amount, Currency::pen()),
                    applied_rate: Decimal::ONE,
                    quote_id: QuoteId::new(),
                    rate_id: RateId::new(),
                    pricing_fallback: false,
                },
                &Actor::System,
            )
            .id
    }

    fn admin() -> Actor {
        Actor::user("admin")
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(50000.00)), &admin()));
        book(&f.ledger, "c-1", dec!(49900.00));
        let client = ClientId::new("c-1");

        assert!(assert_ok!(f.enforcer.check(&client, dec!(100.00), None)).is_approved());

        let decision = assert_ok!(f.enforcer.check(&client, dec!(100.01), None));
        assert_eq!(
            decision,
            LimitDecision::Rejected {
                period: LimitPeriod::Daily,
                ceiling: dec!(50000.00),
                aggregate: dec!(49900.00),
                requested: dec!(100.01),
            }
        );
        assert_eq!(
            decision.reason(),
            "daily limit 50000.00 exceeded: volume 49900.00 + requested 100.01"
        );
    }

    #[test]
    fn test_zero_limit_freezes() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(0.00)), &admin()));

        let decision = assert_ok!(f.enforcer.check(&ClientId::new("c-1"), dec!(0.01), None));
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_no_limit_no_ceiling() {
        let f = fixture();
        book(&f.ledger, "c-1", dec!(1000000));
        assert!(assert_ok!(f.enforcer.check(&ClientId::new("c-1"), dec!(1000000), None)).is_approved());
    }

    #[test]
    fn test_daily_checked_before_monthly() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(100)), &admin()));
        assert_ok!(f.enforcer.configure(LimitRequest::monthly(today(), dec!(50)), &admin()));

        match assert_ok!(f.enforcer.check(&ClientId::new("c-1"), dec!(200), None)) {
            LimitDecision::Rejected { period, .. } => assert_eq!(period, LimitPeriod::Daily),
            other => panic!("unexpected decision {other:?}"),
        }
        match assert_ok!(f.enforcer.check(&ClientId::new("c-1"), dec!(80), None)) {
            LimitDecision::Rejected { period, .. } => assert_eq!(period, LimitPeriod::Monthly),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_exclusion_revalidates_edit() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(5000)), &admin()));
        let id = book(&f.ledger, "c-1", dec!(5000));
        let client = ClientId::new("c-1");

        assert!(!assert_ok!(f.enforcer.check(&client, dec!(5000), None)).is_approved());
        assert!(assert_ok!(f.enforcer.check(&client, dec!(5000), Some(id))).is_approved());
    }

    #[test]
    fn test_cancelled_volume_released() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(1000)), &admin()));
        let id = book(&f.ledger, "c-1", dec!(1000));
        let client = ClientId::new("c-1");
        assert!(!assert_ok!(f.enforcer.check(&client, dec!(1), None)).is_approved());

        f.ledger
            .transition(id, TransactionState::Cancelled, "client request", &admin())
            .unwrap();
        assert!(assert_ok!(f.enforcer.check(&client, dec!(1000), None)).is_approved());
    }

    #[test]
    fn test_future_limit_inert_until_effective() {
        let f = fixture();
        book(&f.ledger, "c-1", dec!(500));
        let effective = start() + Duration::hours(2);
        assert_ok!(f
            .enforcer
            .configure(LimitRequest::daily(today(), dec!(100)).effective_from(effective), &admin()));
        let client = ClientId::new("c-1");

        assert!(assert_ok!(f.enforcer.check(&client, dec!(1000), None)).is_approved());

        f.clock.set(effective);
        // volume booked before the limit took effect does not count
        assert!(assert_ok!(f.enforcer.check(&client, dec!(100), None)).is_approved());
        assert!(!assert_ok!(f.enforcer.check(&client, dec!(100.01), None)).is_approved());
    }

    #[test]
    fn test_intraday_raise_replaces_limit() {
        let f = fixture();
        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(100)), &admin()));
        let client = ClientId::new("c-1");
        assert!(!assert_ok!(f.enforcer.check(&client, dec!(150), None)).is_approved());

        assert_ok!(f.enforcer.configure(LimitRequest::daily(today(), dec!(200)), &admin()));
        assert!(assert_ok!(f.enforcer.check(&client, dec!(150), None)).is_approved());
        assert_eq!(f.enforcer.limits().len(), 1);
    }

    #[test]
    fn test_configure_rejections() {
        let f = fixture();
        let err = assert_err!(f.enforcer.configure(LimitRequest::daily(today(), dec!(-1)), &admin()));
        assert_eq!(err.error_code(), "VALIDATION_FAILED");

        assert_err!(f.enforcer.configure(
            LimitRequest::daily(today(), dec!(100)).effective_from(start() - Duration::minutes(1)),
            &admin()
        ));

        let yesterday = today().pred_opt().unwrap();
        assert_err!(f.enforcer.configure(LimitRequest::daily(yesterday, dec!(100)), &admin()));

        let tomorrow = start() + Duration::days(1);
        assert_err!(f.enforcer.configure(
            LimitRequest::daily(today(), dec!(100)).effective_from(tomorrow),
            &admin()
        ));
    }

    #[test]
    fn test_non_positive_candidate_rejected() {
        let f = fixture();
        assert_err!(f.enforcer.check(&ClientId::new("c-1"), Decimal::ZERO, None));
    }
}
