//! Cancels pending trades whose quote has been superseded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fxdesk_common::{
    Actor, CancellationNotice, Currency, DeskError, DeskEvent, QuoteTrigger, SharedClock,
    Transaction, TransactionId, TransactionState,
};
use fxdesk_ledger::TransactionLedger;
use fxdesk_pricing::SegmentPricingEngine;
use tracing::{debug, info, instrument, warn};

use crate::metrics::SharedMetrics;
use crate::notifier::Notifier;

/// A transaction the sweep could not cancel.
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub transaction_id: TransactionId,
    pub error: DeskError,
}

/// Outcome of one invalidation sweep over a currency.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub currency: Currency,
    pub trigger: QuoteTrigger,
    /// Pending transactions looked at.
    pub examined: usize,
    pub cancelled: Vec<TransactionId>,
    /// Still current, or already out of `pending` by the time we got there.
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(currency: Currency, trigger: QuoteTrigger) -> Self {
        Self {
            currency,
            trigger,
            examined: 0,
            cancelled: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reacts to committed quote fan-outs by cancelling every pending trade on
/// the currency that would now be priced differently.
pub struct InvalidationDispatcher {
    ledger: Arc<TransactionLedger>,
    engine: Arc<SegmentPricingEngine>,
    notifier: Arc<dyn Notifier>,
    metrics: SharedMetrics,
    clock: SharedClock,
}

impl InvalidationDispatcher {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        engine: Arc<SegmentPricingEngine>,
        notifier: Arc<dyn Notifier>,
        metrics: SharedMetrics,
        clock: SharedClock,
    ) -> Self {
        Self {
            ledger,
            engine,
            notifier,
            metrics,
            clock,
        }
    }

    /// Handle one committed event. Only quote fan-outs start a sweep.
    pub fn dispatch(&self, event: &DeskEvent) -> Option<SweepReport> {
        match event {
            DeskEvent::QuotesGenerated {
                currency, trigger, ..
            } => Some(self.sweep(currency, *trigger)),
            DeskEvent::RateRecorded(_) => None,
        }
    }

    /// Check whether a pending trade on `currency` was priced from anything
    /// other than what the desk would use now: the latest rate observation,
    /// and the quote a lookup for its segment returns.
    pub fn is_stale(&self, transaction: &Transaction, currency: &Currency, now: DateTime<Utc>) -> bool {
        let rate_superseded = self
            .engine
            .rates()
            .latest(currency)
            .is_some_and(|latest| latest.id != transaction.rate_id);
        if rate_superseded {
            return true;
        }

        self.engine
            .quotes()
            .lookup(currency, &transaction.segment, now)
            .is_some_and(|current| current.quote().id != transaction.quote_id)
    }

    /// Cancel every stale pending transaction on `currency`.
    ///
    /// Runs to completion: a transaction that cannot be cancelled is recorded
    /// in the report and the sweep moves on. Must be called from within a
    /// Tokio runtime for notices to be delivered.
    #[instrument(skip(self), fields(currency = %currency, trigger = %trigger))]
    pub fn sweep(&self, currency: &Currency, trigger: QuoteTrigger) -> SweepReport {
        let now = self.clock.now();
        let reason = format!("rate for {} superseded", currency);
        let mut report = SweepReport::new(currency.clone(), trigger);

        for transaction in self.ledger.pending_for_currency(currency) {
            report.examined += 1;
            if !self.is_stale(&transaction, currency, now) {
                report.skipped += 1;
                continue;
            }

            match self.ledger.transition(
                transaction.id,
                TransactionState::Cancelled,
                reason.clone(),
                &Actor::System,
            ) {
                Ok(cancelled) => {
                    self.metrics.stale_cancelled();
                    report.cancelled.push(cancelled.id);
                    self.send_notice(CancellationNotice {
                        transaction_id: cancelled.id,
                        client: cancelled.client,
                        currency: currency.clone(),
                        reason: reason.clone(),
                        cancelled_at: cancelled.updated_at,
                    });
                }
                // Settled or cancelled by someone else since we listed it.
                Err(DeskError::IllegalTransition { from, .. }) if from != TransactionState::Pending => {
                    debug!(transaction_id = %transaction.id, state = %from, "No longer pending, skipped");
                    report.skipped += 1;
                }
                Err(error) => {
                    warn!(transaction_id = %transaction.id, error = %error, "Stale cancellation failed");
                    self.metrics.sweep_failed();
                    report.failures.push(SweepFailure {
                        transaction_id: transaction.id,
                        error,
                    });
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                cancelled = report.cancelled.len(),
                skipped = report.skipped,
                failed = report.failures.len(),
                "Invalidation sweep finished"
            );
        }
        report
    }

    fn send_notice(&self, notice: CancellationNotice) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(transaction_id = %notice.transaction_id, "No runtime, cancellation notice dropped");
                self.metrics.notification_failed();
                return;
            }
        };

        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();
        handle.spawn(async move {
            let transaction_id = notice.transaction_id;
            match notifier.notify(notice).await {
                Ok(()) => metrics.notification_sent(),
                Err(e) => {
                    warn!(
                        transaction_id = %transaction_id,
                        notifier = notifier.name(),
                        error = %e,
                        "Cancellation notice not delivered"
                    );
                    metrics.notification_failed();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DeskMetrics;
    use crate::notifier::ChannelNotifier;
    use chrono::{NaiveDate, TimeZone};
    use fxdesk_common::{
        ClientId, CurrencyDefinition, ManualClock, Money, QuoteMatch, SegmentId, TradeDirection,
        UnitOfWork,
    };
    use fxdesk_ledger::TransactionDraft;
    use fxdesk_pricing::{CachedCatalog, InMemoryCatalog, NewRate, TtlCacheConfig};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct Fixture {
        ledger: Arc<TransactionLedger>,
        engine: Arc<SegmentPricingEngine>,
        dispatcher: InvalidationDispatcher,
        metrics: SharedMetrics,
        notices: mpsc::Receiver<CancellationNotice>,
    }

    fn fixture() -> Fixture {
        let clock: SharedClock =
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()));
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.put_currency(CurrencyDefinition::new(Currency::pen(), "Sol", 2));
        catalog.put_currency(CurrencyDefinition::new(Currency::usd(), "US Dollar", 2));
        catalog.put_currency(CurrencyDefinition::new(Currency::eur(), "Euro", 2));
        catalog.add_segment("retail", clock.now());

        let cached = Arc::new(CachedCatalog::new(catalog, TtlCacheConfig::default(), clock.clone()));
        let engine = Arc::new(SegmentPricingEngine::new(cached, clock.clone()));
        let ledger = Arc::new(TransactionLedger::with_clock(clock.clone()));
        let metrics: SharedMetrics = Arc::new(DeskMetrics::new());
        let (notifier, notices) = ChannelNotifier::new(16);
        let dispatcher = InvalidationDispatcher::new(
            ledger.clone(),
            engine.clone(),
            Arc::new(notifier),
            metrics.clone(),
            clock,
        );

        Fixture {
            ledger,
            engine,
            dispatcher,
            metrics,
            notices,
        }
    }

    /// Record a rate and fan it out, returning the committed events.
    fn publish(engine: &SegmentPricingEngine, currency: Currency, day: u32) -> Vec<DeskEvent> {
        let date = NaiveDate::from_ymd_opt(2026, 10, day).unwrap();
        let mut unit = UnitOfWork::new();
        let observation = engine
            .record_rate(&mut unit, NewRate::new(currency, date, dec!(3.70), dec!(3.80)))
            .unwrap();
        unit.commit();

        let mut unit = UnitOfWork::new();
        engine.generate_quotes(&mut unit, &observation, &Actor::System).unwrap();
        unit.commit()
    }

    fn book(f: &Fixture, client: &str, currency: Currency) -> Transaction {
        let quote = f
            .engine
            .quotes()
            .latest(&currency, &SegmentId::new("retail"))
            .unwrap();
        f.ledger.create(
            TransactionDraft {
                client: ClientId::new(client),
                segment: quote.segment.clone(),
                direction: TradeDirection::Sell,
                origin: Money::new(dec!(100), currency),
                destination: Money::new(dec!(370), Currency::pen()),
                applied_rate: quote.buy_unit(),
                quote_id: quote.id,
                rate_id: quote.rate_id,
                pricing_fallback: false,
            },
            &Actor::user("teller"),
        )
    }

    #[tokio::test]
    async fn test_rate_change_cancels_every_pending_trade() {
        let mut f = fixture();
        publish(&f.engine, Currency::usd(), 15);
        let booked: Vec<_> = (0..3).map(|i| book(&f, &format!("c-{i}"), Currency::usd())).collect();

        let events = publish(&f.engine, Currency::usd(), 16);
        let reports: Vec<_> = events.iter().filter_map(|e| f.dispatcher.dispatch(e)).collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].cancelled.len(), 3);
        assert!(reports[0].is_clean());

        for txn in &booked {
            assert_eq!(f.ledger.get(txn.id).unwrap().state, TransactionState::Cancelled);
            let history = f.ledger.history(txn.id).unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[1].reason.as_deref(), Some("rate for USD superseded"));
            assert!(history[1].is_automatic());
        }

        for _ in 0..3 {
            let notice = f.notices.recv().await.unwrap();
            assert_eq!(notice.currency, Currency::usd());
        }
        assert_eq!(f.metrics.snapshot().stale_cancellations, 3);
    }

    #[tokio::test]
    async fn test_replayed_event_is_noop() {
        let f = fixture();
        publish(&f.engine, Currency::usd(), 15);
        let txn = book(&f, "c-1", Currency::usd());

        let events = publish(&f.engine, Currency::usd(), 16);
        for event in events.iter().chain(events.iter()) {
            if let Some(report) = f.dispatcher.dispatch(event) {
                assert!(report.is_clean());
            }
        }

        assert_eq!(f.ledger.history(txn.id).unwrap().len(), 2);
        assert_eq!(f.metrics.snapshot().stale_cancellations, 1);
    }

    #[tokio::test]
    async fn test_other_currency_untouched() {
        let f = fixture();
        publish(&f.engine, Currency::usd(), 15);
        publish(&f.engine, Currency::eur(), 15);
        let eur = book(&f, "c-1", Currency::eur());

        let events = publish(&f.engine, Currency::usd(), 16);
        for event in &events {
            f.dispatcher.dispatch(event);
        }
        assert!(f.ledger.get(eur.id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_current_trade_is_skipped() {
        let f = fixture();
        publish(&f.engine, Currency::usd(), 16);
        let txn = book(&f, "c-1", Currency::usd());

        let report = f.dispatcher.sweep(&Currency::usd(), QuoteTrigger::RateChange);
        assert_eq!(report.examined, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.cancelled.is_empty());
        assert!(f.ledger.get(txn.id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_is_stale_tracks_quote_and_rate() {
        let f = fixture();
        publish(&f.engine, Currency::usd(), 15);
        let txn = book(&f, "c-1", Currency::usd());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        assert!(!f.dispatcher.is_stale(&txn, &Currency::usd(), now));

        // a committed rate without its fan-out is already enough
        let mut unit = UnitOfWork::new();
        f.engine
            .record_rate(
                &mut unit,
                NewRate::new(
                    Currency::usd(),
                    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
                    dec!(3.71),
                    dec!(3.81),
                ),
            )
            .unwrap();
        unit.commit();
        assert!(f.dispatcher.is_stale(&txn, &Currency::usd(), now));
        assert!(matches!(
            f.engine.quotes().lookup(&Currency::usd(), &txn.segment, now),
            Some(QuoteMatch::Exact(_))
        ));
    }
}
