//! The exchange desk service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use fxdesk_common::{
    Actor, ClientId, Currency, CurrencyDefinition, DeskError, DeskEvent, Limit, LimitDecision,
    Money, Quote, QuoteMatch, QuoteTrigger, RateObservation, Result, SegmentId, SharedClock,
    SystemClock, TradeDirection, Transaction, TransactionId, TransactionState, UnitOfWork,
};
use fxdesk_ledger::{HistoryEntry, TransactionDraft, TransactionLedger};
use fxdesk_pricing::{
    CachedCatalog, Catalog, NewRate, PricingError, PricingResult, SegmentPricingEngine,
    TtlCacheConfig,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::config::DeskConfig;
use crate::dispatcher::{InvalidationDispatcher, SweepReport};
use crate::keyed_locks::KeyedLocks;
use crate::limits::{LimitEnforcer, LimitRequest};
use crate::metrics::{DeskMetrics, SharedMetrics};
use crate::notifier::Notifier;
use crate::state::DeskState;

/// A trade submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub client: ClientId,
    pub segment: SegmentId,
    pub origin_currency: Currency,
    pub destination_currency: Currency,
    /// Amount in the origin currency.
    pub amount: Decimal,
    pub direction: TradeDirection,
    /// Overrides the configured submission timeout.
    pub timeout: Option<Duration>,
    pub submitted_by: Actor,
}

impl SubmitRequest {
    pub fn new(
        client: impl Into<ClientId>,
        segment: impl Into<SegmentId>,
        origin_currency: Currency,
        destination_currency: Currency,
        amount: Decimal,
        direction: TradeDirection,
    ) -> Self {
        let client = client.into();
        Self {
            submitted_by: Actor::user(client.as_str()),
            client,
            segment: segment.into(),
            origin_currency,
            destination_currency,
            amount,
            direction,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.submitted_by = actor;
        self
    }
}

/// Result of recording a rate.
#[derive(Debug, Clone)]
pub struct RateUpdate {
    pub observation: RateObservation,
    /// Empty when the observation is not the latest for its currency.
    pub quotes: Vec<Quote>,
    pub sweeps: Vec<SweepReport>,
}

impl RateUpdate {
    /// Transactions cancelled as a consequence.
    pub fn cancelled(&self) -> usize {
        self.sweeps.iter().map(|s| s.cancelled.len()).sum()
    }
}

/// Result of re-pricing after a catalog change.
#[derive(Debug, Clone)]
pub struct Repricing {
    pub quotes: Vec<Quote>,
    pub sweeps: Vec<SweepReport>,
}

impl Repricing {
    pub fn cancelled(&self) -> usize {
        self.sweeps.iter().map(|s| s.cancelled.len()).sum()
    }
}

/// What validation of a submission settled on.
struct Pricing {
    foreign: Currency,
    destination: CurrencyDefinition,
}

/// Orchestrates rate fan-out, trade submission, limits and stale-rate
/// invalidation over one in-process book.
pub struct ExchangeDesk {
    config: DeskConfig,
    state: RwLock<DeskState>,
    clock: SharedClock,
    catalog: Arc<CachedCatalog>,
    engine: Arc<SegmentPricingEngine>,
    ledger: Arc<TransactionLedger>,
    limits: LimitEnforcer,
    dispatcher: InvalidationDispatcher,
    client_locks: KeyedLocks<ClientId>,
    currency_locks: KeyedLocks<Currency>,
    metrics: SharedMetrics,
}

impl ExchangeDesk {
    /// Create a desk on the wall clock.
    pub fn new(config: DeskConfig, catalog: Arc<dyn Catalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(config, catalog, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: DeskConfig,
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
    ) -> Self {
        let catalog_ttl = chrono::Duration::from_std(config.catalog_cache_ttl)
            .unwrap_or_else(|_| fxdesk_common::constants::catalog_cache_ttl());
        let limit_ttl = chrono::Duration::from_std(config.limit_cache_ttl)
            .unwrap_or_else(|_| fxdesk_common::constants::limit_cache_ttl());

        let catalog = Arc::new(CachedCatalog::new(
            catalog,
            TtlCacheConfig {
                default_ttl: catalog_ttl,
                ..Default::default()
            },
            clock.clone(),
        ));
        let engine = Arc::new(SegmentPricingEngine::new(catalog.clone(), clock.clone()));
        let ledger = Arc::new(TransactionLedger::with_clock(clock.clone()));
        let metrics: SharedMetrics = Arc::new(DeskMetrics::new());
        let limits = LimitEnforcer::new(ledger.clone(), clock.clone(), limit_ttl);
        let dispatcher = InvalidationDispatcher::new(
            ledger.clone(),
            engine.clone(),
            notifier,
            metrics.clone(),
            clock.clone(),
        );

        Self {
            config,
            state: RwLock::new(DeskState::Starting),
            clock,
            catalog,
            engine,
            ledger,
            limits,
            dispatcher,
            client_locks: KeyedLocks::new("client"),
            currency_locks: KeyedLocks::new("currency"),
            metrics,
        }
    }

    /// Start accepting requests.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| DeskError::validation(e, "config"))?;

        info!(base_currency = %self.config.base_currency, "Starting exchange desk");
        *self.state.write() = DeskState::Running;
        Ok(())
    }

    /// Stop accepting requests and wait for in-flight fan-outs.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping exchange desk");
        *self.state.write() = DeskState::ShuttingDown;

        let in_flight = self.currency_locks.lock_all(&self.currency_locks.keys()).await;
        drop(in_flight);

        *self.state.write() = DeskState::Stopped;
        info!("Exchange desk stopped");
        Ok(())
    }

    pub fn state(&self) -> DeskState {
        *self.state.read()
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(DeskError::Unavailable(format!("desk is {}", state)))
        }
    }

    /// Record a market rate for a foreign currency and re-price every
    /// segment from it. Pending trades on the currency whose quote moved are
    /// cancelled once the new quotes are visible.
    #[instrument(skip(self, buy_price, sell_price, actor), fields(actor = %actor))]
    pub async fn record_rate(
        &self,
        currency: Currency,
        buy_price: Decimal,
        sell_price: Decimal,
        effective_date: NaiveDate,
        actor: &Actor,
    ) -> Result<RateUpdate> {
        self.ensure_running()?;
        if currency == self.config.base_currency {
            return Err(DeskError::validation(
                "rates are quoted in the base currency",
                "currency",
            ));
        }

        let guard = self.currency_locks.lock(&currency).await;

        let mut unit = UnitOfWork::new();
        let observation = self.engine.record_rate(
            &mut unit,
            NewRate::new(currency.clone(), effective_date, buy_price, sell_price),
        )?;
        let mut events = unit.commit();
        self.metrics.rate_recorded();

        let (quotes, fanned_out) = self
            .fan_out(|unit| self.engine.generate_quotes(unit, &observation, actor))?;
        events.extend(fanned_out);
        drop(guard);

        let mut sweeps = self.dispatch(&events);
        // No active segment means no quote event, but the old rate is still gone.
        if sweeps.is_empty() && self.engine.rates().is_latest(&observation) {
            sweeps.push(self.dispatcher.sweep(&currency, QuoteTrigger::RateChange));
        }

        Ok(RateUpdate {
            observation,
            quotes,
            sweeps,
        })
    }

    /// Re-run the fan-out for a currency's latest rate, after a failed one.
    #[instrument(skip(self, actor))]
    pub async fn regenerate_quotes(&self, currency: &Currency, actor: &Actor) -> Result<Repricing> {
        self.ensure_running()?;
        let guard = self.currency_locks.lock(currency).await;

        let observation = self
            .engine
            .rates()
            .latest(currency)
            .ok_or_else(|| PricingError::RateNotAvailable(currency.clone()))?;
        let (quotes, events) =
            self.fan_out(|unit| self.engine.generate_quotes(unit, &observation, actor))?;
        drop(guard);

        Ok(Repricing {
            quotes,
            sweeps: self.dispatch(&events),
        })
    }

    /// Price a segment that was just created in the catalog.
    #[instrument(skip(self, actor))]
    pub async fn segment_created(&self, segment: &SegmentId, actor: &Actor) -> Result<Repricing> {
        self.ensure_running()?;
        self.catalog.invalidate_discount(segment);
        self.reprice_segment(segment, |unit| {
            self.engine.backfill_segment(unit, segment, actor)
        })
        .await
    }

    /// Re-price a segment whose discount was created or changed.
    #[instrument(skip(self, actor))]
    pub async fn discount_changed(&self, segment: &SegmentId, actor: &Actor) -> Result<Repricing> {
        self.ensure_running()?;
        self.catalog.invalidate_discount(segment);
        self.reprice_segment(segment, |unit| {
            self.engine.regenerate_for_segment(unit, segment, actor)
        })
        .await
    }

    async fn reprice_segment(
        &self,
        segment: &SegmentId,
        attempt: impl FnMut(&mut UnitOfWork) -> PricingResult<Vec<Quote>>,
    ) -> Result<Repricing> {
        let currencies: Vec<Currency> = self
            .catalog
            .active_currencies()
            .into_iter()
            .map(|c| c.code)
            .collect();
        let guards = self.currency_locks.lock_all(&currencies).await;
        let (quotes, events) = self.fan_out(attempt)?;
        drop(guards);

        info!(segment = %segment, quotes = quotes.len(), "Segment re-priced");
        Ok(Repricing {
            quotes,
            sweeps: self.dispatch(&events),
        })
    }

    /// Run a fan-out, retrying a partial one with fresh discounts.
    fn fan_out(
        &self,
        mut attempt: impl FnMut(&mut UnitOfWork) -> PricingResult<Vec<Quote>>,
    ) -> Result<(Vec<Quote>, Vec<DeskEvent>)> {
        let max_attempts = self.config.fanout_max_attempts.max(1);
        let mut last_error = None;

        for n in 1..=max_attempts {
            if n > 1 {
                self.catalog.invalidate_discounts();
            }

            let mut unit = UnitOfWork::new();
            match attempt(&mut unit) {
                Ok(quotes) => {
                    let events = unit.commit();
                    self.metrics.quotes_generated(quotes.len());
                    return Ok((quotes, events));
                }
                Err(err @ PricingError::PartialFanout { .. }) => {
                    warn!(attempt = n, max_attempts, error = %err, "Quote fan-out failed");
                    self.metrics.fanout_failed();
                    last_error = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_error
            .map(DeskError::from)
            .unwrap_or_else(|| DeskError::Internal("fan-out never attempted".into())))
    }

    fn dispatch(&self, events: &[DeskEvent]) -> Vec<SweepReport> {
        events
            .iter()
            .filter_map(|event| self.dispatcher.dispatch(event))
            .collect()
    }

    /// Latest quote for the pair, with the cross-segment fallback.
    pub fn get_latest_quote(&self, currency: &Currency, segment: &SegmentId) -> Option<QuoteMatch> {
        let found = self.engine.latest_quote(currency, segment, self.clock.now());
        if found.as_ref().is_some_and(QuoteMatch::is_fallback) {
            self.metrics.fallback_quote();
        }
        found
    }

    /// Submit a trade: price it from the current quote, check the client's
    /// limits and book it as pending.
    ///
    /// Limit evaluation and creation are serialized per client. The foreign
    /// currency is locked too, so a trade is booked either before a rate
    /// fan-out commits (and the sweep that follows sees it) or after it
    /// (and is priced from the new quotes). Locks are taken client first;
    /// nothing holding a currency lock ever waits on a client.
    ///
    /// Only the lock wait is bounded by the timeout. Once both locks are
    /// held the rest runs without yielding, so a timeout never leaves a
    /// transaction behind.
    #[instrument(
        skip(self, request),
        fields(client = %request.client, segment = %request.segment, direction = %request.direction)
    )]
    pub async fn submit_transaction(&self, request: SubmitRequest) -> Result<Transaction> {
        self.ensure_running()?;
        self.metrics.submission_received();

        let pricing = self.validate_submission(&request)?;
        let timeout = request.timeout.unwrap_or(self.config.submission_timeout);

        let acquire = async {
            let client = self.client_locks.lock(&request.client).await;
            let currency = self.currency_locks.lock(&pricing.foreign).await;
            (client, currency)
        };

        let result = match tokio::time::timeout(timeout, acquire).await {
            Ok(guards) => {
                let result = self.price_and_book(&request, &pricing);
                drop(guards);
                result
            }
            Err(_) => {
                self.metrics.submission_timed_out();
                warn!(timeout_ms = timeout.as_millis() as u64, "Submission timed out waiting for locks");
                Err(DeskError::Timeout(format!(
                    "client {} busy for {}ms",
                    request.client,
                    timeout.as_millis()
                )))
            }
        };
        self.client_locks.release(&request.client);
        result
    }

    fn validate_submission(&self, request: &SubmitRequest) -> Result<Pricing> {
        if request.amount <= Decimal::ZERO {
            return Err(DeskError::validation("amount must be positive", "amount"));
        }
        if !request.client.is_valid() {
            return Err(DeskError::validation("client is required", "client"));
        }
        if request.origin_currency == request.destination_currency {
            return Err(DeskError::validation(
                "origin and destination currency are the same",
                "destination_currency",
            ));
        }

        let origin = self
            .catalog
            .active_currency(&request.origin_currency)
            .ok_or_else(|| DeskError::UnknownCurrency(request.origin_currency.clone()))?;
        let destination = self
            .catalog
            .active_currency(&request.destination_currency)
            .ok_or_else(|| DeskError::UnknownCurrency(request.destination_currency.clone()))?;

        let base = &self.config.base_currency;
        let foreign = match (origin.code == *base, destination.code == *base) {
            (true, false) => destination.code.clone(),
            (false, true) => origin.code.clone(),
            _ => {
                return Err(DeskError::validation(
                    format!("exactly one leg must be {}", base),
                    "currency",
                ))
            }
        };

        let consistent = match request.direction {
            TradeDirection::Buy => origin.code == *base,
            TradeDirection::Sell => destination.code == *base,
        };
        if !consistent {
            let rule = match request.direction {
                TradeDirection::Buy => "a buy pays in",
                TradeDirection::Sell => "a sell is paid out in",
            };
            return Err(DeskError::validation(format!("{} {}", rule, base), "direction"));
        }

        if self.catalog.active_segment(&request.segment).is_none() {
            return Err(DeskError::UnknownSegment(request.segment.clone()));
        }

        Ok(Pricing {
            foreign,
            destination,
        })
    }

    fn price_and_book(&self, request: &SubmitRequest, pricing: &Pricing) -> Result<Transaction> {
        let found = self
            .get_latest_quote(&pricing.foreign, &request.segment)
            .ok_or_else(|| DeskError::QuoteUnavailable(pricing.foreign.clone()))?;
        let pricing_fallback = found.is_fallback();
        let quote = found.into_quote();

        let (applied_rate, raw) = match request.direction {
            TradeDirection::Buy => (
                quote.sell_unit(),
                request.amount.checked_div(quote.sell_unit()),
            ),
            TradeDirection::Sell => (
                quote.buy_unit(),
                request.amount.checked_mul(quote.buy_unit()),
            ),
        };
        let raw = raw.ok_or_else(|| {
            DeskError::Internal(format!("cannot apply rate {} to {}", applied_rate, request.amount))
        })?;
        let destination = Money::new(raw, pricing.destination.code.clone())
            .round_to(pricing.destination.decimal_places);
        if !destination.is_positive() {
            return Err(DeskError::validation(
                format!("amount too small to buy any {}", destination.currency),
                "amount",
            ));
        }

        let decision = self.limits.check(&request.client, destination.value, None)?;
        if let LimitDecision::Rejected {
            period,
            ceiling,
            aggregate,
            requested,
        } = decision
        {
            self.metrics.limit_rejected();
            info!(period = %period, ceiling = %ceiling, aggregate = %aggregate, "Submission over limit");
            return Err(DeskError::LimitExceeded {
                period,
                ceiling,
                aggregate,
                requested,
            });
        }

        let transaction = self.ledger.create(
            TransactionDraft {
                client: request.client.clone(),
                segment: request.segment.clone(),
                direction: request.direction,
                origin: Money::new(request.amount, request.origin_currency.clone()),
                destination,
                applied_rate,
                quote_id: quote.id,
                rate_id: quote.rate_id,
                pricing_fallback,
            },
            &request.submitted_by,
        );
        self.metrics.submission_approved();
        Ok(transaction)
    }

    /// Drive a transaction to `new_state`.
    ///
    /// Settling or marking for withdrawal is refused with `StaleRate` when
    /// the trade's rate has been superseded, whether or not the sweep has
    /// cancelled it yet.
    #[instrument(skip(self, reason, actor), fields(actor = %actor))]
    pub async fn transition_transaction(
        &self,
        id: TransactionId,
        new_state: TransactionState,
        reason: impl Into<String>,
        actor: &Actor,
    ) -> Result<Transaction> {
        self.ensure_running()?;
        let reason = reason.into();

        let transaction = match new_state {
            TransactionState::Settled | TransactionState::ToBeWithdrawn => {
                let current = self.get_transaction(id)?;
                let currency = current.foreign_currency(&self.config.base_currency).clone();
                let _guard = self.currency_locks.lock(&currency).await;

                let current = self.get_transaction(id)?;
                let auto_cancelled = current.state == TransactionState::Cancelled
                    && current.processed_by.as_ref().is_some_and(Actor::is_system);
                let stale = current.is_pending()
                    && self.dispatcher.is_stale(&current, &currency, self.clock.now());
                if auto_cancelled || stale {
                    info!(transaction_id = %id, currency = %currency, "Refused against superseded rate");
                    return Err(DeskError::StaleRate {
                        transaction_id: id,
                        currency,
                    });
                }

                self.ledger.transition(id, new_state, reason, actor)?
            }
            _ => self.ledger.transition(id, new_state, reason, actor)?,
        };

        self.metrics.transition_applied();
        Ok(transaction)
    }

    /// Configure the daily limit of the day containing `date`.
    pub fn configure_daily_limit(
        &self,
        date: NaiveDate,
        amount: Decimal,
        effective_from: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<Limit> {
        self.ensure_running()?;
        let mut request = LimitRequest::daily(date, amount);
        request.effective_from = effective_from;
        self.limits.configure(request, actor)
    }

    /// Configure the monthly limit of the month containing `date`.
    pub fn configure_monthly_limit(
        &self,
        date: NaiveDate,
        amount: Decimal,
        effective_from: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<Limit> {
        self.ensure_running()?;
        let mut request = LimitRequest::monthly(date, amount);
        request.effective_from = effective_from;
        self.limits.configure(request, actor)
    }

    /// Check a candidate destination amount for a client.
    pub fn check_limit(&self, client: &ClientId, amount: Decimal) -> Result<LimitDecision> {
        self.limits.check(client, amount, None)
    }

    /// Re-validate an edited amount, leaving the transaction itself out of
    /// the client's volume.
    pub fn recheck_limit(&self, id: TransactionId, amount: Decimal) -> Result<LimitDecision> {
        let transaction = self.get_transaction(id)?;
        self.limits.check(&transaction.client, amount, Some(id))
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.ledger.get(id).ok_or(DeskError::TransactionNotFound(id))
    }

    pub fn transaction_history(&self, id: TransactionId) -> Result<Vec<HistoryEntry>> {
        self.ledger.history(id)
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.pending()
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SegmentPricingEngine> {
        &self.engine
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn limits(&self) -> &LimitEnforcer {
        &self.limits
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }
}
