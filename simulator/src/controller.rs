//! Simulation controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use fxdesk_common::{
    Actor, CancellationNotice, Currency, CurrencyDefinition, DeskError, Discount, LimitPeriod,
    SegmentId, TradeDirection, TransactionState,
};
use fxdesk_desk::{ChannelNotifier, DeskConfig, ExchangeDesk, SubmitRequest};
use fxdesk_pricing::{Catalog, InMemoryCatalog};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::client::{ClientFactory, RateFeed, SimulatedClient, Tick};
use crate::metrics::{SimulationMetrics, SimulationReport};
use crate::scenario::{Expectation, Scenario, ScenarioStep};

/// Segments and discounts the catalog starts with.
const SEGMENTS: [(&str, Option<i64>); 3] = [("retail", None), ("preferred", Some(25)), ("corporate", Some(50))];

fn decimal(raw: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str_exact(raw).with_context(|| format!("invalid decimal {:?}", raw))
}

fn back_office() -> Actor {
    Actor::user("back-office")
}

/// State shared between the controller and its background loops.
#[derive(Clone)]
struct Shared {
    desk: Arc<ExchangeDesk>,
    catalog: Arc<InMemoryCatalog>,
    feed: Arc<Mutex<RateFeed>>,
    rng: Arc<Mutex<StdRng>>,
    clients: Arc<RwLock<Vec<SimulatedClient>>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
    running: Arc<RwLock<bool>>,
}

impl Shared {
    fn base(&self) -> Currency {
        self.desk.config().base_currency.clone()
    }

    async fn record_tick(&self, tick: Tick) -> anyhow::Result<()> {
        let update = self
            .desk
            .record_rate(tick.currency.clone(), tick.buy, tick.sell, tick.effective_date, &Actor::user("market-feed"))
            .await?;
        self.metrics.write().await.rate_ticks += 1;
        info!(
            currency = %tick.currency,
            buy = %tick.buy,
            sell = %tick.sell,
            quotes = update.quotes.len(),
            cancelled = update.cancelled(),
            "Rate published"
        );
        Ok(())
    }

    async fn submit(&self, request: SubmitRequest) -> Result<(), DeskError> {
        let started = Instant::now();
        let result = self.desk.submit_transaction(request).await;
        let mut metrics = self.metrics.write().await;
        match &result {
            Ok(transaction) => {
                metrics.record_approved(started.elapsed().as_micros() as u64);
                debug!(
                    transaction_id = %transaction.id,
                    origin = %transaction.origin,
                    destination = %transaction.destination,
                    "Trade booked"
                );
            }
            Err(DeskError::LimitExceeded { .. }) => metrics.record_limit_rejection(),
            Err(e) => {
                debug!(error = %e, "Trade rejected");
                metrics.record_other_rejection();
            }
        }
        result.map(|_| ())
    }

    /// Try to settle up to `max` pending trades.
    async fn settle_pending(&self, max: usize) {
        for transaction in self.desk.pending_transactions().into_iter().take(max) {
            let result = self
                .desk
                .transition_transaction(transaction.id, TransactionState::Settled, "funds received", &back_office())
                .await;
            let mut metrics = self.metrics.write().await;
            match result {
                Ok(_) => metrics.settled += 1,
                Err(DeskError::StaleRate { .. }) => metrics.stale_refusals += 1,
                // Cancelled by a sweep between listing and settling.
                Err(DeskError::IllegalTransition { .. }) => {}
                Err(e) => warn!(transaction_id = %transaction.id, error = %e, "Settlement failed"),
            }
        }
    }

    async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Controls the simulation.
pub struct SimulationController {
    client_count: usize,
    speed: f64,
    shared: Shared,
    notices: Option<mpsc::Receiver<CancellationNotice>>,
    started: Instant,
}

impl SimulationController {
    pub fn new(client_count: usize, speed: f64, seed: Option<u64>, config: DeskConfig) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let catalog = Arc::new(InMemoryCatalog::new());
        let (notifier, notices) = ChannelNotifier::new(config.notification_buffer);
        let desk = ExchangeDesk::new(config, catalog.clone(), Arc::new(notifier));

        let today = fxdesk_common::now().date_naive();
        let feed = RateFeed::new(
            today,
            &[
                (Currency::usd(), Decimal::new(375, 2)),
                (Currency::eur(), Decimal::new(410, 2)),
            ],
        );

        Self {
            client_count,
            speed: if speed > 0.0 { speed } else { 1.0 },
            shared: Shared {
                desk: Arc::new(desk),
                catalog,
                feed: Arc::new(Mutex::new(feed)),
                rng: Arc::new(Mutex::new(rng)),
                clients: Arc::new(RwLock::new(Vec::new())),
                metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
                running: Arc::new(RwLock::new(false)),
            },
            notices: Some(notices),
            started: Instant::now(),
        }
    }

    /// Bootstrap the catalog, limits, first rates and clients.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        let shared = &self.shared;
        let now = fxdesk_common::now();
        let base = shared.base();
        info!(clients = self.client_count, base_currency = %base, "Initializing simulation");

        shared.catalog.put_currency(CurrencyDefinition::new(Currency::pen(), "Peruvian Sol", 2));
        shared.catalog.put_currency(CurrencyDefinition::new(Currency::usd(), "US Dollar", 2));
        shared.catalog.put_currency(CurrencyDefinition::new(Currency::eur(), "Euro", 2));
        if shared.catalog.currency(&base).is_none() {
            shared.catalog.put_currency(CurrencyDefinition::new(base.clone(), base.code(), base.decimal_places()));
        }

        let mut segments = Vec::new();
        for (name, discount) in SEGMENTS {
            let segment = shared.catalog.add_segment(name, now);
            if let Some(percentage) = discount {
                shared.catalog.put_discount(Discount::new(
                    segment.id.clone(),
                    Decimal::from(percentage),
                    back_office(),
                    now,
                )?);
            }
            segments.push(segment.id);
        }

        shared.desk.start().await?;

        if let Some(mut notices) = self.notices.take() {
            let metrics = shared.metrics.clone();
            tokio::spawn(async move {
                while let Some(notice) = notices.recv().await {
                    debug!(
                        transaction_id = %notice.transaction_id,
                        client = %notice.client,
                        reason = %notice.reason,
                        "Client notified"
                    );
                    metrics.write().await.notices_received += 1;
                }
            });
        }

        let today = now.date_naive();
        shared
            .desk
            .configure_daily_limit(today, Decimal::from(1_000_000), None, &back_office())?;
        shared
            .desk
            .configure_monthly_limit(today, Decimal::from(20_000_000), None, &back_office())?;

        let opening = [
            (Currency::usd(), Decimal::new(370, 2), Decimal::new(380, 2)),
            (Currency::eur(), Decimal::new(405, 2), Decimal::new(415, 2)),
        ];
        for (currency, buy, sell) in opening {
            if currency == base {
                continue;
            }
            let tick = shared.feed.lock().await.fixed(&currency, buy, sell);
            if let Some(tick) = tick {
                shared.record_tick(tick).await?;
            }
        }

        *shared.clients.write().await = ClientFactory::create_clients(self.client_count, &segments);
        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(name = %scenario.name, description = %scenario.description, "Running scenario");

        *self.shared.running.write().await = true;
        for (index, step) in scenario.steps.iter().enumerate() {
            if !self.shared.is_running().await {
                break;
            }
            self.execute_step(step)
                .await
                .with_context(|| format!("step {} of {} failed", index + 1, scenario.name))?;
        }
        *self.shared.running.write().await = false;

        Ok(())
    }

    /// Run random traffic until `duration` elapses or Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");
        *self.shared.running.write().await = true;

        let handles = vec![
            tokio::spawn(trade_loop(self.shared.clone(), self.scaled(200))),
            tokio::spawn(rate_loop(self.shared.clone(), self.scaled(3000))),
            tokio::spawn(settlement_loop(self.shared.clone(), self.scaled(1000))),
        ];

        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::signal::ctrl_c().await?,
        }

        *self.shared.running.write().await = false;
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    fn scaled(&self, millis: u64) -> Duration {
        Duration::from_millis((millis as f64 / self.speed) as u64)
    }

    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        let shared = &self.shared;
        let now = fxdesk_common::now();

        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(self.scaled(*millis)).await;
            }
            ScenarioStep::RecordRate { currency, buy, sell } => {
                let currency = Currency::new(currency.as_str());
                let tick = shared
                    .feed
                    .lock()
                    .await
                    .fixed(&currency, decimal(buy)?, decimal(sell)?)
                    .with_context(|| format!("no market for {}", currency))?;
                shared.record_tick(tick).await?;
            }
            ScenarioStep::Submit {
                client,
                segment,
                direction,
                currency,
                amount,
                expect,
            } => {
                let base = shared.base();
                let foreign = Currency::new(currency.as_str());
                let (origin, destination) = match direction {
                    TradeDirection::Buy => (base, foreign),
                    TradeDirection::Sell => (foreign, base),
                };
                let request = SubmitRequest::new(
                    client.as_str(),
                    segment.as_str(),
                    origin,
                    destination,
                    decimal(amount)?,
                    *direction,
                );

                let outcome = shared.submit(request).await;
                info!(client = %client, amount = %amount, outcome = ?outcome, "Scenario submission");
                if let Some(expected) = expect {
                    let matched = match (expected, &outcome) {
                        (Expectation::Approved, Ok(())) => true,
                        (Expectation::LimitExceeded, Err(DeskError::LimitExceeded { .. })) => true,
                        (Expectation::Rejected, Err(e)) => !matches!(e, DeskError::LimitExceeded { .. }),
                        _ => false,
                    };
                    if !matched {
                        anyhow::bail!("expected {:?}, got {:?}", expected, outcome);
                    }
                }
            }
            ScenarioStep::SettlePending => {
                shared.settle_pending(usize::MAX).await;
            }
            ScenarioStep::CreateSegment { name, discount } => {
                let segment = shared.catalog.add_segment(name.as_str(), now);
                if let Some(percentage) = discount {
                    shared.catalog.put_discount(Discount::new(
                        segment.id.clone(),
                        decimal(percentage)?,
                        back_office(),
                        now,
                    )?);
                }
                let repriced = shared.desk.segment_created(&segment.id, &back_office()).await?;
                info!(segment = %segment.id, quotes = repriced.quotes.len(), "Segment created");
            }
            ScenarioStep::SetDiscount { segment, percentage } => {
                let segment = SegmentId::new(segment.as_str());
                shared.catalog.put_discount(Discount::new(
                    segment.clone(),
                    decimal(percentage)?,
                    back_office(),
                    now,
                )?);
                let repriced = shared.desk.discount_changed(&segment, &back_office()).await?;
                info!(segment = %segment, cancelled = repriced.cancelled(), "Discount changed");
            }
            ScenarioStep::ConfigureLimit { period, amount } => {
                let today = now.date_naive();
                let amount = decimal(amount)?;
                match period {
                    LimitPeriod::Daily => shared.desk.configure_daily_limit(today, amount, None, &back_office())?,
                    LimitPeriod::Monthly => shared.desk.configure_monthly_limit(today, amount, None, &back_office())?,
                };
            }
            ScenarioStep::AssertCounts {
                pending,
                cancelled,
                settled,
            } => {
                let counts = shared.desk.ledger().count_by_state();
                let checks = [
                    (TransactionState::Pending, pending),
                    (TransactionState::Cancelled, cancelled),
                    (TransactionState::Settled, settled),
                ];
                for (state, expected) in checks {
                    let actual = counts.get(&state).copied().unwrap_or(0);
                    if let Some(expected) = expected {
                        anyhow::ensure!(
                            actual == *expected,
                            "expected {} {} transactions, found {}",
                            expected,
                            state,
                            actual
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Build the end-of-run report.
    pub async fn report(&self, scenario: Option<String>) -> SimulationReport {
        let by_state = self
            .shared
            .desk
            .ledger()
            .count_by_state()
            .into_iter()
            .map(|(state, count)| (state.to_string(), count))
            .collect::<BTreeMap<_, _>>();

        SimulationReport::new(
            scenario,
            self.started.elapsed().as_millis(),
            self.shared.metrics.read().await.clone(),
            self.shared.desk.metrics().snapshot(),
            by_state,
        )
    }

    /// Stop the simulation.
    pub async fn stop(&self) -> anyhow::Result<()> {
        *self.shared.running.write().await = false;
        self.shared.desk.stop().await?;
        Ok(())
    }
}

async fn trade_loop(shared: Shared, delay: Duration) {
    let base = shared.base();
    while shared.is_running().await {
        let foreign = shared.feed.lock().await.currencies();
        let request = {
            let clients = shared.clients.read().await;
            let mut rng = shared.rng.lock().await;
            if clients.is_empty() {
                None
            } else {
                let client = &clients[rng.gen_range(0..clients.len())];
                client.random_request(&mut rng, &base, &foreign)
            }
        };

        if let Some(request) = request {
            let _ = shared.submit(request).await;
        }
        tokio::time::sleep(delay).await;
    }
}

async fn rate_loop(shared: Shared, delay: Duration) {
    while shared.is_running().await {
        tokio::time::sleep(delay).await;

        let tick = {
            let mut feed = shared.feed.lock().await;
            let currencies = feed.currencies();
            let mut rng = shared.rng.lock().await;
            if currencies.is_empty() {
                None
            } else {
                let currency = currencies[rng.gen_range(0..currencies.len())].clone();
                feed.tick(&currency, &mut rng)
            }
        };

        if let Some(tick) = tick {
            if let Err(e) = shared.record_tick(tick).await {
                warn!(error = %e, "Rate tick rejected");
            }
        }
    }
}

async fn settlement_loop(shared: Shared, delay: Duration) {
    while shared.is_running().await {
        tokio::time::sleep(delay).await;
        let batch = shared.rng.lock().await.gen_range(1..=5);
        shared.settle_pending(batch).await;
    }
}
