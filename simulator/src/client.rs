//! Simulated desk clients and the rate feed.

use std::collections::HashMap;

use chrono::NaiveDate;
use fxdesk_common::{ClientId, Currency, SegmentId, TradeDirection};
use fxdesk_desk::SubmitRequest;
use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;

/// A client trading through the desk.
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    pub id: ClientId,
    pub segment: SegmentId,
}

impl SimulatedClient {
    pub fn new(id: impl Into<ClientId>, segment: SegmentId) -> Self {
        Self {
            id: id.into(),
            segment,
        }
    }

    /// A random trade between the base currency and one of `foreign`.
    pub fn random_request(
        &self,
        rng: &mut StdRng,
        base: &Currency,
        foreign: &[Currency],
    ) -> Option<SubmitRequest> {
        if foreign.is_empty() {
            return None;
        }
        let currency = foreign[rng.gen_range(0..foreign.len())].clone();

        let request = if rng.gen_bool(0.5) {
            let amount = Decimal::new(rng.gen_range(10_000..2_000_000), 2);
            SubmitRequest::new(
                self.id.clone(),
                self.segment.clone(),
                base.clone(),
                currency,
                amount,
                TradeDirection::Buy,
            )
        } else {
            let amount = Decimal::new(rng.gen_range(1_000..500_000), 2);
            SubmitRequest::new(
                self.id.clone(),
                self.segment.clone(),
                currency,
                base.clone(),
                amount,
                TradeDirection::Sell,
            )
        };
        Some(request)
    }
}

/// Client factory.
pub struct ClientFactory;

impl ClientFactory {
    /// Create `count` clients spread over `segments` round-robin.
    pub fn create_clients(count: usize, segments: &[SegmentId]) -> Vec<SimulatedClient> {
        if segments.is_empty() {
            return Vec::new();
        }
        (0..count)
            .map(|i| {
                SimulatedClient::new(
                    format!("client-{}", i + 1),
                    segments[i % segments.len()].clone(),
                )
            })
            .collect()
    }
}

/// One market rate quote from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub currency: Currency,
    pub buy: Decimal,
    pub sell: Decimal,
    pub effective_date: NaiveDate,
}

struct Market {
    mid: Decimal,
    next_date: NaiveDate,
}

/// Random-walk market per currency. Each observation for a currency lands
/// on the next calendar date, since a currency takes one rate per date.
pub struct RateFeed {
    markets: HashMap<Currency, Market>,
    /// Half the buy/sell spread, as a fraction of mid.
    half_spread: Decimal,
}

impl RateFeed {
    pub fn new(start: NaiveDate, mids: &[(Currency, Decimal)]) -> Self {
        let markets = mids
            .iter()
            .map(|(currency, mid)| {
                (
                    currency.clone(),
                    Market {
                        mid: *mid,
                        next_date: start,
                    },
                )
            })
            .collect();
        Self {
            markets,
            half_spread: Decimal::new(13, 4),
        }
    }

    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<_> = self.markets.keys().cloned().collect();
        currencies.sort();
        currencies
    }

    /// Quote around the current mid without moving it.
    pub fn current(&mut self, currency: &Currency) -> Option<Tick> {
        let market = self.markets.get_mut(currency)?;
        let half = (market.mid * self.half_spread).round_dp(4);
        let tick = Tick {
            currency: currency.clone(),
            buy: market.mid - half,
            sell: market.mid + half,
            effective_date: market.next_date,
        };
        market.next_date = market.next_date.succ_opt().unwrap_or(market.next_date);
        Some(tick)
    }

    /// Move the mid by up to half a percent and quote around it.
    pub fn tick(&mut self, currency: &Currency, rng: &mut StdRng) -> Option<Tick> {
        let market = self.markets.get_mut(currency)?;
        let bps = Decimal::new(rng.gen_range(-50..=50), 4);
        market.mid = (market.mid * (Decimal::ONE + bps)).round_dp(4);
        self.current(currency)
    }

    /// Use an externally chosen buy/sell pair, keeping the feed in step.
    pub fn fixed(&mut self, currency: &Currency, buy: Decimal, sell: Decimal) -> Option<Tick> {
        let market = self.markets.get_mut(currency)?;
        market.mid = (buy + sell) / Decimal::TWO;
        let tick = Tick {
            currency: currency.clone(),
            buy,
            sell,
            effective_date: market.next_date,
        };
        market.next_date = market.next_date.succ_opt().unwrap_or(market.next_date);
        Some(tick)
    }
}
