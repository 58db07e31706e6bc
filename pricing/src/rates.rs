//! Append-only store of market rate observations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fxdesk_common::{Currency, DeskEvent, RateId, RateObservation, UnitOfWork};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{PricingError, PricingResult};

/// Input for a new observation.
#[derive(Debug, Clone)]
pub struct NewRate {
    pub currency: Currency,
    pub effective_date: NaiveDate,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
}

impl NewRate {
    pub fn new(
        currency: Currency,
        effective_date: NaiveDate,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> Self {
        Self {
            currency,
            effective_date,
            buy_price,
            sell_price,
        }
    }

    fn validate(&self) -> PricingResult<()> {
        let invalid = |reason: &str| PricingError::InvalidRate {
            currency: self.currency.clone(),
            reason: reason.to_string(),
        };

        if self.buy_price <= Decimal::ZERO || self.sell_price <= Decimal::ZERO {
            return Err(invalid("prices must be positive"));
        }
        if self.buy_price > self.sell_price {
            return Err(invalid("buy price exceeds sell price"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RateLog {
    by_currency: RwLock<HashMap<Currency, Vec<RateObservation>>>,
    /// Keys taken by committed or staged observations.
    reserved: DashMap<(Currency, NaiveDate), RateId>,
    sequence: AtomicU64,
}

/// Rate observations per currency, unique per (currency, effective date).
#[derive(Clone, Default)]
pub struct RateStore {
    log: Arc<RateLog>,
}

impl RateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an observation and stage it into `unit`.
    ///
    /// The (currency, date) key is reserved immediately and released again if
    /// the unit is dropped without committing. The `RateRecorded` event is
    /// only released by a successful commit.
    pub fn stage(
        &self,
        unit: &mut UnitOfWork,
        rate: NewRate,
        created_at: DateTime<Utc>,
    ) -> PricingResult<RateObservation> {
        rate.validate()?;

        let key = (rate.currency.clone(), rate.effective_date);
        let id = RateId::new();
        match self.log.reserved.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(PricingError::DuplicateObservation {
                    currency: rate.currency,
                    date: rate.effective_date,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let observation = RateObservation {
            id,
            currency: rate.currency,
            effective_date: rate.effective_date,
            buy_price: rate.buy_price,
            sell_price: rate.sell_price,
            created_at,
            sequence: self.log.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let log = self.log.clone();
        unit.on_rollback(move || {
            log.reserved.remove(&key);
        });

        let log = self.log.clone();
        let staged = observation.clone();
        unit.stage(move || {
            debug!(rate_id = %staged.id, currency = %staged.currency, "Rate observation appended");
            log.by_currency
                .write()
                .entry(staged.currency.clone())
                .or_default()
                .push(staged);
        });
        unit.emit(DeskEvent::RateRecorded(observation.clone()));

        Ok(observation)
    }

    /// Most recent committed observation, by effective date then sequence.
    pub fn latest(&self, currency: &Currency) -> Option<RateObservation> {
        self.log
            .by_currency
            .read()
            .get(currency)
            .and_then(|history| {
                history
                    .iter()
                    .max_by_key(|o| (o.effective_date, o.sequence))
                    .cloned()
            })
    }

    /// Check whether `observation` is the latest committed one for its currency.
    pub fn is_latest(&self, observation: &RateObservation) -> bool {
        self.latest(&observation.currency)
            .map(|latest| latest.id == observation.id)
            .unwrap_or(false)
    }

    /// Look up an observation by ID.
    pub fn get(&self, id: RateId) -> Option<RateObservation> {
        self.log
            .by_currency
            .read()
            .values()
            .flat_map(|history| history.iter())
            .find(|o| o.id == id)
            .cloned()
    }

    /// All committed observations for a currency, oldest effective date first.
    pub fn history(&self, currency: &Currency) -> Vec<RateObservation> {
        let mut history = self
            .log
            .by_currency
            .read()
            .get(currency)
            .cloned()
            .unwrap_or_default();
        history.sort_by_key(|o| (o.effective_date, o.sequence));
        history
    }

    /// Number of committed observations.
    pub fn len(&self) -> usize {
        self.log.by_currency.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
