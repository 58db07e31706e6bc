//! Append-only log of generated quotes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fxdesk_common::{Currency, Quote, QuoteId, QuoteMatch, SegmentId, UnitOfWork};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Default)]
struct QuoteLog {
    by_currency: RwLock<HashMap<Currency, Vec<Quote>>>,
    sequence: AtomicU64,
}

/// Quotes per currency and segment. Quotes are never updated; a new price is
/// a new row.
#[derive(Clone, Default)]
pub struct QuoteBook {
    log: Arc<QuoteLog>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` consecutive sequence numbers, returning the first.
    pub fn reserve_sequences(&self, count: usize) -> u64 {
        self.log.sequence.fetch_add(count as u64, Ordering::SeqCst) + 1
    }

    /// Stage a batch. On commit the whole batch is appended under a single
    /// write lock, so readers observe all of it or none of it.
    pub fn stage_batch(&self, unit: &mut UnitOfWork, batch: Vec<Quote>) {
        if batch.is_empty() {
            return;
        }
        let log = self.log.clone();
        unit.stage(move || {
            let count = batch.len();
            let mut by_currency = log.by_currency.write();
            for quote in batch {
                by_currency.entry(quote.currency.clone()).or_default().push(quote);
            }
            debug!(count, "Quote batch appended");
        });
    }

    /// Latest quote for the pair.
    pub fn latest(&self, currency: &Currency, segment: &SegmentId) -> Option<Quote> {
        self.find_latest(currency, |q| &q.segment == segment)
    }

    /// Latest quote for the pair created at or before `as_of`.
    pub fn latest_as_of(
        &self,
        currency: &Currency,
        segment: &SegmentId,
        as_of: DateTime<Utc>,
    ) -> Option<Quote> {
        self.find_latest(currency, |q| &q.segment == segment && q.created_at <= as_of)
    }

    /// Latest quote for the currency across every segment.
    pub fn latest_any(&self, currency: &Currency, as_of: DateTime<Utc>) -> Option<Quote> {
        self.find_latest(currency, |q| q.created_at <= as_of)
    }

    /// Latest quote for the pair, falling back to any segment's latest quote
    /// for the currency when the segment has none.
    pub fn lookup(
        &self,
        currency: &Currency,
        segment: &SegmentId,
        as_of: DateTime<Utc>,
    ) -> Option<QuoteMatch> {
        self.latest_as_of(currency, segment, as_of)
            .map(QuoteMatch::Exact)
            .or_else(|| self.latest_any(currency, as_of).map(QuoteMatch::Fallback))
    }

    pub fn get(&self, id: QuoteId) -> Option<Quote> {
        self.log
            .by_currency
            .read()
            .values()
            .flat_map(|quotes| quotes.iter())
            .find(|q| q.id == id)
            .cloned()
    }

    /// Every quote for the pair, oldest first.
    pub fn history(&self, currency: &Currency, segment: &SegmentId) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .log
            .by_currency
            .read()
            .get(currency)
            .map(|quotes| quotes.iter().filter(|q| &q.segment == segment).cloned().collect())
            .unwrap_or_default();
        quotes.sort_by_key(|q| q.sequence);
        quotes
    }

    /// Number of quotes for a currency.
    pub fn count_for(&self, currency: &Currency) -> usize {
        self.log
            .by_currency
            .read()
            .get(currency)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.log.by_currency.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_latest(&self, currency: &Currency, filter: impl Fn(&Quote) -> bool) -> Option<Quote> {
        self.log.by_currency.read().get(currency).and_then(|quotes| {
            quotes
                .iter()
                .filter(|q| filter(q))
                .max_by_key(|q| q.sequence)
                .cloned()
        })
    }
}
