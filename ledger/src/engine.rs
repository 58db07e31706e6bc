//! Core transaction ledger implementation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use fxdesk_common::{
    Actor, ClientId, Currency, DeskError, Money, QuoteId, RateId, Result, SegmentId,
    SharedClock, SystemClock, TradeDirection, Transaction, TransactionId, TransactionState,
};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use crate::journal::HistoryEntry;
use crate::volume::{ClientVolume, VolumeQuery};

/// Everything needed to open a transaction.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub client: ClientId,
    pub segment: SegmentId,
    pub direction: TradeDirection,
    pub origin: Money,
    pub destination: Money,
    pub applied_rate: Decimal,
    pub quote_id: QuoteId,
    pub rate_id: RateId,
    pub pricing_fallback: bool,
}

/// A transaction together with its audit trail, kept in one map entry so a
/// state change and its history row are written under the same guard.
#[derive(Debug, Clone)]
struct TransactionRecord {
    transaction: Transaction,
    history: Vec<HistoryEntry>,
}

/// Owns transaction state. Every change goes through [`transition`], which
/// validates it against the state machine and appends one history row.
///
/// [`transition`]: TransactionLedger::transition
pub struct TransactionLedger {
    records: DashMap<TransactionId, TransactionRecord>,
    by_client: DashMap<ClientId, Vec<TransactionId>>,
    clock: SharedClock,
}

impl TransactionLedger {
    /// Create a ledger on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            by_client: DashMap::new(),
            clock,
        }
    }

    /// Open a transaction in `pending` with its creation history row.
    #[instrument(skip(self, draft), fields(client = %draft.client, direction = %draft.direction))]
    pub fn create(&self, draft: TransactionDraft, actor: &Actor) -> Transaction {
        let now = self.clock.now();
        let transaction = Transaction {
            id: TransactionId::new(),
            client: draft.client,
            segment: draft.segment,
            direction: draft.direction,
            origin: draft.origin,
            destination: draft.destination,
            applied_rate: draft.applied_rate,
            quote_id: draft.quote_id,
            rate_id: draft.rate_id,
            pricing_fallback: draft.pricing_fallback,
            state: TransactionState::Pending,
            observation: None,
            processed_by: Some(actor.clone()),
            created_at: now,
            updated_at: now,
        };

        let record = TransactionRecord {
            history: vec![HistoryEntry::creation(transaction.id, actor.clone(), now)],
            transaction: transaction.clone(),
        };
        self.records.insert(transaction.id, record);
        self.by_client
            .entry(transaction.client.clone())
            .or_default()
            .push(transaction.id);

        info!(
            transaction_id = %transaction.id,
            origin = %transaction.origin,
            destination = %transaction.destination,
            "Transaction created"
        );

        transaction
    }

    /// Move a transaction to `new_state`.
    ///
    /// Illegal targets are rejected and leave state and history untouched.
    #[instrument(skip(self, reason, actor), fields(actor = %actor))]
    pub fn transition(
        &self,
        id: TransactionId,
        new_state: TransactionState,
        reason: impl Into<String>,
        actor: &Actor,
    ) -> Result<Transaction> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(DeskError::TransactionNotFound(id))?;

        let previous = record.transaction.state;
        if !previous.can_transition_to(new_state) {
            debug!(from = %previous, to = %new_state, "Rejected transition");
            return Err(DeskError::IllegalTransition {
                from: previous,
                to: new_state,
            });
        }

        let reason = reason.into();
        let now = self.clock.now();
        record.history.push(HistoryEntry::transition(
            id,
            previous,
            new_state,
            reason.clone(),
            actor.clone(),
            now,
        ));

        let transaction = &mut record.transaction;
        transaction.state = new_state;
        transaction.observation = Some(reason);
        transaction.processed_by = Some(actor.clone());
        transaction.updated_at = now;

        info!(from = %previous, to = %new_state, "Transaction transitioned");
        Ok(transaction.clone())
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.records.get(&id).map(|r| r.transaction.clone())
    }

    /// Full audit trail, creation row first.
    pub fn history(&self, id: TransactionId) -> Result<Vec<HistoryEntry>> {
        self.records
            .get(&id)
            .map(|r| r.history.clone())
            .ok_or(DeskError::TransactionNotFound(id))
    }

    /// Pending transactions with either leg in `currency`, oldest first.
    pub fn pending_for_currency(&self, currency: &Currency) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self
            .records
            .iter()
            .filter(|r| r.transaction.is_pending() && r.transaction.involves(currency))
            .map(|r| r.transaction.clone())
            .collect();
        pending.sort_by_key(|t| t.id);
        pending
    }

    /// All pending transactions, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self
            .records
            .iter()
            .filter(|r| r.transaction.is_pending())
            .map(|r| r.transaction.clone())
            .collect();
        pending.sort_by_key(|t| t.id);
        pending
    }

    /// A client's transactions, oldest first.
    pub fn for_client(&self, client: &ClientId) -> Vec<Transaction> {
        let ids = self
            .by_client
            .get(client)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Sum of destination amounts matching `query`.
    pub fn client_volume(&self, query: &VolumeQuery) -> ClientVolume {
        let mut volume = ClientVolume::empty(query.client.clone());
        let ids = self
            .by_client
            .get(&query.client)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        for id in ids {
            if let Some(record) = self.records.get(&id) {
                if query.counts(&record.transaction) {
                    volume.add(&record.transaction);
                }
            }
        }
        volume
    }

    pub fn count_by_state(&self) -> HashMap<TransactionState, usize> {
        let mut counts = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.transaction.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for TransactionLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use fxdesk_common::{Clock, ManualClock};
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn draft(client: &str, pen: Decimal, usd: Decimal) -> TransactionDraft {
        TransactionDraft {
            client: ClientId::new(client),
            segment: SegmentId::new("retail"),
            direction: TradeDirection::Buy,
            origin: Money::new(pen, Currency::pen()),
            destination: Money::new(usd, Currency::usd()),
            applied_rate: dec!(3.80),
            quote_id: QuoteId::new(),
            rate_id: RateId::new(),
            pricing_fallback: false,
        }
    }

    fn ledger() -> (TransactionLedger, ManualClock) {
        let clock = ManualClock::new(start());
        (TransactionLedger::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_create_opens_history() {
        let (ledger, _) = ledger();
        let txn = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::user("cashier"));

        assert_eq!(txn.state, TransactionState::Pending);
        let history = ledger.history(txn.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_creation());
        assert_eq!(history[0].new, TransactionState::Pending);
    }

    #[test]
    fn test_transition_appends_one_row() {
        let (ledger, clock) = ledger();
        let txn = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::user("cashier"));

        clock.advance(Duration::minutes(5));
        let settled = ledger
            .transition(txn.id, TransactionState::Settled, "paid at counter", &Actor::user("cashier"))
            .unwrap();
        assert_eq!(settled.state, TransactionState::Settled);
        assert_eq!(settled.observation.as_deref(), Some("paid at counter"));
        assert_eq!(settled.updated_at, start() + Duration::minutes(5));

        let annulled = ledger
            .transition(txn.id, TransactionState::Annulled, "reversal", &Actor::user("supervisor"))
            .unwrap();
        assert_eq!(annulled.state, TransactionState::Annulled);

        let history = ledger.history(txn.id).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].previous, Some(TransactionState::Settled));
        assert_eq!(history[2].actor, Actor::user("supervisor"));
    }

    #[test]
    fn test_illegal_transition_leaves_record_unchanged() {
        let (ledger, _) = ledger();
        let txn = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::user("cashier"));
        ledger
            .transition(txn.id, TransactionState::Annulled, "error", &Actor::user("supervisor"))
            .unwrap();

        let err = ledger
            .transition(txn.id, TransactionState::Pending, "undo", &Actor::user("supervisor"))
            .unwrap_err();
        assert_eq!(
            err,
            DeskError::IllegalTransition {
                from: TransactionState::Annulled,
                to: TransactionState::Pending,
            }
        );
        assert_eq!(ledger.get(txn.id).unwrap().state, TransactionState::Annulled);
        assert_eq!(ledger.history(txn.id).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_transaction() {
        let (ledger, _) = ledger();
        let id = TransactionId::new();
        let err = ledger
            .transition(id, TransactionState::Settled, "x", &Actor::System)
            .unwrap_err();
        assert_eq!(err, DeskError::TransactionNotFound(id));
        assert!(ledger.history(id).is_err());
    }

    #[test]
    fn test_pending_for_currency() {
        let (ledger, _) = ledger();
        let usd = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);
        let mut eur = draft("c-2", dec!(410), dec!(100));
        eur.destination = Money::new(dec!(100), Currency::eur());
        ledger.create(eur, &Actor::System);
        let settled = ledger.create(draft("c-3", dec!(380), dec!(100)), &Actor::System);
        ledger
            .transition(settled.id, TransactionState::Settled, "paid", &Actor::System)
            .unwrap();

        let pending: Vec<_> = ledger
            .pending_for_currency(&Currency::usd())
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(pending, vec![usd.id]);
        assert_eq!(ledger.pending_for_currency(&Currency::pen()).len(), 2);
    }

    #[test]
    fn test_client_volume_sums_destinations_across_currencies() {
        let (ledger, clock) = ledger();
        ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);
        let mut sell = draft("c-1", dec!(100), dec!(370));
        sell.direction = TradeDirection::Sell;
        sell.origin = Money::new(dec!(100), Currency::usd());
        sell.destination = Money::new(dec!(370), Currency::pen());
        ledger.create(sell, &Actor::System);

        let volume = ledger.client_volume(&VolumeQuery::new(ClientId::new("c-1"), start(), clock.now()));
        assert_eq!(volume.total, dec!(470));
        assert_eq!(volume.transactions, 2);
    }

    #[test]
    fn test_client_volume_excludes_dead_and_excluded() {
        let (ledger, clock) = ledger();
        let a = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);
        let b = ledger.create(draft("c-1", dec!(760), dec!(200)), &Actor::System);
        let c = ledger.create(draft("c-1", dec!(1140), dec!(300)), &Actor::System);
        ledger.create(draft("c-2", dec!(3800), dec!(1000)), &Actor::System);
        ledger
            .transition(c.id, TransactionState::Cancelled, "client request", &Actor::System)
            .unwrap();
        ledger
            .transition(b.id, TransactionState::Settled, "paid", &Actor::System)
            .unwrap();

        let query = VolumeQuery::new(ClientId::new("c-1"), start(), clock.now());
        let volume = ledger.client_volume(&query);
        assert_eq!(volume.total, dec!(300));
        assert_eq!(volume.transactions, 2);

        let volume = ledger.client_volume(&query.clone().excluding(Some(a.id)));
        assert_eq!(volume.total, dec!(200));

        let later = VolumeQuery::new(ClientId::new("c-1"), start() + Duration::seconds(1), clock.now());
        assert_eq!(ledger.client_volume(&later).total, Decimal::ZERO);
    }

    #[test]
    fn test_count_by_state() {
        let (ledger, _) = ledger();
        let a = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);
        ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);
        ledger
            .transition(a.id, TransactionState::ToBeWithdrawn, "awaiting pickup", &Actor::System)
            .unwrap();

        let counts = ledger.count_by_state();
        assert_eq!(counts.get(&TransactionState::Pending), Some(&1));
        assert_eq!(counts.get(&TransactionState::ToBeWithdrawn), Some(&1));
        assert_eq!(ledger.for_client(&ClientId::new("c-1")).len(), 2);
    }

    #[test]
    fn test_concurrent_cancellations_write_one_row() {
        let (ledger, _) = ledger();
        let txn = ledger.create(draft("c-1", dec!(380), dec!(100)), &Actor::System);

        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        ledger
                            .transition(txn.id, TransactionState::Cancelled, "rate for USD superseded", &Actor::System)
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(ledger.history(txn.id).unwrap().len(), 2);
    }
}
