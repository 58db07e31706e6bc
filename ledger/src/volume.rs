//! Client volume aggregation for limit checks.

use chrono::{DateTime, Utc};
use fxdesk_common::{ClientId, Transaction, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which of a client's transactions to add up.
#[derive(Debug, Clone)]
pub struct VolumeQuery {
    pub client: ClientId,
    /// Inclusive lower bound on `created_at`.
    pub since: DateTime<Utc>,
    /// Inclusive upper bound on `created_at`.
    pub until: DateTime<Utc>,
    /// Transaction left out of the total, for re-validating an edit.
    pub exclude: Option<TransactionId>,
}

impl VolumeQuery {
    pub fn new(client: ClientId, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            client,
            since,
            until,
            exclude: None,
        }
    }

    pub fn excluding(mut self, id: Option<TransactionId>) -> Self {
        self.exclude = id;
        self
    }

    /// Check if a transaction counts toward this query's total.
    ///
    /// Cancelled and annulled transactions carry no live volume.
    pub fn counts(&self, transaction: &Transaction) -> bool {
        transaction.client == self.client
            && transaction.state.counts_toward_volume()
            && transaction.created_at >= self.since
            && transaction.created_at <= self.until
            && Some(transaction.id) != self.exclude
    }
}

/// Aggregated destination volume of a client over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVolume {
    pub client: ClientId,
    /// Sum of destination amounts, whatever their currency. A buy adds
    /// foreign units and a sell adds base units to the same total; limits
    /// are expressed against this raw sum.
    pub total: Decimal,
    /// Number of transactions counted.
    pub transactions: usize,
}

impl ClientVolume {
    pub fn empty(client: ClientId) -> Self {
        Self {
            client,
            total: Decimal::ZERO,
            transactions: 0,
        }
    }

    /// Add one transaction's destination amount.
    pub fn add(&mut self, transaction: &Transaction) {
        self.total += transaction.destination.value;
        self.transactions += 1;
    }
}
