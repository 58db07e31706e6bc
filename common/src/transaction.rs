//! Trade records and their state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Actor, ClientId, Currency, Money, QuoteId, RateId, SegmentId, TradeDirection, TransactionId};

/// Lifecycle state of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Accepted, awaiting settlement; cancelled if its rate is superseded.
    Pending,
    /// Funds exchanged.
    Settled,
    /// Withdrawn before settlement, manually or by a rate change.
    Cancelled,
    /// Reversed after settlement or after being marked for withdrawal.
    Annulled,
    /// Settled on the books, awaiting physical withdrawal by the client.
    ToBeWithdrawn,
}

impl TransactionState {
    /// Check if this is a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Cancelled | TransactionState::Annulled)
    }

    /// Check if volume in this state counts against limits.
    pub fn counts_toward_volume(&self) -> bool {
        !self.is_terminal()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &'static [TransactionState] {
        match self {
            TransactionState::Pending => &[
                TransactionState::Settled,
                TransactionState::Cancelled,
                TransactionState::Annulled,
                TransactionState::ToBeWithdrawn,
            ],
            TransactionState::Settled => &[TransactionState::Annulled],
            TransactionState::ToBeWithdrawn => &[TransactionState::Annulled],
            TransactionState::Cancelled => &[],
            TransactionState::Annulled => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Pending => "pending",
            TransactionState::Settled => "settled",
            TransactionState::Cancelled => "cancelled",
            TransactionState::Annulled => "annulled",
            TransactionState::ToBeWithdrawn => "to_be_withdrawn",
        };
        write!(f, "{}", s)
    }
}

/// A trade between a client and the house.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub client: ClientId,
    /// Segment the client was priced as.
    pub segment: SegmentId,
    pub direction: TradeDirection,
    /// What the client delivers.
    pub origin: Money,
    /// What the client receives; this is the amount counted against limits.
    pub destination: Money,
    /// Unit price applied (base currency per unit of foreign currency).
    pub applied_rate: Decimal,
    /// Quote the trade was priced from.
    pub quote_id: QuoteId,
    /// Rate observation behind that quote.
    pub rate_id: RateId,
    /// Priced from another segment's quote because the segment had none.
    pub pricing_fallback: bool,
    pub state: TransactionState,
    /// Free-text reason of the last state change.
    pub observation: Option<String>,
    /// Actor of the last state change.
    pub processed_by: Option<Actor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// The non-base currency of the trade.
    pub fn foreign_currency(&self, base: &Currency) -> &Currency {
        if &self.origin.currency == base {
            &self.destination.currency
        } else {
            &self.origin.currency
        }
    }

    /// Check if either leg is in `currency`.
    pub fn involves(&self, currency: &Currency) -> bool {
        &self.origin.currency == currency || &self.destination.currency == currency
    }

    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }
}
