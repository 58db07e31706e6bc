//! Domain events exchanged inside the desk pipeline.
//!
//! Events are only released after the unit of work that produced them has
//! committed (see [`crate::UnitOfWork`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClientId, Currency, QuoteId, QuoteTrigger, RateId, RateObservation, SegmentId, TransactionId};

/// Something that happened in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeskEvent {
    /// A rate observation was committed.
    RateRecorded(RateObservation),
    /// A quote fan-out for one currency was committed.
    QuotesGenerated {
        currency: Currency,
        rate_id: RateId,
        trigger: QuoteTrigger,
        segments: Vec<SegmentId>,
        quote_ids: Vec<QuoteId>,
    },
}

impl DeskEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DeskEvent::RateRecorded(_) => "rate_recorded",
            DeskEvent::QuotesGenerated { .. } => "quotes_generated",
        }
    }
}

/// Notice handed to the external notifier when a trade is cancelled because
/// its rate was superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationNotice {
    pub transaction_id: TransactionId,
    pub client: ClientId,
    pub currency: Currency,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}
