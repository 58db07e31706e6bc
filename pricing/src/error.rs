//! Pricing error types.

use chrono::NaiveDate;
use fxdesk_common::{Currency, DeskError, SegmentId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in the rate store and quote engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    /// Observation failed validation.
    #[error("Invalid rate for {currency}: {reason}")]
    InvalidRate { currency: Currency, reason: String },

    /// An observation already exists for this currency and date.
    #[error("Rate for {currency} on {date} already recorded")]
    DuplicateObservation { currency: Currency, date: NaiveDate },

    /// No observation recorded for the currency.
    #[error("Rate not available for {0}")]
    RateNotAvailable(Currency),

    /// No quote exists for the currency in any segment.
    #[error("Quote not available for {0}")]
    QuoteNotAvailable(Currency),

    /// Discount outside [0, 100].
    #[error("Invalid discount {percentage} for segment {segment}")]
    InvalidDiscount {
        segment: SegmentId,
        percentage: Decimal,
    },

    /// A fan-out could not compute a quote for one segment.
    #[error("Fan-out for {currency} failed at segment {segment}: {reason}")]
    PartialFanout {
        currency: Currency,
        segment: SegmentId,
        reason: String,
    },

    /// Currency unknown or inactive.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(Currency),

    /// Segment unknown or inactive.
    #[error("Unknown segment: {0}")]
    UnknownSegment(SegmentId),
}

impl PricingError {
    /// Check if the whole operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PricingError::PartialFanout { .. })
    }
}

impl From<PricingError> for DeskError {
    fn from(err: PricingError) -> Self {
        let message = err.to_string();
        match err {
            PricingError::InvalidRate { .. } => DeskError::validation(message, "rate"),
            PricingError::DuplicateObservation { .. } => {
                DeskError::validation(message, "effective_date")
            }
            PricingError::InvalidDiscount { .. } => DeskError::validation(message, "discount"),
            PricingError::RateNotAvailable(currency) | PricingError::QuoteNotAvailable(currency) => {
                DeskError::QuoteUnavailable(currency)
            }
            PricingError::PartialFanout {
                currency,
                segment,
                reason,
            } => DeskError::PartialFanout {
                currency,
                segment,
                reason,
            },
            PricingError::UnknownCurrency(currency) => DeskError::UnknownCurrency(currency),
            PricingError::UnknownSegment(segment) => DeskError::UnknownSegment(segment),
        }
    }
}

/// Result type for pricing operations.
pub type PricingResult<T> = Result<T, PricingError>;
