//! Error types for FxDesk.

use crate::{Currency, LimitPeriod, SegmentId, TransactionId, TransactionState};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for FxDesk operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeskError {
    /// Malformed input.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Currency is not in the catalog or is inactive.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(Currency),

    /// Segment is not in the catalog or is inactive.
    #[error("Unknown segment: {0}")]
    UnknownSegment(SegmentId),

    /// No quote exists for the currency in any segment.
    #[error("No quote available for {0}")]
    QuoteUnavailable(Currency),

    /// A volume ceiling would be exceeded.
    #[error("{period} limit {ceiling} exceeded: volume {aggregate} + requested {requested}")]
    LimitExceeded {
        period: LimitPeriod,
        ceiling: Decimal,
        aggregate: Decimal,
        requested: Decimal,
    },

    /// The rate a transaction was priced with has been superseded.
    #[error("Rate for {currency} superseded, transaction {transaction_id} must be re-quoted")]
    StaleRate {
        transaction_id: TransactionId,
        currency: Currency,
    },

    /// State machine violation.
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// A quote fan-out could not be completed for every segment.
    #[error("Quote fan-out for {currency} failed at segment {segment}: {reason}")]
    PartialFanout {
        currency: Currency,
        segment: SegmentId,
        reason: String,
    },

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Operation did not complete within the caller's timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The desk is not accepting requests.
    #[error("Desk unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeskError {
    /// Shorthand for a validation error on a named field.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        DeskError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeskError::Timeout(_) | DeskError::Unavailable(_) | DeskError::PartialFanout { .. }
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            DeskError::Timeout(_) => Some(1000),
            DeskError::Unavailable(_) => Some(1000),
            DeskError::PartialFanout { .. } => Some(250),
            _ => None,
        }
    }

    /// Check if this is an expected business outcome rather than a fault.
    pub fn is_business_outcome(&self) -> bool {
        matches!(self, DeskError::LimitExceeded { .. } | DeskError::StaleRate { .. })
    }

    /// Get stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            DeskError::Validation { .. } => "VALIDATION_FAILED",
            DeskError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            DeskError::UnknownSegment(_) => "UNKNOWN_SEGMENT",
            DeskError::QuoteUnavailable(_) => "QUOTE_UNAVAILABLE",
            DeskError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            DeskError::StaleRate { .. } => "STALE_RATE",
            DeskError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            DeskError::PartialFanout { .. } => "PARTIAL_FANOUT",
            DeskError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            DeskError::Timeout(_) => "TIMEOUT",
            DeskError::Unavailable(_) => "UNAVAILABLE",
            DeskError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for FxDesk operations.
pub type Result<T> = std::result::Result<T, DeskError>;
