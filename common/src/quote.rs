//! Per-segment quotes derived from rate observations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Actor, Currency, PricingInputs, QuoteId, RateId, SegmentId};

/// Why a quote was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteTrigger {
    /// A new rate observation was committed.
    RateChange,
    /// A segment was created and inherited the latest rates.
    SegmentBackfill,
    /// A segment's discount was created or changed.
    DiscountChange,
}

impl std::fmt::Display for QuoteTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuoteTrigger::RateChange => "RATE_CHANGE",
            QuoteTrigger::SegmentBackfill => "SEGMENT_BACKFILL",
            QuoteTrigger::DiscountChange => "DISCOUNT_CHANGE",
        };
        write!(f, "{}", s)
    }
}

/// Values captured when a quote was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub base_price: Decimal,
    pub commission_buy: Decimal,
    pub commission_sell: Decimal,
    pub discount_percentage: Decimal,
    /// Price at which the house buys one unit from this segment.
    pub buy_unit: Decimal,
    /// Price at which the house sells one unit to this segment.
    pub sell_unit: Decimal,
}

impl QuoteSnapshot {
    /// Apply a discount to the commissions.
    ///
    /// `buy_unit = base - commission_buy * (1 - d/100)` and
    /// `sell_unit = base + commission_sell * (1 - d/100)`.
    pub fn compute(inputs: PricingInputs, discount_percentage: Decimal) -> Self {
        let factor = Decimal::ONE - discount_percentage / Decimal::ONE_HUNDRED;
        Self {
            base_price: inputs.base_price,
            commission_buy: inputs.commission_buy,
            commission_sell: inputs.commission_sell,
            discount_percentage,
            buy_unit: inputs.base_price - inputs.commission_buy * factor,
            sell_unit: inputs.base_price + inputs.commission_sell * factor,
        }
    }

    /// Spread between the sell and buy unit prices.
    pub fn spread(&self) -> Decimal {
        self.sell_unit - self.buy_unit
    }
}

/// An immutable priced buy/sell pair for one currency and one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub currency: Currency,
    pub segment: SegmentId,
    /// Observation the quote was derived from.
    pub rate_id: RateId,
    pub snapshot: QuoteSnapshot,
    pub trigger: QuoteTrigger,
    pub generated_by: Actor,
    pub created_at: DateTime<Utc>,
    /// Store-assigned ordering; a fan-out batch gets consecutive values.
    pub sequence: u64,
}

impl Quote {
    pub fn buy_unit(&self) -> Decimal {
        self.snapshot.buy_unit
    }

    pub fn sell_unit(&self) -> Decimal {
        self.snapshot.sell_unit
    }
}

/// Result of a latest-quote lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteMatch {
    /// The segment's own quote.
    Exact(Quote),
    /// The segment had no quote; this is the latest quote of another segment
    /// and does not carry the requesting segment's discount.
    Fallback(Quote),
}

impl QuoteMatch {
    pub fn quote(&self) -> &Quote {
        match self {
            QuoteMatch::Exact(q) | QuoteMatch::Fallback(q) => q,
        }
    }

    pub fn into_quote(self) -> Quote {
        match self {
            QuoteMatch::Exact(q) | QuoteMatch::Fallback(q) => q,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, QuoteMatch::Fallback(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs() -> PricingInputs {
        PricingInputs {
            base_price: dec!(3.75),
            commission_buy: dec!(0.05),
            commission_sell: dec!(0.05),
        }
    }

    #[test]
    fn test_zero_discount_keeps_commissions() {
        let snapshot = QuoteSnapshot::compute(inputs(), Decimal::ZERO);

        assert_eq!(snapshot.buy_unit, dec!(3.70));
        assert_eq!(snapshot.sell_unit, dec!(3.80));
    }

    #[test]
    fn test_discount_shrinks_commission_not_price() {
        let snapshot = QuoteSnapshot::compute(inputs(), dec!(20));

        // 0.05 * 0.8 = 0.04 on each side of the base price
        assert_eq!(snapshot.buy_unit, dec!(3.71));
        assert_eq!(snapshot.sell_unit, dec!(3.79));
        assert_eq!(snapshot.discount_percentage, dec!(20));
    }

    #[test]
    fn test_full_discount_collapses_to_base() {
        let snapshot = QuoteSnapshot::compute(inputs(), dec!(100));

        assert_eq!(snapshot.buy_unit, dec!(3.75));
        assert_eq!(snapshot.sell_unit, dec!(3.75));
        assert_eq!(snapshot.spread(), Decimal::ZERO);
    }
}
