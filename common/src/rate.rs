//! Market rate observations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, RateId};

/// One market observation of a currency's buy and sell price, quoted in base
/// currency units. Append-only; unique per (currency, effective date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateObservation {
    /// Unique observation ID.
    pub id: RateId,
    /// Currency being priced.
    pub currency: Currency,
    /// Business date the observation applies to.
    pub effective_date: NaiveDate,
    /// Price at which the house buys one unit.
    pub buy_price: Decimal,
    /// Price at which the house sells one unit.
    pub sell_price: Decimal,
    /// When the observation was recorded.
    pub created_at: DateTime<Utc>,
    /// Store-assigned ordering among observations.
    pub sequence: u64,
}

impl RateObservation {
    /// Derive the segment-agnostic pricing inputs.
    ///
    /// The base price is the mid of the observed prices and each commission is
    /// the distance from the mid to the observed side, so a 0% discount
    /// reproduces the observed prices.
    pub fn pricing_inputs(&self) -> PricingInputs {
        let base_price = (self.buy_price + self.sell_price) / Decimal::TWO;
        PricingInputs {
            base_price,
            commission_buy: base_price - self.buy_price,
            commission_sell: self.sell_price - base_price,
        }
    }

    /// Observed spread (sell minus buy).
    pub fn spread(&self) -> Decimal {
        self.sell_price - self.buy_price
    }
}

/// Inputs to the per-segment pricing formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingInputs {
    pub base_price: Decimal,
    pub commission_buy: Decimal,
    pub commission_sell: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn observation(buy: Decimal, sell: Decimal) -> RateObservation {
        RateObservation {
            id: RateId::new(),
            currency: Currency::usd(),
            effective_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            buy_price: buy,
            sell_price: sell,
            created_at: Utc::now(),
            sequence: 1,
        }
    }

    #[test]
    fn test_pricing_inputs_from_mid() {
        let inputs = observation(dec!(3.70), dec!(3.80)).pricing_inputs();

        assert_eq!(inputs.base_price, dec!(3.75));
        assert_eq!(inputs.commission_buy, dec!(0.05));
        assert_eq!(inputs.commission_sell, dec!(0.05));
    }

    #[test]
    fn test_zero_spread_has_zero_commissions() {
        let inputs = observation(dec!(1.10), dec!(1.10)).pricing_inputs();

        assert_eq!(inputs.commission_buy, Decimal::ZERO);
        assert_eq!(inputs.commission_sell, Decimal::ZERO);
    }
}
