//! Catalog records read by the pricing core.
//!
//! Currencies, segments and discounts are administered elsewhere; these are the
//! shapes the core consumes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Actor, Currency, SegmentId};

/// A tradable currency as configured in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDefinition {
    /// Currency code (unique, case-insensitive).
    pub code: Currency,
    /// Display name.
    pub name: String,
    /// Decimal precision used for amounts in this currency.
    pub decimal_places: u32,
    /// Whether the currency can currently be quoted and traded.
    pub active: bool,
}

impl CurrencyDefinition {
    /// Create an active currency definition.
    pub fn new(code: Currency, name: impl Into<String>, decimal_places: u32) -> Self {
        Self {
            code,
            name: name.into(),
            decimal_places,
            active: true,
        }
    }
}

/// A customer segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment identifier (its unique name).
    pub id: SegmentId,
    /// Display name as entered by the administrator.
    pub name: String,
    /// Whether quotes are generated for this segment.
    pub active: bool,
    /// When the segment was created.
    pub created_at: DateTime<Utc>,
}

impl Segment {
    /// Create an active segment.
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            id: SegmentId::new(&name),
            name,
            active: true,
            created_at,
        }
    }
}

/// Per-segment discount applied to commissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    /// Segment the discount belongs to.
    pub segment: SegmentId,
    /// Percentage in [0, 100].
    pub percentage: Decimal,
    /// Who last changed it.
    pub modified_by: Actor,
    /// When it was last changed.
    pub modified_at: DateTime<Utc>,
}

impl Discount {
    /// Create a discount, validating the percentage range.
    pub fn new(
        segment: SegmentId,
        percentage: Decimal,
        modified_by: Actor,
        modified_at: DateTime<Utc>,
    ) -> Result<Self, InvalidDiscount> {
        if !Self::is_valid_percentage(percentage) {
            return Err(InvalidDiscount {
                segment,
                percentage,
            });
        }
        Ok(Self {
            segment,
            percentage,
            modified_by,
            modified_at,
        })
    }

    /// Check that a percentage lies in [0, 100].
    pub fn is_valid_percentage(percentage: Decimal) -> bool {
        percentage >= Decimal::ZERO && percentage <= Decimal::ONE_HUNDRED
    }
}

/// Error for a discount outside [0, 100].
#[derive(Debug, Clone)]
pub struct InvalidDiscount {
    pub segment: SegmentId,
    pub percentage: Decimal,
}

impl std::fmt::Display for InvalidDiscount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "discount {}% for segment {} is outside [0, 100]",
            self.percentage, self.segment
        )
    }
}

impl std::error::Error for InvalidDiscount {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_discount_range() {
        let now = Utc::now();
        let segment = SegmentId::new("retail");

        assert!(Discount::new(segment.clone(), dec!(0), Actor::System, now).is_ok());
        assert!(Discount::new(segment.clone(), dec!(100), Actor::System, now).is_ok());
        assert!(Discount::new(segment.clone(), dec!(-0.01), Actor::System, now).is_err());
        assert!(Discount::new(segment, dec!(100.5), Actor::System, now).is_err());
    }

    #[test]
    fn test_segment_id_derived_from_name() {
        let segment = Segment::new("Corporate", Utc::now());
        assert_eq!(segment.id, SegmentId::new("corporate"));
        assert_eq!(segment.name, "Corporate");
        assert!(segment.active);
    }
}
