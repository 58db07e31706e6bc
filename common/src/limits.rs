//! Volume ceilings and limit decisions.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::{day_bounds, month_bounds};
use crate::Actor;

/// Calendar period a ceiling applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for LimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitPeriod::Daily => write!(f, "daily"),
            LimitPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

/// Key of one concrete period: a calendar day or a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub period: LimitPeriod,
    /// The day itself, or the first day of the month.
    pub start: NaiveDate,
}

impl PeriodKey {
    /// Period key for the day containing `date`.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            period: LimitPeriod::Daily,
            start: date,
        }
    }

    /// Period key for the month containing `date`.
    pub fn month(date: NaiveDate) -> Self {
        Self {
            period: LimitPeriod::Monthly,
            start: date.with_day(1).unwrap_or(date),
        }
    }

    /// Period key of the given kind containing `at`.
    pub fn containing(period: LimitPeriod, at: DateTime<Utc>) -> Self {
        match period {
            LimitPeriod::Daily => Self::day(at.date_naive()),
            LimitPeriod::Monthly => Self::month(at.date_naive()),
        }
    }

    /// Half-open UTC interval `[start, end)` covered by this period.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self.period {
            LimitPeriod::Daily => day_bounds(self.start),
            LimitPeriod::Monthly => month_bounds(self.start),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            LimitPeriod::Daily => write!(f, "daily:{}", self.start),
            LimitPeriod::Monthly => write!(f, "monthly:{}", self.start.format("%Y-%m")),
        }
    }
}

/// A configured ceiling on cumulative trade volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub key: PeriodKey,
    /// Maximum cumulative volume; zero freezes trading.
    pub amount: Decimal,
    /// Instant from which the limit applies and from which volume is counted.
    pub effective_from: DateTime<Utc>,
    pub configured_by: Actor,
    pub configured_at: DateTime<Utc>,
}

impl Limit {
    /// Check whether the limit has become effective at `at`.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at
    }

    /// Start of the window whose volume counts against this limit.
    pub fn window_start(&self) -> DateTime<Utc> {
        let (period_start, _) = self.key.bounds();
        self.effective_from.max(period_start)
    }
}

/// Outcome of a limit check. Rejection is a business outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Approved,
    Rejected {
        period: LimitPeriod,
        ceiling: Decimal,
        aggregate: Decimal,
        requested: Decimal,
    },
}

impl LimitDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, LimitDecision::Approved)
    }

    /// Human-readable reason naming the violated ceiling.
    pub fn reason(&self) -> String {
        match self {
            LimitDecision::Approved => "approved".to_string(),
            LimitDecision::Rejected {
                period,
                ceiling,
                aggregate,
                requested,
            } => format!(
                "{} limit {} exceeded: volume {} + requested {}",
                period, ceiling, aggregate, requested
            ),
        }
    }
}
