//! Scripted simulation scenarios.

use std::path::Path;

use fxdesk_common::{LimitPeriod, TradeDirection};
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Amounts and prices are decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Pause, scaled by the speed multiplier.
    Wait { millis: u64 },
    /// Record a rate for a foreign currency on its next effective date.
    RecordRate {
        currency: String,
        buy: String,
        sell: String,
    },
    /// Submit a trade between the base currency and `currency`.
    Submit {
        client: String,
        segment: String,
        direction: TradeDirection,
        currency: String,
        amount: String,
        #[serde(default)]
        expect: Option<Expectation>,
    },
    /// Try to settle every pending trade.
    SettlePending,
    /// Add a segment to the catalog and backfill its quotes.
    CreateSegment {
        name: String,
        #[serde(default)]
        discount: Option<String>,
    },
    /// Change a segment's discount and re-price it.
    SetDiscount { segment: String, percentage: String },
    /// Replace today's daily or this month's monthly limit.
    ConfigureLimit { period: LimitPeriod, amount: String },
    /// Fail the scenario unless the ledger holds these counts.
    AssertCounts {
        #[serde(default)]
        pending: Option<usize>,
        #[serde(default)]
        cancelled: Option<usize>,
        #[serde(default)]
        settled: Option<usize>,
    },
}

/// Expected outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Approved,
    LimitExceeded,
    Rejected,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "rate-change" => Ok(Self::rate_change()),
            "limit-boundary" => Ok(Self::limit_boundary()),
            "segment-backfill" => Ok(Self::segment_backfill()),
            "discount-change" => Ok(Self::discount_change()),
            path if path.ends_with(".json") => Self::from_file(path),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["rate-change", "limit-boundary", "segment-backfill", "discount-change"]
    }

    /// Pending trades on USD are cancelled by a new USD rate.
    fn rate_change() -> Self {
        let sell = |client: &str, segment: &str| ScenarioStep::Submit {
            client: client.to_string(),
            segment: segment.to_string(),
            direction: TradeDirection::Sell,
            currency: "USD".to_string(),
            amount: "250".to_string(),
            expect: Some(Expectation::Approved),
        };

        Self {
            name: "rate-change".to_string(),
            description: "A new USD rate cancels every pending USD trade".to_string(),
            steps: vec![
                sell("client-1", "retail"),
                sell("client-2", "preferred"),
                sell("client-3", "corporate"),
                ScenarioStep::AssertCounts {
                    pending: Some(3),
                    cancelled: Some(0),
                    settled: None,
                },
                ScenarioStep::RecordRate {
                    currency: "USD".to_string(),
                    buy: "3.72".to_string(),
                    sell: "3.82".to_string(),
                },
                ScenarioStep::Wait { millis: 100 },
                ScenarioStep::AssertCounts {
                    pending: Some(0),
                    cancelled: Some(3),
                    settled: None,
                },
            ],
        }
    }

    /// Reaching a daily ceiling exactly is allowed, passing it is not.
    fn limit_boundary() -> Self {
        let buy = |amount: &str, expect: Expectation| ScenarioStep::Submit {
            client: "client-1".to_string(),
            segment: "retail".to_string(),
            direction: TradeDirection::Buy,
            currency: "USD".to_string(),
            amount: amount.to_string(),
            expect: Some(expect),
        };

        Self {
            name: "limit-boundary".to_string(),
            description: "Daily limit of 50000.00 with 49900.00 already booked".to_string(),
            steps: vec![
                ScenarioStep::ConfigureLimit {
                    period: LimitPeriod::Daily,
                    amount: "50000.00".to_string(),
                },
                // 189620 / 3.80 = 49900.00 USD
                buy("189620", Expectation::Approved),
                buy("380.04", Expectation::LimitExceeded),
                buy("380", Expectation::Approved),
                buy("0.04", Expectation::LimitExceeded),
                ScenarioStep::AssertCounts {
                    pending: Some(2),
                    cancelled: None,
                    settled: None,
                },
            ],
        }
    }

    /// A new segment inherits quotes from existing rates.
    fn segment_backfill() -> Self {
        Self {
            name: "segment-backfill".to_string(),
            description: "Create a segment and trade in it right away".to_string(),
            steps: vec![
                ScenarioStep::CreateSegment {
                    name: "private".to_string(),
                    discount: Some("60".to_string()),
                },
                ScenarioStep::Submit {
                    client: "client-1".to_string(),
                    segment: "private".to_string(),
                    direction: TradeDirection::Sell,
                    currency: "EUR".to_string(),
                    amount: "1000".to_string(),
                    expect: Some(Expectation::Approved),
                },
                ScenarioStep::SettlePending,
                ScenarioStep::AssertCounts {
                    pending: Some(0),
                    cancelled: None,
                    settled: Some(1),
                },
            ],
        }
    }

    /// A discount change only cancels trades in that segment.
    fn discount_change() -> Self {
        let sell = |client: &str, segment: &str| ScenarioStep::Submit {
            client: client.to_string(),
            segment: segment.to_string(),
            direction: TradeDirection::Sell,
            currency: "USD".to_string(),
            amount: "100".to_string(),
            expect: Some(Expectation::Approved),
        };

        Self {
            name: "discount-change".to_string(),
            description: "Raising the preferred discount re-prices preferred only".to_string(),
            steps: vec![
                sell("client-1", "retail"),
                sell("client-2", "preferred"),
                ScenarioStep::SetDiscount {
                    segment: "preferred".to_string(),
                    percentage: "40".to_string(),
                },
                ScenarioStep::Wait { millis: 100 },
                ScenarioStep::AssertCounts {
                    pending: Some(1),
                    cancelled: Some(1),
                    settled: None,
                },
            ],
        }
    }
}
