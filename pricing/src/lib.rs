//! FxDesk Pricing
//!
//! Rate observations and per-segment quotes.
//!
//! # Features
//!
//! - Append-only rate store, unique per currency and effective date
//! - All-or-nothing quote fan-out across active segments
//! - Segment backfill and discount-change re-pricing
//! - Catalog read interface with a TTL-cached discount decorator
//!
//! # Example
//!
//! ```rust,ignore
//! use fxdesk_common::{Actor, UnitOfWork};
//! use fxdesk_pricing::{NewRate, SegmentPricingEngine};
//!
//! let mut unit = UnitOfWork::new();
//! let observation = engine.record_rate(&mut unit, NewRate::new(usd, today, buy, sell))?;
//! unit.commit();
//!
//! let mut unit = UnitOfWork::new();
//! engine.generate_quotes(&mut unit, &observation, &Actor::System)?;
//! let events = unit.commit();
//! ```

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod quotes;
pub mod rates;

pub use cache::{CacheStats, TtlCache, TtlCacheConfig};
pub use catalog::{CachedCatalog, Catalog, InMemoryCatalog};
pub use engine::SegmentPricingEngine;
pub use error::{PricingError, PricingResult};
pub use quotes::QuoteBook;
pub use rates::{NewRate, RateStore};
