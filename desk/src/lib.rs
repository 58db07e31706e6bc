//! FxDesk Exchange Desk
//!
//! The desk ties the pricing engine and the transaction ledger together. It
//! serializes quote fan-outs per currency and submissions per client, checks
//! volume ceilings, and cancels pending trades whose rate was superseded.

pub mod config;
pub mod desk;
pub mod dispatcher;
pub mod keyed_locks;
pub mod limits;
pub mod metrics;
pub mod notifier;
pub mod state;

pub use config::DeskConfig;
pub use desk::{ExchangeDesk, RateUpdate, Repricing, SubmitRequest};
pub use dispatcher::{InvalidationDispatcher, SweepFailure, SweepReport};
pub use keyed_locks::{KeyGuard, KeyedLocks};
pub use limits::{LimitBook, LimitEnforcer, LimitRequest};
pub use metrics::{DeskMetrics, MetricsSnapshot, SharedMetrics};
pub use notifier::{ChannelNotifier, LogNotifier, Notifier};
pub use state::DeskState;
