//! FxDesk Ledger
//!
//! Transaction state machine with an append-only audit trail, plus the
//! client volume aggregation that limit checks read from.

pub mod engine;
pub mod journal;
pub mod volume;

pub use engine::{TransactionDraft, TransactionLedger};
pub use journal::HistoryEntry;
pub use volume::{ClientVolume, VolumeQuery};
