//! FxDesk Common Types
//!
//! This crate contains shared types used across FxDesk, including
//! identifiers, monetary types, catalog records, rates, quotes, limits and
//! the transaction state machine.

pub mod catalog;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod limits;
pub mod monetary;
pub mod quote;
pub mod rate;
pub mod time;
pub mod transaction;
pub mod unit_of_work;

pub use catalog::*;
pub use error::*;
pub use events::*;
pub use identifiers::*;
pub use limits::*;
pub use monetary::*;
pub use quote::*;
pub use rate::*;
pub use time::*;
pub use transaction::*;
pub use unit_of_work::*;
