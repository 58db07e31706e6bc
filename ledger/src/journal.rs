//! Audit trail rows for transaction state changes.

use chrono::{DateTime, Utc};
use fxdesk_common::{Actor, TransactionId, TransactionState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of a transaction's history. Rows are appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Transaction this row belongs to.
    pub transaction_id: TransactionId,
    /// State before the change; `None` for the creation row.
    pub previous: Option<TransactionState>,
    /// State after the change.
    pub new: TransactionState,
    /// Reason given for the change.
    pub reason: Option<String>,
    /// Who made the change.
    pub actor: Actor,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Opening row of every history.
    pub fn creation(transaction_id: TransactionId, actor: Actor, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            previous: None,
            new: TransactionState::Pending,
            reason: None,
            actor,
            recorded_at: at,
        }
    }

    /// Row for a state change.
    pub fn transition(
        transaction_id: TransactionId,
        previous: TransactionState,
        new: TransactionState,
        reason: impl Into<String>,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            previous: Some(previous),
            new,
            reason: Some(reason.into()),
            actor,
            recorded_at: at,
        }
    }

    /// Check if the change was made by the core rather than a person.
    pub fn is_automatic(&self) -> bool {
        self.actor.is_system()
    }

    pub fn is_creation(&self) -> bool {
        self.previous.is_none()
    }
}
