//! `ProcessedStore` trait: durable record of which messages were acted upon.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::pipeline::types::{Action, DecisionSource, Tier};

/// Per-identifier state. `Unseen → Claimed → Committed`, or
/// `Claimed → Unseen` on release. `Committed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Unseen,
    Claimed,
    Committed,
}

/// Durable proof that a message's action was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub tier: Tier,
    pub action: Action,
    pub source: DecisionSource,
    pub processed_at: DateTime<Utc>,
}

/// Backend-agnostic processed-message store.
///
/// `claim` is the only synchronization point between concurrent cycles and
/// must be a single atomic check-and-set.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Current state of an identifier.
    async fn state(&self, message_id: &str) -> Result<ClaimState, DatabaseError>;

    /// True once the identifier is committed.
    async fn is_processed(&self, message_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state(message_id).await? == ClaimState::Committed)
    }

    /// Reserve an unseen identifier for `owner`. Returns `false` if it is
    /// already claimed or committed.
    async fn claim(&self, message_id: &str, owner: &str) -> Result<bool, DatabaseError>;

    /// Refresh `owner`'s claim so stale recovery leaves it alone. Returns
    /// `false` if `owner` no longer holds the claim.
    async fn touch(&self, message_id: &str, owner: &str) -> Result<bool, DatabaseError>;

    /// Finalize `owner`'s claim. Committing an already-committed identifier
    /// is a no-op; committing a claim `owner` does not hold is a constraint
    /// violation.
    async fn commit(&self, record: &ProcessedRecord, owner: &str) -> Result<(), DatabaseError>;

    /// Drop `owner`'s claim, returning the identifier to `Unseen`. Releasing
    /// a committed identifier or someone else's claim is a no-op.
    async fn release(&self, message_id: &str, owner: &str) -> Result<(), DatabaseError>;

    /// Release every claim taken before `claimed_before`. Returns how many.
    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, DatabaseError>;

    /// Committed record for an identifier.
    async fn get_record(&self, message_id: &str)
    -> Result<Option<ProcessedRecord>, DatabaseError>;

    /// Most recently committed records, newest first.
    async fn recent_records(&self, limit: usize) -> Result<Vec<ProcessedRecord>, DatabaseError>;
}
