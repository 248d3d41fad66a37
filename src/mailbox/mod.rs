//! Abstract mailbox collaborator.
//!
//! The pipeline only talks to a [`Mailbox`]: list candidate ids page by
//! page, fetch the ones it has not processed yet, and apply one mutation per
//! message. Transport, authentication and
//! label bookkeeping live behind the trait.

pub mod gmail;
pub mod mime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;
use crate::pipeline::types::{Action, Message};

pub use gmail::{GmailConfig, GmailMailbox};

/// One page of candidate message ids.
#[derive(Debug, Clone, Default)]
pub struct CandidatePage {
    /// Ids in mailbox order (stable within a cycle).
    pub ids: Vec<String>,
    /// Cursor for the next page, `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Result of a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The message was already in the desired state. Counts as success.
    AlreadyApplied,
}

/// A mailbox label as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxLabel {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logging.
    fn name(&self) -> &str;

    /// Check credentials before any claim is made. Failure is fatal.
    async fn verify(&self) -> Result<(), MailboxError> {
        Ok(())
    }

    /// List up to `limit` candidate ids starting at `cursor` (`None` = first page).
    async fn list_candidates(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<CandidatePage, MailboxError>;

    /// Fetch one listed message. `Ok(None)` if its content cannot be parsed.
    async fn fetch_message(&self, id: &str) -> Result<Option<Message>, MailboxError>;

    /// Apply exactly one mutation to one message.
    async fn apply_action(
        &self,
        message_id: &str,
        action: &Action,
    ) -> Result<ApplyOutcome, MailboxError>;

    /// All labels visible to the account.
    async fn list_labels(&self) -> Result<Vec<MailboxLabel>, MailboxError> {
        Ok(Vec::new())
    }
}
