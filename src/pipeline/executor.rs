//! Action execution against the mailbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ExecutionError;
use crate::mailbox::{ApplyOutcome, Mailbox};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::types::{Action, Message};

/// Executes one action for one message.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Apply `action`. `Ok` means the mailbox is now in the desired state;
    /// `Err` is terminal for this message in this cycle.
    async fn execute(
        &self,
        message: &Message,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, ExecutionError>;
}

/// Real executor: one mailbox mutation with retry and an overall deadline.
pub struct MailboxExecutor {
    mailbox: Arc<dyn Mailbox>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl MailboxExecutor {
    pub fn new(mailbox: Arc<dyn Mailbox>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            mailbox,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl ActionExecutor for MailboxExecutor {
    async fn execute(
        &self,
        message: &Message,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, ExecutionError> {
        let attempt = self.policy.run(action.kind(), cancel, || {
            self.mailbox.apply_action(&message.id, action)
        });

        let outcome = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ExecutionError::TimedOut {
                after: self.timeout,
            })??;

        match outcome {
            ApplyOutcome::Applied => {
                debug!(id = %message.id, action = %action, "Action applied");
            }
            ApplyOutcome::AlreadyApplied => {
                debug!(id = %message.id, action = %action, "Message already in desired state");
            }
        }
        Ok(outcome)
    }
}

/// Logs the intended action instead of calling the mailbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(
        &self,
        message: &Message,
        action: &Action,
        _cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, ExecutionError> {
        info!(
            id = %message.id,
            sender = %message.sender,
            subject = %message.subject,
            action = %action,
            "[DRY RUN] would apply action"
        );
        Ok(ApplyOutcome::Applied)
    }
}
