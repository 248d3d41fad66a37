//! Error types for inbox-triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Rule definition errors. Raised at load time, never retried.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule #{index} has an empty pattern")]
    EmptyPattern { index: usize },

    #[error("Rule #{index} has an invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("Failed to parse rule file: {0}")]
    Parse(String),

    #[error("IO error reading rule file: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Transient mailbox failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Permanent mailbox failure: {reason}")]
    Permanent { reason: String },

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Mailbox authentication failed: {reason}")]
    AuthFailed { reason: String },
}

impl MailboxError {
    /// Network timeouts and rate limits resolve on their own; everything else does not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Scorer collaborator errors. Both variants defer the message to a later cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScorerError {
    #[error("Scoring model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("Scorer returned out-of-range score ({importance}, {urgency})")]
    InvalidScore { importance: f32, urgency: f32 },
}

/// Terminal failure of a single mailbox action.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: MailboxError },

    #[error("Permanent failure: {0}")]
    Permanent(MailboxError),

    #[error("Action timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Action cancelled before completion")]
    Cancelled,
}

/// Cycle-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Candidate fetch failed: {0}")]
    Fetch(#[source] MailboxError),

    #[error("Processed store failed: {0}")]
    Store(#[from] DatabaseError),

    #[error("Digest export failed: {0}")]
    Digest(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
