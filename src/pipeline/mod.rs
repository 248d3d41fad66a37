//! Triage pipeline.
//!
//! Every candidate message flows through:
//! 1. `RuleSet::evaluate()`: ordered pattern rules, may force a tier
//! 2. `Scorer::score()`: importance/urgency signals, only without a rule match
//! 3. `Classifier::classify()`: pure tier decision
//! 4. `ActionExecutor::execute()`: one mailbox mutation with retry
//!
//! `PollCycle` drives these per batch and keeps the processed store in step:
//! claim before acting, commit on success, release otherwise.

pub mod classifier;
pub mod daemon;
pub mod executor;
pub mod poll_cycle;
pub mod retry;
pub mod rules;
pub mod scorer;
pub mod types;

pub use classifier::{Classifier, Thresholds};
pub use daemon::{run_daemon, spawn_daemon};
pub use executor::{ActionExecutor, DryRunExecutor, MailboxExecutor};
pub use poll_cycle::{CycleConfig, CycleSummary, MessageOutcome, OutcomeStatus, PollCycle, TierCounts};
pub use retry::RetryPolicy;
pub use rules::RuleSet;
pub use scorer::{LexiconScorer, Scorer};
