//! One polling pass: Fetch → Filter → Classify → Act → Finalize.
//!
//! The cycle claims every message it intends to act on before acting, and
//! every claim ends in exactly one of `commit` (action confirmed) or
//! `release` (action failed, deferred or cancelled). A claim is refreshed
//! right before its action runs. Claims older than `claim_ttl` are treated
//! as left by a crashed process and released at the start of the next cycle.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, ExecutionError, MailboxError, PipelineError, ScorerError};
use crate::mailbox::{CandidatePage, Mailbox};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::executor::{ActionExecutor, DryRunExecutor};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::rules::RuleSet;
use crate::pipeline::scorer::Scorer;
use crate::pipeline::types::{Decision, DecisionSource, Message, Score, Tier};
use crate::store::{ProcessedRecord, ProcessedStore};

/// Label used for the Review tier unless configured otherwise.
pub const DEFAULT_REVIEW_LABEL: &str = "@Action/Review";

/// Knobs for a single cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub review_label: String,
    /// Maximum messages claimed (or, in dry-run, inspected) per cycle.
    pub batch_size: usize,
    /// Maximum candidate pages fetched per cycle.
    pub max_pages: usize,
    /// Parallel actions.
    pub max_in_flight: usize,
    pub scorer_timeout: Duration,
    /// Claims older than this are treated as abandoned.
    pub claim_ttl: Duration,
    /// Backoff for candidate fetches.
    pub fetch_retry: RetryPolicy,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            review_label: DEFAULT_REVIEW_LABEL.to_string(),
            batch_size: 50,
            max_pages: 5,
            max_in_flight: 4,
            scorer_timeout: Duration::from_secs(10),
            claim_ttl: Duration::from_secs(900),
            fetch_retry: RetryPolicy::default(),
        }
    }
}

/// Messages routed per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub urgent: usize,
    pub review: usize,
    pub low: usize,
}

impl TierCounts {
    pub fn add(&mut self, tier: Tier) {
        match tier {
            Tier::Urgent => self.urgent += 1,
            Tier::Review => self.review += 1,
            Tier::Low => self.low += 1,
        }
    }

    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Urgent => self.urgent,
            Tier::Review => self.review,
            Tier::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.urgent + self.review + self.low
    }
}

/// How a single message ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Action applied and recorded.
    Committed,
    /// Action failed terminally; the claim was released.
    Failed(String),
    /// Not acted on this cycle (scorer unavailable, cancelled); released.
    Deferred(String),
    /// Decision reported only.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Absent when the message was deferred before classification finished.
    pub decision: Option<Decision>,
    pub status: OutcomeStatus,
}

impl MessageOutcome {
    fn new(message: &Message, decision: Option<Decision>, status: OutcomeStatus) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            decision,
            status,
        }
    }

    /// Listed but its content could not be fetched.
    fn unfetched(id: &str, reason: String) -> Self {
        Self {
            id: id.to_string(),
            sender: String::new(),
            subject: String::new(),
            decision: None,
            status: OutcomeStatus::Deferred(reason),
        }
    }
}

/// A selected candidate, ready for classification or already given up on.
enum Candidate {
    Ready(Message),
    Unavailable(MessageOutcome),
}

impl Candidate {
    fn id(&self) -> &str {
        match self {
            Self::Ready(message) => &message.id,
            Self::Unavailable(outcome) => &outcome.id,
        }
    }
}

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    /// Candidates examined.
    pub fetched: usize,
    pub skipped_processed: usize,
    /// Candidates another cycle had already claimed.
    pub skipped_claimed: usize,
    pub committed: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Committed (or, in dry-run, decided) messages per tier.
    pub per_tier: TierCounts,
    /// Per-message outcomes in fetch order.
    pub outcomes: Vec<MessageOutcome>,
    pub cancelled: bool,
}

impl CycleSummary {
    fn record(&mut self, outcome: MessageOutcome) {
        let tier = outcome.decision.as_ref().map(|d| d.tier);
        match &outcome.status {
            OutcomeStatus::Committed | OutcomeStatus::DryRun => {
                if matches!(outcome.status, OutcomeStatus::Committed) {
                    self.committed += 1;
                }
                if let Some(tier) = tier {
                    self.per_tier.add(tier);
                }
            }
            OutcomeStatus::Failed(_) => self.failed += 1,
            OutcomeStatus::Deferred(_) => self.deferred += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Outcomes that carry a decision routed to `tier`.
    pub fn decided(&self, tier: Tier) -> impl Iterator<Item = &MessageOutcome> {
        self.outcomes.iter().filter(move |o| {
            matches!(o.status, OutcomeStatus::Committed | OutcomeStatus::DryRun)
                && o.decision.as_ref().is_some_and(|d| d.tier == tier)
        })
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} skipped_processed={} skipped_claimed={} committed={} failed={} deferred={} \
             urgent={} review={} low={}{}",
            self.fetched,
            self.skipped_processed,
            self.skipped_claimed,
            self.committed,
            self.failed,
            self.deferred,
            self.per_tier.urgent,
            self.per_tier.review,
            self.per_tier.low,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    DryRun,
}

/// Orchestrates polling for one mailbox.
pub struct PollCycle {
    mailbox: Arc<dyn Mailbox>,
    store: Arc<dyn ProcessedStore>,
    rules: RuleSet,
    scorer: Arc<dyn Scorer>,
    classifier: Classifier,
    executor: Arc<dyn ActionExecutor>,
    config: CycleConfig,
    /// Claim owner id, unique per instance.
    owner: String,
}

impl PollCycle {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        store: Arc<dyn ProcessedStore>,
        rules: RuleSet,
        scorer: Arc<dyn Scorer>,
        classifier: Classifier,
        executor: Arc<dyn ActionExecutor>,
        config: CycleConfig,
    ) -> Self {
        Self {
            mailbox,
            store,
            rules,
            scorer,
            classifier,
            executor,
            config,
            owner: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Run one full cycle against the mailbox.
    ///
    /// Returns `Err` only for cycle-level failures (first page unreachable,
    /// store unusable). Per-message failures are reported in the summary.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleSummary, PipelineError> {
        self.release_stale_claims().await?;
        let summary = self.run(Mode::Live, cancel).await?;
        info!(
            mailbox = self.mailbox.name(),
            fetched = summary.fetched,
            committed = summary.committed,
            failed = summary.failed,
            deferred = summary.deferred,
            skipped_processed = summary.skipped_processed,
            skipped_claimed = summary.skipped_claimed,
            cancelled = summary.cancelled,
            "Poll cycle complete"
        );
        Ok(summary)
    }

    /// Fetch, filter and classify without claiming, committing or touching
    /// the mailbox. Intended actions are logged.
    pub async fn dry_run(&self, cancel: &CancellationToken) -> Result<CycleSummary, PipelineError> {
        let summary = self.run(Mode::DryRun, cancel).await?;
        info!(
            mailbox = self.mailbox.name(),
            fetched = summary.fetched,
            decided = summary.per_tier.total(),
            deferred = summary.deferred,
            "[DRY RUN] Poll cycle complete"
        );
        Ok(summary)
    }

    async fn run(&self, mode: Mode, cancel: &CancellationToken) -> Result<CycleSummary, PipelineError> {
        let mut summary = CycleSummary::default();

        // Fetch + Filter
        let mut selected = Vec::new();
        if let Err(e) = self.gather(mode, cancel, &mut summary, &mut selected).await {
            if mode == Mode::Live {
                for candidate in &selected {
                    self.release(candidate.id()).await;
                }
            }
            return Err(e);
        }
        debug!(selected = selected.len(), "Candidates selected");

        // Classify
        let mut classified = Vec::with_capacity(selected.len());
        let mut early = Vec::new();
        for (index, candidate) in selected.into_iter().enumerate() {
            let message = match candidate {
                Candidate::Ready(message) => message,
                Candidate::Unavailable(outcome) => {
                    early.push((index, outcome));
                    continue;
                }
            };
            match self.decide(&message).await {
                Ok(decision) => classified.push((index, message, decision)),
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Scorer failed, deferring message");
                    if mode == Mode::Live {
                        self.release(&message.id).await;
                    }
                    let outcome =
                        MessageOutcome::new(&message, None, OutcomeStatus::Deferred(e.to_string()));
                    early.push((index, outcome));
                }
            }
        }

        // Act + Finalize
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut outcomes: Vec<(usize, MessageOutcome)> = futures::stream::iter(classified)
            .map(|(index, message, decision)| async move {
                let outcome = match mode {
                    Mode::Live => self.act(message, decision, cancel).await,
                    Mode::DryRun => Self::report(message, decision, cancel).await,
                };
                (index, outcome)
            })
            .buffer_unordered(max_in_flight)
            .collect()
            .await;
        outcomes.extend(early);
        outcomes.sort_by_key(|(index, _)| *index);

        for (_, outcome) in outcomes {
            summary.record(outcome);
        }
        if cancel.is_cancelled() {
            summary.cancelled = true;
        }
        Ok(summary)
    }

    /// Page through candidate ids until `batch_size` eligible messages are
    /// selected, pages run out, or the cycle is cancelled. Only unprocessed
    /// ids are fetched. In live mode each selected message is claimed by this
    /// cycle before it is fetched.
    async fn gather(
        &self,
        mode: Mode,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
        selected: &mut Vec<Candidate>,
    ) -> Result<(), PipelineError> {
        let batch_size = self.config.batch_size.max(1);
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        for page_no in 0..self.config.max_pages.max(1) {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }

            let page = match self.fetch_page(cursor.as_deref(), batch_size, cancel).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    summary.cancelled = true;
                    return Ok(());
                }
                // Later pages are best-effort: act on what was already claimed.
                Err(e) if page_no > 0 => {
                    warn!(page = page_no, error = %e, "Candidate fetch failed, continuing with partial batch");
                    return Ok(());
                }
                Err(e) => return Err(PipelineError::Fetch(e)),
            };

            for id in page.ids {
                if selected.len() >= batch_size {
                    return Ok(());
                }
                if !seen.insert(id.clone()) {
                    continue;
                }
                summary.fetched += 1;

                if self.store.is_processed(&id).await? {
                    summary.skipped_processed += 1;
                    continue;
                }
                if mode == Mode::Live {
                    if cancel.is_cancelled() {
                        summary.cancelled = true;
                        return Ok(());
                    }
                    if !self.store.claim(&id, &self.owner).await? {
                        debug!(id = %id, "Message claimed elsewhere, skipping");
                        summary.skipped_claimed += 1;
                        continue;
                    }
                }

                match self.fetch_message(&id, cancel).await {
                    Ok(Some(message)) => selected.push(Candidate::Ready(message)),
                    Ok(None) => {
                        if mode == Mode::Live {
                            self.release(&id).await;
                        }
                    }
                    Err(ExecutionError::Cancelled) => {
                        if mode == Mode::Live {
                            self.release(&id).await;
                        }
                        summary.cancelled = true;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(id = %id, error = %e, "Message fetch failed, deferring");
                        if mode == Mode::Live {
                            self.release(&id).await;
                        }
                        selected.push(Candidate::Unavailable(MessageOutcome::unfetched(
                            &id,
                            e.to_string(),
                        )));
                    }
                }
            }

            match page.next_cursor {
                Some(next) if selected.len() < batch_size => cursor = Some(next),
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    /// `Ok(None)` when cancelled during backoff.
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<CandidatePage>, MailboxError> {
        let result = self
            .config
            .fetch_retry
            .run("list_candidates", cancel, || {
                self.mailbox.list_candidates(cursor, limit)
            })
            .await;
        match result {
            Ok(page) => Ok(Some(page)),
            Err(ExecutionError::Cancelled) => Ok(None),
            Err(ExecutionError::Exhausted { last, .. }) => Err(last),
            Err(ExecutionError::Permanent(e)) => Err(e),
            Err(ExecutionError::TimedOut { after }) => Err(MailboxError::Transient {
                reason: format!("candidate fetch timed out after {after:?}"),
                retry_after: None,
            }),
        }
    }

    /// `Ok(None)` when the message vanished or cannot be parsed.
    async fn fetch_message(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, ExecutionError> {
        let result = self
            .config
            .fetch_retry
            .run("fetch_message", cancel, || self.mailbox.fetch_message(id))
            .await;
        match result {
            Ok(None) => {
                warn!(id, "Skipping unparseable message");
                Ok(None)
            }
            Err(ExecutionError::Permanent(MailboxError::NotFound { .. })) => {
                debug!(id, "Message vanished before fetch");
                Ok(None)
            }
            other => other,
        }
    }

    /// Rule first; the scorer is consulted only when no rule matches.
    async fn decide(&self, message: &Message) -> Result<Decision, ScorerError> {
        if let Some(forced) = self.rules.evaluate(message) {
            let tier = self
                .classifier
                .classify(message, Score::new(0.0, 0.0), Some(forced));
            return Ok(Decision {
                message_id: message.id.clone(),
                tier,
                action: tier.action(&self.config.review_label),
                source: DecisionSource::Rule,
                score: None,
            });
        }

        let score = tokio::time::timeout(self.config.scorer_timeout, self.scorer.score(message))
            .await
            .map_err(|_| ScorerError::ModelUnavailable {
                reason: format!(
                    "{} did not answer within {:?}",
                    self.scorer.name(),
                    self.config.scorer_timeout
                ),
            })??;
        if !score.is_valid() {
            return Err(ScorerError::InvalidScore {
                importance: score.importance,
                urgency: score.urgency,
            });
        }

        let tier = self.classifier.classify(message, score, None);
        debug!(
            id = %message.id,
            importance = score.importance,
            urgency = score.urgency,
            tier = %tier,
            "Message scored"
        );
        Ok(Decision {
            message_id: message.id.clone(),
            tier,
            action: tier.action(&self.config.review_label),
            source: DecisionSource::Model,
            score: Some(score),
        })
    }

    async fn act(
        &self,
        message: Message,
        decision: Decision,
        cancel: &CancellationToken,
    ) -> MessageOutcome {
        if cancel.is_cancelled() {
            self.release(&message.id).await;
            return MessageOutcome::new(
                &message,
                Some(decision),
                OutcomeStatus::Deferred(ExecutionError::Cancelled.to_string()),
            );
        }

        // Claims wait in the action queue; refresh before acting.
        match self.store.touch(&message.id, &self.owner).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(id = %message.id, "Claim lost before acting, skipping");
                return MessageOutcome::new(
                    &message,
                    Some(decision),
                    OutcomeStatus::Deferred("claim lost".into()),
                );
            }
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to refresh claim");
                self.release(&message.id).await;
                return MessageOutcome::new(
                    &message,
                    Some(decision),
                    OutcomeStatus::Deferred(format!("claim refresh failed: {e}")),
                );
            }
        }

        match self.executor.execute(&message, &decision.action, cancel).await {
            Ok(_) => match self.commit(&decision).await {
                Ok(()) => {
                    info!(
                        id = %message.id,
                        tier = %decision.tier,
                        action = %decision.action,
                        source = decision.source.label(),
                        "Message triaged"
                    );
                    MessageOutcome::new(&message, Some(decision), OutcomeStatus::Committed)
                }
                Err(e) => {
                    error!(id = %message.id, error = %e, "Action applied but commit failed");
                    self.release(&message.id).await;
                    MessageOutcome::new(
                        &message,
                        Some(decision),
                        OutcomeStatus::Failed(format!("commit failed: {e}")),
                    )
                }
            },
            Err(ExecutionError::Cancelled) => {
                self.release(&message.id).await;
                MessageOutcome::new(
                    &message,
                    Some(decision),
                    OutcomeStatus::Deferred(ExecutionError::Cancelled.to_string()),
                )
            }
            Err(e) => {
                error!(id = %message.id, action = %decision.action, error = %e, "Action failed, releasing claim");
                self.release(&message.id).await;
                MessageOutcome::new(&message, Some(decision), OutcomeStatus::Failed(e.to_string()))
            }
        }
    }

    async fn report(message: Message, decision: Decision, cancel: &CancellationToken) -> MessageOutcome {
        // The dry-run executor cannot fail.
        let _ = DryRunExecutor
            .execute(&message, &decision.action, cancel)
            .await;
        MessageOutcome::new(&message, Some(decision), OutcomeStatus::DryRun)
    }

    async fn commit(&self, decision: &Decision) -> Result<(), DatabaseError> {
        let record = ProcessedRecord {
            message_id: decision.message_id.clone(),
            tier: decision.tier,
            action: decision.action.clone(),
            source: decision.source,
            processed_at: Utc::now(),
        };
        self.store.commit(&record, &self.owner).await
    }

    async fn release(&self, message_id: &str) {
        if let Err(e) = self.store.release(message_id, &self.owner).await {
            // The claim expires after `claim_ttl` and is recovered then.
            error!(id = %message_id, error = %e, "Failed to release claim");
        }
    }

    async fn release_stale_claims(&self) -> Result<(), PipelineError> {
        let cutoff = TimeDelta::from_std(self.config.claim_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        if let Some(cutoff) = cutoff {
            self.store.release_stale(cutoff).await?;
        }
        Ok(())
    }
}
