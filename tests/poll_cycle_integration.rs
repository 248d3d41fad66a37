//! End-to-end tests for the poll cycle.
//!
//! Each test wires a real `LibSqlBackend` (in memory or on disk) to an
//! in-process fake mailbox and a fixed scorer, and drives full cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use inbox_triage::error::{MailboxError, ScorerError};
use inbox_triage::mailbox::{ApplyOutcome, CandidatePage, Mailbox};
use inbox_triage::pipeline::types::{Action, DecisionSource, Message, Score, Tier};
use inbox_triage::pipeline::{
    Classifier, CycleConfig, DryRunExecutor, MailboxExecutor, OutcomeStatus, PollCycle,
    RetryPolicy, RuleSet, Scorer, Thresholds,
};
use inbox_triage::store::{ClaimState, LibSqlBackend, ProcessedStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How the fake mailbox answers `apply_action` for a given id.
#[derive(Clone)]
enum Behaviour {
    /// Fail with a transient error this many times, then succeed.
    FlakyTimes(u32),
    /// Message deleted before the action ran.
    Gone,
    /// Content download fails permanently.
    Unreadable,
}

/// In-memory mailbox. Candidate ids are served in insertion order, `limit`
/// per page, with the offset as cursor.
#[derive(Default)]
struct FakeMailbox {
    messages: Vec<Message>,
    behaviour: Mutex<HashMap<String, Behaviour>>,
    /// Successful mutations in call order.
    applied: Mutex<Vec<(String, Action)>>,
    /// Per-call delay for `apply_action`.
    delay: Duration,
    /// Ids passed to `fetch_message`, in call order.
    fetched: Mutex<Vec<String>>,
}

impl FakeMailbox {
    fn with(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    fn behave(self, id: &str, behaviour: Behaviour) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .insert(id.to_string(), behaviour);
        self
    }

    fn applied(&self) -> Vec<(String, Action)> {
        self.applied.lock().unwrap().clone()
    }

    fn applied_to(&self, id: &str) -> usize {
        self.applied().iter().filter(|(m, _)| m == id).count()
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_candidates(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<CandidatePage, MailboxError> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + limit).min(self.messages.len());
        let ids = self
            .messages
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let next_cursor = (end < self.messages.len()).then(|| end.to_string());
        Ok(CandidatePage { ids, next_cursor })
    }

    async fn fetch_message(&self, id: &str) -> Result<Option<Message>, MailboxError> {
        self.fetched.lock().unwrap().push(id.to_string());
        if matches!(
            self.behaviour.lock().unwrap().get(id),
            Some(Behaviour::Unreadable)
        ) {
            return Err(MailboxError::Permanent {
                reason: "malformed payload".into(),
            });
        }
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .map(Some)
            .ok_or_else(|| MailboxError::NotFound { id: id.to_string() })
    }

    async fn apply_action(
        &self,
        message_id: &str,
        action: &Action,
    ) -> Result<ApplyOutcome, MailboxError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        {
            let mut behaviour = self.behaviour.lock().unwrap();
            match behaviour.get_mut(message_id) {
                Some(Behaviour::Gone) => {
                    return Err(MailboxError::NotFound {
                        id: message_id.to_string(),
                    });
                }
                Some(Behaviour::FlakyTimes(n)) if *n > 0 => {
                    *n -= 1;
                    return Err(MailboxError::Transient {
                        reason: "rate limited".into(),
                        retry_after: None,
                    });
                }
                _ => {}
            }
        }
        self.applied
            .lock()
            .unwrap()
            .push((message_id.to_string(), action.clone()));
        Ok(ApplyOutcome::Applied)
    }
}

/// Scores by message id; unknown ids get `default`.
struct TableScorer {
    scores: HashMap<String, Score>,
    default: Result<Score, ScorerError>,
}

impl TableScorer {
    fn constant(score: Score) -> Self {
        Self {
            scores: HashMap::new(),
            default: Ok(score),
        }
    }

    fn with(mut self, id: &str, score: Score) -> Self {
        self.scores.insert(id.to_string(), score);
        self
    }
}

#[async_trait]
impl Scorer for TableScorer {
    fn name(&self) -> &str {
        "table"
    }

    async fn score(&self, message: &Message) -> Result<Score, ScorerError> {
        match self.scores.get(&message.id) {
            Some(score) => Ok(*score),
            None => self.default.clone(),
        }
    }
}

fn message(id: &str, sender: &str, subject: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        body_excerpt: String::new(),
        received_at: Utc::now(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
    }
}

fn thresholds() -> Thresholds {
    Thresholds::new(0.8, 0.6).unwrap()
}

fn build_cycle(
    mailbox: Arc<FakeMailbox>,
    store: Arc<dyn ProcessedStore>,
    rules: RuleSet,
    scorer: TableScorer,
    config: CycleConfig,
) -> PollCycle {
    let executor = Arc::new(MailboxExecutor::new(
        mailbox.clone(),
        fast_retry(),
        Duration::from_secs(5),
    ));
    PollCycle::new(
        mailbox,
        store,
        rules,
        Arc::new(scorer),
        Classifier::new(thresholds()),
        executor,
        config,
    )
}

async fn memory_store() -> Arc<LibSqlBackend> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn blacklisted_domain_is_archived_despite_high_score() {
    let rules = RuleSet::from_toml_str(
        r#"
        [[rules]]
        pattern = "ads.example"
        field = "domain"
        match_type = "blacklist"
        tier = "low"
        "#,
    )
    .unwrap();
    let mailbox = Arc::new(FakeMailbox::with(vec![message(
        "M1",
        "newsletter@ads.example",
        "URGENT: action required today",
    )]));
    let store = memory_store().await;
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        rules,
        TableScorer::constant(Score::new(0.9, 0.9)),
        CycleConfig::default(),
    );

    let summary = timeout(TEST_TIMEOUT, cycle.run_once(&CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.committed, 1);
    assert_eq!(summary.per_tier.low, 1);
    let decision = summary.outcomes[0].decision.as_ref().unwrap();
    assert_eq!(decision.tier, Tier::Low);
    assert_eq!(decision.action, Action::Archive);
    assert_eq!(decision.source, DecisionSource::Rule);
    assert_eq!(mailbox.applied(), vec![("M1".to_string(), Action::Archive)]);

    let record = store.get_record("M1").await.unwrap().unwrap();
    assert_eq!(record.tier, Tier::Low);
    assert_eq!(record.action, Action::Archive);
}

#[tokio::test]
async fn urgency_alone_stars_the_message() {
    let mailbox = Arc::new(FakeMailbox::with(vec![message(
        "M2",
        "ops@company.example",
        "Build broken",
    )]));
    let cycle = build_cycle(
        mailbox.clone(),
        memory_store().await,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.2, 0.85)),
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.per_tier.urgent, 1);
    let decision = summary.outcomes[0].decision.as_ref().unwrap();
    assert_eq!(decision.tier, Tier::Urgent);
    assert_eq!(decision.source, DecisionSource::Model);
    assert_eq!(mailbox.applied(), vec![("M2".to_string(), Action::Star)]);
}

#[tokio::test]
async fn importance_alone_labels_for_review() {
    let mailbox = Arc::new(FakeMailbox::with(vec![message(
        "M3",
        "legal@company.example",
        "Contract draft",
    )]));
    let cycle = build_cycle(
        mailbox.clone(),
        memory_store().await,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.7, 0.1)),
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.per_tier.review, 1);
    assert_eq!(
        mailbox.applied(),
        vec![(
            "M3".to_string(),
            Action::Label("@Action/Review".to_string())
        )]
    );
}

#[tokio::test]
async fn custom_review_label_is_used() {
    let mailbox = Arc::new(FakeMailbox::with(vec![message("m", "a@b.example", "s")]));
    let config = CycleConfig {
        review_label: "Triage/Later".to_string(),
        ..CycleConfig::default()
    };
    let cycle = build_cycle(
        mailbox.clone(),
        memory_store().await,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.65, 0.0)),
        config,
    );

    cycle.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        mailbox.applied()[0].1,
        Action::Label("Triage/Later".to_string())
    );
}

// ── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_over_same_batch_acts_on_nothing() {
    let messages: Vec<Message> = (0..5)
        .map(|i| message(&format!("id{i}"), "x@y.example", "hello"))
        .collect();
    let mailbox = Arc::new(FakeMailbox::with(messages));
    let cycle = build_cycle(
        mailbox.clone(),
        memory_store().await,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    );
    let cancel = CancellationToken::new();

    let first = cycle.run_once(&cancel).await.unwrap();
    let second = cycle.run_once(&cancel).await.unwrap();

    assert_eq!(first.committed, 5);
    assert_eq!(second.committed, 0);
    assert_eq!(second.skipped_processed, 5);
    assert!(second.outcomes.is_empty());
    assert_eq!(mailbox.applied().len(), 5);
    // Processed messages are listed again but never downloaded again.
    assert_eq!(mailbox.fetched().len(), 5);
}

#[tokio::test]
async fn unreadable_message_is_deferred_and_released() {
    let messages = vec![
        message("ok1", "x@y.example", "hello"),
        message("bad", "x@y.example", "hello"),
        message("ok2", "x@y.example", "hello"),
    ];
    let mailbox = Arc::new(FakeMailbox::with(messages).behave("bad", Behaviour::Unreadable));
    let store = memory_store().await;
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.committed, 2);
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.outcomes[1].id, "bad");
    assert!(matches!(summary.outcomes[1].status, OutcomeStatus::Deferred(_)));
    assert_eq!(store.state("bad").await.unwrap(), ClaimState::Unseen);
    assert_eq!(mailbox.applied_to("bad"), 0);
}

#[tokio::test]
async fn one_terminal_failure_does_not_abort_the_batch() {
    let messages: Vec<Message> = (0..6)
        .map(|i| message(&format!("id{i}"), "x@y.example", "hello"))
        .collect();
    let mailbox = Arc::new(FakeMailbox::with(messages).behave("id3", Behaviour::Gone));
    let store = memory_store().await;
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.9)),
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.committed, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(store.state("id3").await.unwrap(), ClaimState::Unseen);
    let failed: Vec<_> = summary
        .outcomes
        .iter()
        .filter(|o| matches!(o.status, OutcomeStatus::Failed(_)))
        .map(|o| o.id.as_str())
        .collect();
    assert_eq!(failed, vec!["id3"]);
    for i in [0, 1, 2, 4, 5] {
        assert_eq!(
            store.state(&format!("id{i}")).await.unwrap(),
            ClaimState::Committed
        );
    }
}

#[tokio::test]
async fn released_message_is_retried_next_cycle() {
    let mailbox = Arc::new(
        FakeMailbox::with(vec![message("retry-me", "x@y.example", "s")])
            // Outlasts one cycle's attempt budget (3), not two.
            .behave("retry-me", Behaviour::FlakyTimes(4)),
    );
    let store = memory_store().await;
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    );
    let cancel = CancellationToken::new();

    let first = cycle.run_once(&cancel).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(store.state("retry-me").await.unwrap(), ClaimState::Unseen);

    let second = cycle.run_once(&cancel).await.unwrap();
    assert_eq!(second.committed, 1);
    assert_eq!(mailbox.applied_to("retry-me"), 1);
}

#[tokio::test]
async fn transient_failures_within_budget_still_commit() {
    let mailbox = Arc::new(
        FakeMailbox::with(vec![message("flaky", "x@y.example", "s")])
            .behave("flaky", Behaviour::FlakyTimes(2)),
    );
    let cycle = build_cycle(
        mailbox.clone(),
        memory_store().await,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn concurrent_cycles_act_on_each_message_once() {
    let messages: Vec<Message> = (0..20)
        .map(|i| message(&format!("id{i}"), "x@y.example", "hello"))
        .collect();
    let mut fake = FakeMailbox::with(messages);
    fake.delay = Duration::from_millis(2);
    let mailbox = Arc::new(fake);
    let store: Arc<dyn ProcessedStore> = memory_store().await;

    let a = Arc::new(build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    ));
    let b = Arc::new(build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    ));
    assert_ne!(a.owner(), b.owner());

    let cancel = CancellationToken::new();
    let (ra, rb) = tokio::join!(a.run_once(&cancel), b.run_once(&cancel));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.committed + rb.committed, 20);
    for i in 0..20 {
        assert_eq!(mailbox.applied_to(&format!("id{i}")), 1);
    }
}

#[tokio::test]
async fn queued_claims_outlive_ttl_without_double_action() {
    // One action at a time, each slower than half the TTL: the last claim
    // sits in the queue longer than `claim_ttl` before its action starts.
    let messages = vec![
        message("a", "x@y.example", "hello"),
        message("b", "x@y.example", "hello"),
        message("c", "x@y.example", "hello"),
    ];
    let mut fake = FakeMailbox::with(messages);
    fake.delay = Duration::from_millis(80);
    let mailbox = Arc::new(fake);
    let store: Arc<dyn ProcessedStore> = memory_store().await;
    let config = CycleConfig {
        max_in_flight: 1,
        claim_ttl: Duration::from_millis(150),
        ..CycleConfig::default()
    };

    let first = Arc::new(build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        config.clone(),
    ));
    let second = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        config,
    );

    let cancel = CancellationToken::new();
    let background = {
        let first = first.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { first.run_once(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(170)).await;
    let rb = timeout(TEST_TIMEOUT, second.run_once(&cancel))
        .await
        .unwrap()
        .unwrap();
    let ra = timeout(TEST_TIMEOUT, background)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(ra.committed + rb.committed, 3);
    for id in ["a", "b", "c"] {
        assert_eq!(mailbox.applied_to(id), 1, "{id} acted on more than once");
        assert_eq!(store.state(id).await.unwrap(), ClaimState::Committed);
    }
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let store = memory_store().await;
    let mut handles = Vec::new();
    for n in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim("shared", &format!("owner-{n}")).await.unwrap()
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn processed_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state").join("processed.db");
    let mailbox = Arc::new(FakeMailbox::with(vec![
        message("a", "x@y.example", "s"),
        message("b", "x@y.example", "s"),
    ]));

    {
        let store = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
        let cycle = build_cycle(
            mailbox.clone(),
            store,
            RuleSet::empty(),
            TableScorer::constant(Score::new(0.0, 0.0)),
            CycleConfig::default(),
        );
        let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.committed, 2);
    }

    let store = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
    let cycle = build_cycle(
        mailbox.clone(),
        store,
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        CycleConfig::default(),
    );
    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.skipped_processed, 2);
    assert_eq!(mailbox.applied().len(), 2);
}

#[tokio::test]
async fn scorer_outage_defers_without_failing() {
    let mailbox = Arc::new(FakeMailbox::with(vec![
        message("ruled", "boss@company.example", "s"),
        message("scored", "x@y.example", "s"),
    ]));
    let rules = RuleSet::from_toml_str(r#"whitelist = ["boss@company.example"]"#).unwrap();
    let scorer = TableScorer {
        scores: HashMap::new(),
        default: Err(ScorerError::ModelUnavailable {
            reason: "model offline".into(),
        }),
    };
    let store = memory_store().await;
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        rules,
        scorer,
        CycleConfig::default(),
    );

    let summary = cycle.run_once(&CancellationToken::new()).await.unwrap();

    // Rule matches never consult the scorer.
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.per_tier.urgent, 1);
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(store.state("scored").await.unwrap(), ClaimState::Unseen);
    assert_eq!(mailbox.applied(), vec![("ruled".to_string(), Action::Star)]);
}

#[tokio::test]
async fn dry_run_reports_without_mutating() {
    let mailbox = Arc::new(FakeMailbox::with(vec![
        message("u", "x@y.example", "s"),
        message("r", "x@y.example", "s"),
        message("l", "x@y.example", "s"),
    ]));
    let store = memory_store().await;
    let scorer = TableScorer::constant(Score::new(0.0, 0.0))
        .with("u", Score::new(0.2, 0.85))
        .with("r", Score::new(0.7, 0.1));
    let cycle = PollCycle::new(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        Arc::new(scorer),
        Classifier::new(thresholds()),
        Arc::new(DryRunExecutor),
        CycleConfig::default(),
    );

    let summary = cycle.dry_run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.per_tier.urgent, 1);
    assert_eq!(summary.per_tier.review, 1);
    assert_eq!(summary.per_tier.low, 1);
    assert_eq!(summary.committed, 0);
    assert!(
        summary
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::DryRun)
    );
    assert!(mailbox.applied().is_empty());
    for id in ["u", "r", "l"] {
        assert_eq!(store.state(id).await.unwrap(), ClaimState::Unseen);
    }
}

#[tokio::test]
async fn cancellation_mid_cycle_leaves_no_dangling_claims() {
    let messages: Vec<Message> = (0..12)
        .map(|i| message(&format!("id{i}"), "x@y.example", "hello"))
        .collect();
    let mut fake = FakeMailbox::with(messages);
    fake.delay = Duration::from_millis(30);
    let mailbox = Arc::new(fake);
    let store = memory_store().await;
    let config = CycleConfig {
        max_in_flight: 2,
        ..CycleConfig::default()
    };
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        config,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = timeout(TEST_TIMEOUT, cycle.run_once(&cancel))
        .await
        .unwrap()
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.committed < 12);
    assert!(summary.deferred > 0);
    for i in 0..12 {
        let state = store.state(&format!("id{i}")).await.unwrap();
        assert_ne!(state, ClaimState::Claimed, "id{i} left claimed");
    }
}

#[tokio::test]
async fn batch_spans_pages_past_processed_messages() {
    // Starred and labelled messages stay in the inbox, so earlier pages can
    // be entirely processed on later cycles.
    let messages: Vec<Message> = (0..6)
        .map(|i| message(&format!("id{i}"), "x@y.example", "hello"))
        .collect();
    let mailbox = Arc::new(FakeMailbox::with(messages));
    let store = memory_store().await;
    let config = CycleConfig {
        batch_size: 2,
        ..CycleConfig::default()
    };
    let cycle = build_cycle(
        mailbox.clone(),
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.9)),
        config,
    );
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let summary = cycle.run_once(&cancel).await.unwrap();
        assert_eq!(summary.committed, 2);
    }
    assert_eq!(mailbox.applied().len(), 6);
    let last = cycle.run_once(&cancel).await.unwrap();
    assert_eq!(last.committed, 0);
}

#[tokio::test]
async fn history_lists_newest_first() {
    let mailbox = Arc::new(FakeMailbox::with(vec![
        message("first", "x@y.example", "s"),
        message("second", "x@y.example", "s"),
    ]));
    let store = memory_store().await;
    let config = CycleConfig {
        max_in_flight: 1,
        ..CycleConfig::default()
    };
    let cycle = build_cycle(
        mailbox,
        store.clone(),
        RuleSet::empty(),
        TableScorer::constant(Score::new(0.0, 0.0)),
        config,
    );
    cycle.run_once(&CancellationToken::new()).await.unwrap();

    let records = store.recent_records(10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].processed_at >= records[1].processed_at);
}
