use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

use inbox_triage::config::TriageConfig;
use inbox_triage::digest::export_digest;
use inbox_triage::mailbox::{GmailConfig, GmailMailbox, Mailbox};
use inbox_triage::pipeline::scorer::Lexicon;
use inbox_triage::pipeline::{
    Classifier, CycleSummary, LexiconScorer, MailboxExecutor, OutcomeStatus, PollCycle, RuleSet,
    run_daemon,
};
use inbox_triage::store::{LibSqlBackend, ProcessedStore};

/// Rule- and score-driven inbox triage.
#[derive(Parser, Debug)]
#[clap(name = "inbox-triage", version)]
struct Cli {
    /// TOML rule file (overrides TRIAGE_RULES_PATH)
    #[clap(long, global = true, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Processed-message database (overrides TRIAGE_DB_PATH)
    #[clap(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Daemon polling interval in seconds (overrides TRIAGE_POLL_INTERVAL_SECS)
    #[clap(long, global = true, value_name = "SECS")]
    interval: Option<u64>,

    /// Urgency threshold in [0, 1]
    #[clap(long, global = true)]
    t_urgent: Option<f32>,

    /// Importance threshold in [0, 1]
    #[clap(long, global = true)]
    t_important: Option<f32>,

    /// Label applied to Review-tier messages
    #[clap(long, global = true)]
    review_label: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single poll cycle
    Once {
        /// Write a Markdown digest of the cycle into this directory
        #[clap(long, value_name = "DIR")]
        digest_dir: Option<PathBuf>,
    },
    /// Poll on an interval until Ctrl-C
    Daemon,
    /// Classify without claiming or touching the mailbox
    DryRun {
        /// Write a Markdown digest of the decisions into this directory
        #[clap(long, value_name = "DIR")]
        digest_dir: Option<PathBuf>,
    },
    /// List mailbox labels
    Labels,
    /// Show recently processed messages
    History {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = TriageConfig::from_env().context("Invalid configuration")?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    let _log_guard = init_tracing(&config)?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    let store = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    if let Command::History { limit } = cli.command {
        return print_history(store.as_ref(), limit).await;
    }

    let Some(gmail_config) = GmailConfig::from_env() else {
        bail!("GMAIL_ACCESS_TOKEN not set\n  export GMAIL_ACCESS_TOKEN=ya29...");
    };
    let mailbox: Arc<dyn Mailbox> = Arc::new(GmailMailbox::new(gmail_config)?);
    // Authentication failures abort before any claim is made.
    mailbox
        .verify()
        .await
        .context("Mailbox verification failed")?;

    if let Command::Labels = cli.command {
        let mut labels = mailbox.list_labels().await?;
        labels.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        for label in labels {
            println!("{}\t{}", label.name, label.id);
        }
        return Ok(());
    }

    let rules = match &config.rules_path {
        Some(path) => RuleSet::load(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        None => RuleSet::empty(),
    };
    eprintln!("   Rules: {}", rules.len());
    eprintln!(
        "   Thresholds: urgent≥{} important≥{}",
        config.thresholds.urgent, config.thresholds.important
    );

    let executor = Arc::new(MailboxExecutor::new(
        Arc::clone(&mailbox),
        config.retry.clone(),
        config.action_timeout,
    ));
    let cycle = PollCycle::new(
        mailbox,
        store,
        rules,
        Arc::new(LexiconScorer::new(Lexicon::default())),
        Classifier::new(config.thresholds),
        executor,
        config.cycle_config(),
    );

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    match cli.command {
        Command::Once { digest_dir } => {
            let summary = cycle.run_once(&shutdown).await?;
            print_summary(&summary);
            write_digest(&summary, digest_dir)?;
        }
        Command::DryRun { digest_dir } => {
            let summary = cycle.dry_run(&shutdown).await?;
            print_summary(&summary);
            write_digest(&summary, digest_dir)?;
        }
        Command::Daemon => {
            eprintln!(
                "   Polling every {}s. Ctrl-C to stop.\n",
                config.poll_interval.as_secs()
            );
            run_daemon(Arc::new(cycle), config.poll_interval, shutdown).await;
        }
        Command::Labels | Command::History { .. } => {}
    }

    Ok(())
}

fn apply_overrides(config: &mut TriageConfig, cli: &Cli) {
    if let Some(rules) = &cli.rules {
        config.rules_path = Some(rules.clone());
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(secs) = cli.interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(t) = cli.t_urgent {
        config.thresholds.urgent = t;
    }
    if let Some(t) = cli.t_important {
        config.thresholds.important = t;
    }
    if let Some(label) = &cli.review_label {
        config.review_label = label.clone();
    }
}

/// Stderr logging, plus a daily rolling file when `TRIAGE_LOG_DIR` is set.
fn init_tracing(
    config: &TriageConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "inbox-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, letting in-flight actions finish");
            token.cancel();
        }
    });
}

fn print_summary(summary: &CycleSummary) {
    for outcome in &summary.outcomes {
        let decision = outcome
            .decision
            .as_ref()
            .map(|d| format!("{} → {} ({})", d.tier, d.action, d.source.label()))
            .unwrap_or_else(|| "undecided".to_string());
        let status = match &outcome.status {
            OutcomeStatus::Committed => "done".to_string(),
            OutcomeStatus::DryRun => "dry-run".to_string(),
            OutcomeStatus::Failed(reason) => format!("failed: {reason}"),
            OutcomeStatus::Deferred(reason) => format!("deferred: {reason}"),
        };
        println!(
            "{:<8} {:<40} {:<30} {}  [{}]",
            outcome.id.chars().take(8).collect::<String>(),
            outcome.subject.chars().take(40).collect::<String>(),
            outcome.sender.chars().take(30).collect::<String>(),
            decision,
            status
        );
    }
    println!("{summary}");
}

fn write_digest(summary: &CycleSummary, dir: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(dir) = dir {
        let today = chrono::Local::now().date_naive();
        if let Some(path) = export_digest(summary, &dir, today)? {
            eprintln!("✓ Digest written to {}", path.display());
        }
    }
    Ok(())
}

async fn print_history(store: &dyn ProcessedStore, limit: usize) -> anyhow::Result<()> {
    let records = store.recent_records(limit).await?;
    if records.is_empty() {
        println!("No processed messages yet.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<7} {:<28} {:<6} {}",
            record.processed_at.format("%Y-%m-%d %H:%M:%S"),
            record.tier,
            record.action,
            record.source.label(),
            record.message_id
        );
    }
    Ok(())
}
