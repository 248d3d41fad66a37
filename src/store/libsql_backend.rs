//! libSQL backend for `ProcessedStore`.
//!
//! Claims are rows in `processed_messages`; the primary key on
//! `message_id` makes `claim` a single atomic insert-if-absent. Supports
//! local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{Action, DecisionSource, Tier};
use crate::store::migrations;
use crate::store::traits::{ClaimState, ProcessedRecord, ProcessedStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Processed store opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width and `Z` suffix so that string
/// comparison in SQL orders chronologically.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn source_to_str(source: DecisionSource) -> &'static str {
    source.label()
}

fn str_to_source(s: &str) -> Option<DecisionSource> {
    match s {
        "rule" => Some(DecisionSource::Rule),
        "model" => Some(DecisionSource::Model),
        _ => None,
    }
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const RECORD_COLUMNS: &str = "message_id, tier, action, label, source, committed_at";

/// Map a committed row to a ProcessedRecord.
///
/// Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<ProcessedRecord, DatabaseError> {
    let bad_row = |what: &str| DatabaseError::Query(format!("corrupt processed row: {what}"));

    let message_id: String = row.get(0).map_err(|e| bad_row(&e.to_string()))?;
    let tier_str: String = row.get(1).map_err(|e| bad_row(&e.to_string()))?;
    let action_str: String = row.get(2).map_err(|e| bad_row(&e.to_string()))?;
    let label: Option<String> = row.get(3).ok();
    let source_str: String = row.get(4).map_err(|e| bad_row(&e.to_string()))?;
    let committed_str: String = row.get(5).map_err(|e| bad_row(&e.to_string()))?;

    Ok(ProcessedRecord {
        tier: tier_str.parse::<Tier>().map_err(|e| bad_row(&e))?,
        action: Action::from_parts(&action_str, label).ok_or_else(|| bad_row(&action_str))?,
        source: str_to_source(&source_str).ok_or_else(|| bad_row(&source_str))?,
        processed_at: parse_datetime(&committed_str),
        message_id,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ProcessedStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn state(&self, message_id: &str) -> Result<ClaimState, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("state: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let state: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("state row parse: {e}")))?;
                Ok(match state.as_str() {
                    "committed" => ClaimState::Committed,
                    _ => ClaimState::Claimed,
                })
            }
            Ok(None) => Ok(ClaimState::Unseen),
            Err(e) => Err(DatabaseError::Query(format!("state: {e}"))),
        }
    }

    async fn claim(&self, message_id: &str, owner: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "INSERT INTO processed_messages (message_id, state, claim_owner, claimed_at)
                 VALUES (?1, 'claimed', ?2, ?3)
                 ON CONFLICT(message_id) DO NOTHING",
                params![message_id, owner, format_datetime(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim: {e}")))?;

        let claimed = changed == 1;
        debug!(id = message_id, owner, claimed, "Claim attempted");
        Ok(claimed)
    }

    async fn touch(&self, message_id: &str, owner: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE processed_messages SET claimed_at = ?3
                 WHERE message_id = ?1 AND state = 'claimed' AND claim_owner = ?2",
                params![message_id, owner, format_datetime(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch: {e}")))?;

        let held = changed == 1;
        if !held {
            debug!(id = message_id, owner, "Claim no longer held");
        }
        Ok(held)
    }

    async fn commit(&self, record: &ProcessedRecord, owner: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE processed_messages
                 SET state = 'committed', claim_owner = NULL,
                     tier = ?2, action = ?3, label = ?4, source = ?5, committed_at = ?6
                 WHERE message_id = ?1 AND state = 'claimed' AND claim_owner = ?7",
                params![
                    record.message_id.as_str(),
                    record.tier.label(),
                    record.action.kind(),
                    opt_text(record.action.label_name()),
                    source_to_str(record.source),
                    format_datetime(record.processed_at),
                    owner,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("commit: {e}")))?;

        if changed == 1 {
            debug!(id = %record.message_id, tier = record.tier.label(), "Message committed");
            return Ok(());
        }

        match self.state(&record.message_id).await? {
            ClaimState::Committed => {
                debug!(id = %record.message_id, "Commit of already-committed message ignored");
                Ok(())
            }
            _ => Err(DatabaseError::Constraint(format!(
                "commit of message {} without a claim held by {owner}",
                record.message_id
            ))),
        }
    }

    async fn release(&self, message_id: &str, owner: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM processed_messages
                 WHERE message_id = ?1 AND state = 'claimed' AND claim_owner = ?2",
                params![message_id, owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release: {e}")))?;

        if changed == 0 {
            debug!(id = message_id, owner, "Release found no claim to drop");
        }
        Ok(())
    }

    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM processed_messages WHERE state = 'claimed' AND claimed_at < ?1",
                params![format_datetime(claimed_before)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_stale: {e}")))?;

        if count > 0 {
            warn!(count, "Released stale claims");
        }
        Ok(count as usize)
    }

    async fn get_record(
        &self,
        message_id: &str,
    ) -> Result<Option<ProcessedRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processed_messages
                     WHERE message_id = ?1 AND state = 'committed'"
                ),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn recent_records(&self, limit: usize) -> Result<Vec<ProcessedRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processed_messages
                     WHERE state = 'committed' ORDER BY committed_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_records: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping processed row: {e}"),
            }
        }
        Ok(records)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
