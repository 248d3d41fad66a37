//! Shared types for the triage pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Message ─────────────────────────────────────────────────────────

/// A candidate message fetched from the mailbox. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque mailbox-native ID, stable and unique per mailbox.
    pub id: String,
    /// Sender address (`alice@example.com`).
    pub sender: String,
    /// Subject line, empty if absent.
    pub subject: String,
    /// Plain-text body excerpt.
    pub body_excerpt: String,
    /// When the mailbox received it.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Lowercased domain part of the sender address.
    ///
    /// Handles `Name <user@host>` forms. Returns an empty string when the
    /// sender has no `@`.
    pub fn sender_domain(&self) -> String {
        let addr = self
            .sender
            .rsplit_once('<')
            .map(|(_, rest)| rest.trim_end_matches('>'))
            .unwrap_or(&self.sender);
        addr.rsplit_once('@')
            .map(|(_, domain)| domain.trim().trim_end_matches('>').to_lowercase())
            .unwrap_or_default()
    }
}

// ── Score ───────────────────────────────────────────────────────────

/// Scorer output. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
    /// Importance in [0, 1].
    pub importance: f32,
    /// Urgency in [0, 1].
    pub urgency: f32,
}

impl Score {
    pub fn new(importance: f32, urgency: f32) -> Self {
        Self {
            importance,
            urgency,
        }
    }

    /// Both components finite and within [0, 1].
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.importance) && (0.0..=1.0).contains(&self.urgency)
    }
}

// ── Tier ────────────────────────────────────────────────────────────

/// Priority bucket a message is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Urgent,
    Review,
    Low,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Urgent, Tier::Review, Tier::Low];

    /// Short label for logging and storage.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Review => "review",
            Self::Low => "low",
        }
    }

    /// The mailbox action this tier drives. Total over `Tier`.
    pub fn action(&self, review_label: &str) -> Action {
        match self {
            Self::Urgent => Action::Star,
            Self::Review => Action::Label(review_label.to_string()),
            Self::Low => Action::Archive,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "review" => Ok(Self::Review),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

// ── Action ──────────────────────────────────────────────────────────

/// Mailbox mutation applied to a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "label", rename_all = "snake_case")]
pub enum Action {
    Star,
    Label(String),
    Archive,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Star => "star",
            Self::Label(_) => "label",
            Self::Archive => "archive",
        }
    }

    /// Label-name parameter, only present for `Label`.
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Self::Label(name) => Some(name),
            _ => None,
        }
    }

    /// Rebuild from the stored `(kind, label)` pair.
    pub fn from_parts(kind: &str, label: Option<String>) -> Option<Self> {
        match (kind, label) {
            ("star", _) => Some(Self::Star),
            ("archive", _) => Some(Self::Archive),
            ("label", Some(name)) => Some(Self::Label(name)),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(name) => write!(f, "label(\"{name}\")"),
            other => f.write_str(other.kind()),
        }
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Where a tier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Rule,
    Model,
}

impl DecisionSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Model => "model",
        }
    }
}

/// Routing decision for one message in one cycle. Not persisted beyond the
/// `ProcessedRecord` it yields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub message_id: String,
    pub tier: Tier,
    pub action: Action,
    pub source: DecisionSource,
    /// Scorer output, absent for rule-sourced decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
}
