//! Scorer capability: message text → (importance, urgency).
//!
//! The classifier only sees `Score`; any implementation of [`Scorer`] can be
//! swapped in without touching classification logic.

use async_trait::async_trait;

use crate::error::ScorerError;
use crate::pipeline::types::{Message, Score};

/// Maps a message to an importance/urgency signal pair.
///
/// Implementations should behave as pure functions with bounded latency.
/// Temporary unavailability is reported as `ScorerError::ModelUnavailable`.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    async fn score(&self, message: &Message) -> Result<Score, ScorerError>;
}

/// Weighted phrase lists for [`LexiconScorer`].
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub importance: Vec<(String, f32)>,
    pub urgency: Vec<(String, f32)>,
}

impl Default for Lexicon {
    fn default() -> Self {
        let importance = [
            ("invoice", 0.5),
            ("payment due", 0.6),
            ("monthly statement", 0.5),
            ("contract", 0.4),
            ("receipt", 0.3),
            ("tax", 0.3),
            ("interview", 0.4),
            ("offer letter", 0.5),
            ("meeting", 0.25),
            ("please review", 0.35),
            ("thank you", 0.35),
            ("thanks", 0.15),
            ("appreciate", 0.2),
            ("congratulations", 0.25),
            ("?", 0.1),
        ];
        let urgency = [
            ("urgent", 0.6),
            ("asap", 0.6),
            ("immediately", 0.5),
            ("action required", 0.6),
            ("overdue", 0.5),
            ("final notice", 0.6),
            ("deadline", 0.4),
            ("today", 0.25),
            ("tonight", 0.25),
            ("by tomorrow", 0.3),
            ("expires", 0.3),
            ("security alert", 0.5),
        ];
        Self {
            importance: importance
                .into_iter()
                .map(|(p, w)| (p.to_string(), w))
                .collect(),
            urgency: urgency.into_iter().map(|(p, w)| (p.to_string(), w)).collect(),
        }
    }
}

/// Deterministic keyword scorer. Each phrase found in the subject or body
/// adds its weight once; totals are clamped to [0, 1].
#[derive(Debug, Clone, Default)]
pub struct LexiconScorer {
    lexicon: Lexicon,
}

impl LexiconScorer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    /// Synchronous scoring core.
    pub fn score_text(&self, subject: &str, body: &str) -> Score {
        let text = format!("{subject}\n{body}").to_lowercase();
        let sum = |phrases: &[(String, f32)]| -> f32 {
            phrases
                .iter()
                .filter(|(phrase, _)| text.contains(phrase.as_str()))
                .map(|(_, weight)| *weight)
                .sum::<f32>()
                .clamp(0.0, 1.0)
        };
        Score::new(sum(&self.lexicon.importance), sum(&self.lexicon.urgency))
    }
}

#[async_trait]
impl Scorer for LexiconScorer {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn score(&self, message: &Message) -> Result<Score, ScorerError> {
        Ok(self.score_text(&message.subject, &message.body_excerpt))
    }
}
