//! Tier classification: rule overlay first, then score thresholds.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::types::{Message, Score, Tier};

/// Default urgency threshold.
pub const DEFAULT_T_URGENT: f32 = 0.8;

/// Default importance threshold.
pub const DEFAULT_T_IMPORTANT: f32 = 0.6;

/// Score thresholds. Both must lie in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub urgent: f32,
    pub important: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            urgent: DEFAULT_T_URGENT,
            important: DEFAULT_T_IMPORTANT,
        }
    }
}

impl Thresholds {
    pub fn new(urgent: f32, important: f32) -> Result<Self, ConfigError> {
        let thresholds = Self { urgent, important };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("TRIAGE_T_URGENT", self.urgent),
            ("TRIAGE_T_IMPORTANT", self.important),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("{value} is outside [0, 1]"),
                });
            }
        }
        Ok(())
    }
}

/// Pure tier classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    thresholds: Thresholds,
}

impl Classifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Decide the tier for a message.
    ///
    /// A forced tier always wins. Otherwise urgency dominates importance:
    /// urgency ≥ `urgent` → Urgent, else importance ≥ `important` → Review,
    /// else Low. The message itself is not inspected; it is part of the
    /// signature so alternative classifiers can use it.
    pub fn classify(&self, _message: &Message, score: Score, forced: Option<Tier>) -> Tier {
        if let Some(tier) = forced {
            return tier;
        }
        let urgent = score.urgency >= self.thresholds.urgent;
        let important = score.importance >= self.thresholds.important;
        match (urgent, important) {
            (true, _) => Tier::Urgent,
            (false, true) => Tier::Review,
            (false, false) => Tier::Low,
        }
    }
}
