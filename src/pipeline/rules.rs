//! Deterministic rule overlay evaluated before scoring.
//!
//! Rules match on sender domain, full sender address, or subject. Order is
//! significant: the first matching rule wins and its tier is forced,
//! bypassing the scorer entirely.
//!
//! Rules come from a TOML file:
//!
//! ```toml
//! # shorthand sender-substring lists, evaluated after the [[rules]] entries
//! whitelist = ["boss@company.com"]
//! blacklist = ["promo@"]
//!
//! [[rules]]
//! pattern = "ads.example"
//! field = "domain"
//! match_type = "blacklist"
//! tier = "low"
//! ```
//!
//! Top-level keys must precede the first `[[rules]]` table. Unknown keys
//! are rejected.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::RuleError;
use crate::pipeline::types::{Message, Tier};

/// Which message field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    /// Domain part of the sender address.
    Domain,
    /// Full sender address.
    #[default]
    Sender,
    Subject,
}

/// Whether a rule promotes or demotes the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Whitelist,
    Blacklist,
}

impl MatchType {
    /// Tier forced when the rule itself names none.
    pub fn default_tier(&self) -> Tier {
        match self {
            Self::Whitelist => Tier::Urgent,
            Self::Blacklist => Tier::Low,
        }
    }
}

/// Rule as written in the rule file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub pattern: String,
    #[serde(default)]
    pub field: RuleField,
    pub match_type: MatchType,
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Treat `pattern` as a case-insensitive regex instead of a substring.
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleDef>,
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    blacklist: Vec<String>,
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Lowercased needle.
    Substring(String),
    Regex(Regex),
}

/// A single compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub field: RuleField,
    pub match_type: MatchType,
    pub forced_tier: Option<Tier>,
    matcher: Matcher,
}

impl Rule {
    /// Compile a rule definition. `index` is only used for error reporting.
    pub fn compile(index: usize, def: RuleDef) -> Result<Self, RuleError> {
        let trimmed = def.pattern.trim();
        if trimmed.is_empty() {
            return Err(RuleError::EmptyPattern { index });
        }

        let matcher = if def.regex {
            let regex = Regex::new(&format!("(?i){trimmed}")).map_err(|e| {
                RuleError::InvalidPattern {
                    index,
                    pattern: def.pattern.clone(),
                    reason: e.to_string(),
                }
            })?;
            Matcher::Regex(regex)
        } else {
            Matcher::Substring(trimmed.to_lowercase())
        };

        Ok(Self {
            pattern: def.pattern,
            field: def.field,
            match_type: def.match_type,
            forced_tier: def.tier,
            matcher,
        })
    }

    /// The tier this rule forces when it matches.
    pub fn tier(&self) -> Tier {
        self.forced_tier
            .unwrap_or_else(|| self.match_type.default_tier())
    }

    fn matches(&self, message: &Message) -> bool {
        let value = match self.field {
            RuleField::Domain => message.sender_domain(),
            RuleField::Sender => message.sender.to_lowercase(),
            RuleField::Subject => message.subject.to_lowercase(),
        };
        if value.is_empty() {
            return false;
        }
        match &self.matcher {
            Matcher::Substring(needle) => value.contains(needle.as_str()),
            Matcher::Regex(regex) => regex.is_match(&value),
        }
    }
}

/// Ordered rule set. First match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// A rule set that never matches.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile definitions in order. Fails on the first malformed rule.
    pub fn from_defs(defs: Vec<RuleDef>) -> Result<Self, RuleError> {
        let rules = defs
            .into_iter()
            .enumerate()
            .map(|(index, def)| Rule::compile(index, def))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Parse a TOML rule document.
    pub fn from_toml_str(source: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(source).map_err(|e| RuleError::Parse(e.to_string()))?;

        let mut defs = file.rules;
        let shorthand = file
            .whitelist
            .into_iter()
            .map(|p| (p, MatchType::Whitelist))
            .chain(file.blacklist.into_iter().map(|p| (p, MatchType::Blacklist)));
        for (pattern, match_type) in shorthand {
            defs.push(RuleDef {
                pattern,
                field: RuleField::Sender,
                match_type,
                tier: None,
                regex: false,
            });
        }

        Self::from_defs(defs)
    }

    /// Load and compile a rule file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let set = Self::from_toml_str(&source)?;
        info!(path = %path.display(), count = set.len(), "Rules loaded");
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule matching the message, if any.
    pub fn first_match(&self, message: &Message) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(message))
    }

    /// Forced tier of the first matching rule, or `None` to fall through to scoring.
    pub fn evaluate(&self, message: &Message) -> Option<Tier> {
        let rule = self.first_match(message)?;
        let tier = rule.tier();
        debug!(
            id = %message.id,
            sender = %message.sender,
            rule = %rule.pattern,
            tier = tier.label(),
            "Message matched rule"
        );
        Some(tier)
    }
}
