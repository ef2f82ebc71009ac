//! Knowledge base of causal-reasoning rules.
//!
//! Two rule families are held as flat in-memory tables, loaded once at
//! startup and never mutated afterwards:
//!
//! - **Anti-patterns**: cataloged reasoning fallacies (post hoc,
//!   correlation/causation conflation, ...) with trigger phrases, a severity,
//!   and a correction template.
//! - **Cognitive priors**: first-principles statements (e.g. "correlation
//!   does not imply causation") with trigger phrases.
//!
//! Matching is case-insensitive substring matching over the trigger phrases.
//! It is deterministic, side-effect free, and fast enough to run on every
//! step of every task. An empty catalog is valid and degrades to
//! "always safe".
//!
//! The catalog object is immutable after construction and is shared behind
//! an `Arc` across concurrent task executions.

mod catalog;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::validation::Severity;

/// A cataloged reasoning fallacy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiPatternRule {
    /// Stable identifier, e.g. `post_hoc`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Trigger phrases; the rule matches when any phrase occurs in the text
    pub triggers: Vec<String>,
    pub severity: Severity,
    /// Correction template appended to derailed steps
    pub correction: String,
}

/// A first-principles rule checked independently of the anti-pattern catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorRule {
    /// Stable identifier, e.g. `prior_correlation`
    pub id: String,
    /// The principle as a human-readable statement
    pub statement: String,
    /// Trigger phrases marking text the principle applies to
    pub triggers: Vec<String>,
}

/// An anti-pattern rule that matched a queried text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiPatternMatch {
    pub rule_id: String,
    pub name: String,
    pub severity: Severity,
    /// The trigger phrase that fired
    pub matched_trigger: String,
    /// Byte offset of the match in the queried text
    pub position: usize,
    pub correction: String,
}

/// A prior rule relevant to a queried text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorMatch {
    pub rule_id: String,
    pub statement: String,
    pub matched_trigger: String,
    pub position: usize,
}

/// On-disk catalog shape for [`KnowledgeBase::from_json_str`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub anti_patterns: Vec<AntiPatternRule>,
    #[serde(default)]
    pub priors: Vec<PriorRule>,
}

/// Read-only catalog of anti-pattern and prior rules.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    anti_patterns: Vec<AntiPatternRule>,
    priors: Vec<PriorRule>,
}

impl KnowledgeBase {
    /// Create a knowledge base from explicit rule tables.
    pub fn new(anti_patterns: Vec<AntiPatternRule>, priors: Vec<PriorRule>) -> Self {
        Self {
            anti_patterns,
            priors,
        }
    }

    /// Create an empty knowledge base. Every query returns no matches.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// The built-in rule catalog.
    pub fn builtin() -> Self {
        Self::new(catalog::builtin_anti_patterns(), catalog::builtin_priors())
    }

    /// Load a catalog from a JSON document.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).context("Failed to parse rule catalog JSON")?;
        Ok(Self::new(file.anti_patterns, file.priors))
    }

    /// Load a catalog from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule catalog {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn anti_patterns(&self) -> &[AntiPatternRule] {
        &self.anti_patterns
    }

    pub fn priors(&self) -> &[PriorRule] {
        &self.priors
    }

    pub fn is_empty(&self) -> bool {
        self.anti_patterns.is_empty() && self.priors.is_empty()
    }

    /// Find every anti-pattern rule whose trigger condition matches the text.
    ///
    /// Each rule contributes at most one match (its first firing trigger).
    /// Matching is case-insensitive; `position` refers to the original text.
    pub fn find_anti_patterns(&self, text: &str) -> Vec<AntiPatternMatch> {
        let lowered = text.to_ascii_lowercase();
        self.anti_patterns
            .iter()
            .filter_map(|rule| {
                first_trigger(&lowered, &rule.triggers).map(|(trigger, position)| {
                    AntiPatternMatch {
                        rule_id: rule.id.clone(),
                        name: rule.name.clone(),
                        severity: rule.severity,
                        matched_trigger: trigger.to_string(),
                        position,
                        correction: rule.correction.clone(),
                    }
                })
            })
            .collect()
    }

    /// Find every prior rule relevant to the text.
    pub fn find_priors(&self, text: &str) -> Vec<PriorMatch> {
        let lowered = text.to_ascii_lowercase();
        self.priors
            .iter()
            .filter_map(|rule| {
                first_trigger(&lowered, &rule.triggers).map(|(trigger, position)| PriorMatch {
                    rule_id: rule.id.clone(),
                    statement: rule.statement.clone(),
                    matched_trigger: trigger.to_string(),
                    position,
                })
            })
            .collect()
    }
}

/// First trigger phrase found in the (already lowercased) text.
fn first_trigger<'a>(lowered: &str, triggers: &'a [String]) -> Option<(&'a str, usize)> {
    triggers
        .iter()
        .filter_map(|t| {
            lowered
                .find(t.to_ascii_lowercase().as_str())
                .map(|pos| (t.as_str(), pos))
        })
        .min_by_key(|(_, pos)| *pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_catalog_matches_nothing() {
        let kb = KnowledgeBase::empty();
        assert!(kb.find_anti_patterns("X and Y correlate, so X causes Y").is_empty());
        assert!(kb.find_priors("X and Y correlate, so X causes Y").is_empty());
    }

    #[test]
    fn builtin_catalog_detects_correlation_conflation() {
        let kb = KnowledgeBase::builtin();
        let matches = kb.find_anti_patterns("X and Y correlate, so X causes Y");
        assert!(matches.iter().any(|m| m.rule_id == "correlation_causation"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let kb = KnowledgeBase::builtin();
        let matches = kb.find_anti_patterns("SALES INCREASED AFTER the campaign");
        assert!(matches.iter().any(|m| m.rule_id == "post_hoc"));
    }

    #[test]
    fn one_match_per_rule() {
        let kb = KnowledgeBase::builtin();
        let matches = kb.find_anti_patterns("they correlate and they are correlated");
        let hits = matches
            .iter()
            .filter(|m| m.rule_id == "correlation_causation")
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn priors_match_temporal_language() {
        let kb = KnowledgeBase::builtin();
        let matches = kb.find_priors("profits rose after the reorg");
        assert!(matches.iter().any(|m| m.rule_id == "prior_temporal"));
    }

    #[test]
    fn loads_catalog_from_json() {
        let json = r#"{
            "anti_patterns": [{
                "id": "custom",
                "name": "Custom rule",
                "triggers": ["magic phrase"],
                "severity": "high",
                "correction": "Do not say the magic phrase."
            }],
            "priors": []
        }"#;

        let kb = KnowledgeBase::from_json_str(json).unwrap();
        let matches = kb.find_anti_patterns("this contains the MAGIC PHRASE indeed");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id, "custom");
    }

    #[test]
    fn clean_text_matches_nothing() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.find_anti_patterns("summarize the quarterly report").is_empty());
    }
}
