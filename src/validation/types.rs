//! Outcome types for the validation engine.

use serde::{Deserialize, Serialize};

/// Severity of a detected reasoning issue.
///
/// Ordering is by escalation: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What the orchestrator should do with a step after pre-execution validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    /// No issues worth acting on
    Proceed,
    /// Medium-severity issues present; execute but watch the output
    Monitor,
    /// High-severity issues present; weaken the claim before relying on it
    Mitigate,
    /// Critical issues present; execution is blocked until corrected
    Correct,
}

impl RecommendedAction {
    /// Map the worst detected severity to an action.
    ///
    /// Low-severity issues do not change the action; `None` (no issues) and
    /// `Low` both map to [`RecommendedAction::Proceed`].
    pub fn for_severity(worst: Option<Severity>) -> Self {
        match worst {
            Some(Severity::Critical) => Self::Correct,
            Some(Severity::High) => Self::Mitigate,
            Some(Severity::Medium) => Self::Monitor,
            Some(Severity::Low) | None => Self::Proceed,
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Monitor => write!(f, "monitor"),
            Self::Mitigate => write!(f, "mitigate"),
            Self::Correct => write!(f, "correct"),
        }
    }
}

/// Which rule family produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    AntiPattern,
    Prior,
}

/// A single issue found while scanning a text.
///
/// Anti-pattern matches and violated priors are both reported through this
/// type; violated priors carry the prior's statement as their correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub rule_id: String,
    pub name: String,
    pub source: IssueSource,
    pub severity: Severity,
    /// The offending portion of the scanned text
    pub snippet: String,
    /// Template text used when correcting or annotating
    pub correction: String,
}

/// Caveat categories used by the guardrail annotation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    PostHoc,
    CorrelationCausation,
    ReverseCausation,
    MissingMechanism,
    GraphInvalid,
}

impl IssueCategory {
    /// Category for a rule id, if the rule belongs to a caveat category.
    pub fn for_rule(rule_id: &str) -> Option<Self> {
        match rule_id {
            "post_hoc" | "prior_temporal" => Some(Self::PostHoc),
            "correlation_causation" | "prior_correlation" | "prior_confounder" => {
                Some(Self::CorrelationCausation)
            }
            "reverse_causation" => Some(Self::ReverseCausation),
            "missing_mechanism" | "prior_mechanism" => Some(Self::MissingMechanism),
            _ => None,
        }
    }

    /// Fixed warning line appended by the guardrail pass.
    pub fn caveat_line(&self) -> &'static str {
        match self {
            Self::PostHoc => "Temporal sequence alone does not establish causation.",
            Self::CorrelationCausation => {
                "Correlations in this result may not reflect causal relationships."
            }
            Self::ReverseCausation => "The direction of causation may be reversed.",
            Self::MissingMechanism => {
                "No causal mechanism has been established for this claim."
            }
            Self::GraphInvalid => "The underlying causal graph failed validation.",
        }
    }
}

/// Outcome of pre-execution validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeforeValidation {
    /// No critical issues were found
    pub safe: bool,
    /// At least one critical issue was found; execution must be corrected
    pub derailed: bool,
    pub issues: Vec<DetectedIssue>,
    /// Confidence in the step as written, within [0.0, 1.0]
    pub confidence: f64,
    /// Short human-readable account of what was found
    pub reasoning: String,
    pub action: RecommendedAction,
}

impl BeforeValidation {
    /// Outcome for a text with no detected issues.
    pub fn clean(confidence: f64) -> Self {
        Self {
            safe: true,
            derailed: false,
            issues: Vec::new(),
            confidence,
            reasoning: "no causal-reasoning issues detected".to_string(),
            action: RecommendedAction::Proceed,
        }
    }

    /// Worst severity among the detected issues.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Outcome of post-execution validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterValidation {
    /// No critical issues and the graph check passed
    pub valid: bool,
    /// At least one issue was detected in the result text
    pub bias_detected: bool,
    /// Rule ids whose findings need a guardrail annotation
    pub corrections_needed: Vec<String>,
    /// Structural check over the result; true unless a graph check is
    /// installed and reports otherwise
    pub graph_valid: bool,
    /// Confidence in the result, within [0.0, 1.0]
    pub confidence: f64,
}
